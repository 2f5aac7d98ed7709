use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::lead_state::LeadState;

/// Label recorded as `to_state` for every successful classification.
pub const PROCESSED: &str = "processed";

/// Record of one call that reached the classifier.
///
/// Handed to the `MetricsSink` after the call; the sink owns it from then on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionEvent {
    /// Variant name of the classified state.
    pub from_state: String,
    /// `Some("processed")` on success, `None` when classification failed.
    pub to_state: Option<String>,
    pub lead_id: String,
    /// Score of a qualified lead, zero for the other variants.
    pub score: i32,
    pub timestamp: DateTime<Utc>,
}

impl TransitionEvent {
    /// Starts an event for `state`; `to_state` stays unset until the outcome is known.
    pub fn begin(state: &LeadState, lead_id: Option<&str>) -> Self {
        Self {
            from_state: state.variant_name().to_string(),
            to_state: None,
            lead_id: lead_id.unwrap_or_default().to_string(),
            score: state.score().unwrap_or_default(),
            timestamp: Utc::now(),
        }
    }

    pub fn mark_processed(&mut self) {
        self.to_state = Some(PROCESSED.to_string());
    }

    pub fn is_processed(&self) -> bool {
        self.to_state.as_deref() == Some(PROCESSED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_populates_from_state_and_score() {
        let event = TransitionEvent::begin(&LeadState::qualified(87, "Ana"), Some("lead-7"));

        assert_eq!(event.from_state, "Qualified");
        assert_eq!(event.lead_id, "lead-7");
        assert_eq!(event.score, 87);
        assert!(!event.is_processed());
    }

    #[test]
    fn test_defaults_when_variant_carries_nothing() {
        let mut event = TransitionEvent::begin(&LeadState::new("ads", Utc::now()), None);
        event.mark_processed();

        assert_eq!(event.lead_id, "");
        assert_eq!(event.score, 0);
        assert_eq!(event.to_state.as_deref(), Some("processed"));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["fromState"], "New");
        assert_eq!(json["toState"], "processed");
    }
}
