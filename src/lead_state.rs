//! Lead lifecycle states and their classification.
//!
//! `LeadState` is a closed set: `classify` matches it exhaustively, so adding a
//! variant without handling it fails to build. Payloads arriving as JSON are the
//! only way an unknown state can reach the crate at run time, and those are
//! rejected with `ProcessingError::UnhandledVariant` during decoding.

use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ProcessingError;

/// Tags accepted in the `state` field of a JSON payload.
pub const KNOWN_STATES: [&str; 4] = ["new", "qualified", "converted", "lost"];

/// Classification of a sales lead at one point of its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LeadState {
    /// Lead just arrived from an acquisition channel.
    #[serde(rename_all = "camelCase")]
    New {
        source: String,
        timestamp: DateTime<Utc>,
    },
    /// Lead scored and handed to an agent.
    #[serde(rename_all = "camelCase")]
    Qualified { score: i32, assigned_agent: String },
    /// Lead turned into a sale.
    #[serde(rename_all = "camelCase")]
    Converted { sale_id: String, amount: BigDecimal },
    /// Lead closed without a sale.
    #[serde(rename_all = "camelCase")]
    Lost {
        reason: String,
        closed_at: DateTime<Utc>,
    },
}

impl LeadState {
    pub fn new(source: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        LeadState::New {
            source: source.into(),
            timestamp,
        }
    }

    pub fn qualified(score: i32, assigned_agent: impl Into<String>) -> Self {
        LeadState::Qualified {
            score,
            assigned_agent: assigned_agent.into(),
        }
    }

    pub fn converted(sale_id: impl Into<String>, amount: BigDecimal) -> Self {
        LeadState::Converted {
            sale_id: sale_id.into(),
            amount,
        }
    }

    pub fn lost(reason: impl Into<String>, closed_at: DateTime<Utc>) -> Self {
        LeadState::Lost {
            reason: reason.into(),
            closed_at,
        }
    }

    /// Variant name as recorded in spans and transition events.
    pub fn variant_name(&self) -> &'static str {
        match self {
            LeadState::New { .. } => "New",
            LeadState::Qualified { .. } => "Qualified",
            LeadState::Converted { .. } => "Converted",
            LeadState::Lost { .. } => "Lost",
        }
    }

    /// Score carried by the state, if any.
    pub fn score(&self) -> Option<i32> {
        match self {
            LeadState::Qualified { score, .. } => Some(*score),
            _ => None,
        }
    }

    /// Sale reference carried by the state, if any.
    pub fn sale_id(&self) -> Option<&str> {
        match self {
            LeadState::Converted { sale_id, .. } => Some(sale_id),
            _ => None,
        }
    }

    /// Decodes a tagged JSON payload such as `{"state":"qualified","score":87,"assignedAgent":"Ana"}`.
    ///
    /// An unknown or missing `state` tag is an `UnhandledVariant`; a known tag
    /// with a malformed body is a `ClassificationFailure`.
    pub fn try_from_json(value: &serde_json::Value) -> Result<Self, ProcessingError> {
        let tag = value
            .get("state")
            .and_then(|s| s.as_str())
            .ok_or_else(|| ProcessingError::UnhandledVariant("<missing>".to_string()))?;

        if !KNOWN_STATES.contains(&tag) {
            return Err(ProcessingError::UnhandledVariant(tag.to_string()));
        }

        Ok(serde_json::from_value(value.clone())?)
    }
}

fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Produces the fixed-format outcome message for a lead state.
///
/// Never fails for a constructed `LeadState`; the `Result` is the seam through
/// which `LeadClassifier` implementations report failures.
pub fn classify(state: &LeadState) -> Result<String, ProcessingError> {
    let message = match state {
        LeadState::New { source, timestamp } => format!(
            "New lead from {} received at {}. Activating contact sequence.",
            source,
            format_instant(timestamp)
        ),
        LeadState::Qualified {
            score,
            assigned_agent,
        } => format!(
            "Lead qualified with {}. Assigned to {} for immediate closing.",
            score, assigned_agent
        ),
        LeadState::Converted { sale_id, amount } => format!(
            "SALE CLOSED! Reference: {}. Amount: ${}. Recording in CRM.",
            sale_id,
            amount.with_scale_round(2, RoundingMode::HalfUp)
        ),
        LeadState::Lost { reason, closed_at } => {
            tracing::warn!("Opportunity lost: {}", reason);
            format!(
                "Closed unsuccessfully at {}. Reason: {}.",
                format_instant(closed_at),
                reason
            )
        }
    };

    Ok(message)
}
