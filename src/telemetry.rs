//! Metrics sink injected into the cache and the processor.
//!
//! Every method is fire-and-forget: implementations must not block the caller
//! for long and must never fail the operation that reports to them.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::events::TransitionEvent;

/// How a processing span ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanOutcome {
    /// Classification ran and returned a message.
    Success,
    /// Classification ran and failed; the fallback answered.
    Error,
    /// The breaker refused the call; the fallback answered.
    Rejected,
}

impl SpanOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanOutcome::Success => "success",
            SpanOutcome::Error => "error",
            SpanOutcome::Rejected => "rejected",
        }
    }
}

/// Latency and attributes of one `process` call.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanRecord {
    pub name: &'static str,
    pub lead_state: &'static str,
    pub lead_score: Option<i32>,
    pub sale_id: Option<String>,
    pub outcome: SpanOutcome,
    pub duration: Duration,
}

impl SpanRecord {
    pub fn is_error(&self) -> bool {
        self.outcome != SpanOutcome::Success
    }
}

/// Write-only observability backend.
pub trait MetricsSink: Send + Sync {
    fn increment_hit(&self);
    fn increment_miss(&self);
    fn record_span(&self, span: SpanRecord);
    fn record_transition(&self, event: TransitionEvent);
}

/// Keeps everything in memory; used by tests and the replay summary.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    spans: Mutex<Vec<SpanRecord>>,
    transitions: Mutex<Vec<TransitionEvent>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Acquire)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Acquire)
    }

    pub fn spans(&self) -> Vec<SpanRecord> {
        self.spans.lock().clone()
    }

    pub fn transitions(&self) -> Vec<TransitionEvent> {
        self.transitions.lock().clone()
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.lock().len()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn increment_hit(&self) {
        self.hits.fetch_add(1, Ordering::AcqRel);
    }

    fn increment_miss(&self) {
        self.misses.fetch_add(1, Ordering::AcqRel);
    }

    fn record_span(&self, span: SpanRecord) {
        self.spans.lock().push(span);
    }

    fn record_transition(&self, event: TransitionEvent) {
        self.transitions.lock().push(event);
    }
}

/// Forwards to the process-wide `metrics` recorder.
///
/// Without an installed recorder the macros are no-ops, so this sink is safe
/// to use in any binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct FacadeMetrics;

impl MetricsSink for FacadeMetrics {
    fn increment_hit(&self) {
        metrics::counter!("lead_core.cache.hits").increment(1);
    }

    fn increment_miss(&self) {
        metrics::counter!("lead_core.cache.misses").increment(1);
    }

    fn record_span(&self, span: SpanRecord) {
        metrics::counter!(
            "lead_core.processing.total",
            "lead_state" => span.lead_state,
            "outcome" => span.outcome.as_str()
        )
        .increment(1);
        metrics::histogram!(
            "lead_core.processing.duration_ms",
            "lead_state" => span.lead_state
        )
        .record(span.duration.as_secs_f64() * 1000.0);
    }

    fn record_transition(&self, event: TransitionEvent) {
        tracing::debug!(
            from_state = %event.from_state,
            to_state = ?event.to_state,
            lead_id = %event.lead_id,
            score = event.score,
            "Lead transition recorded"
        );
        metrics::counter!(
            "lead_core.transitions.total",
            "from_state" => event.from_state
        )
        .increment(1);
    }
}

/// Fans every report out to several sinks, in order.
#[derive(Clone, Default)]
pub struct CompositeMetrics {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl CompositeMetrics {
    pub fn new(sinks: Vec<Arc<dyn MetricsSink>>) -> Self {
        Self { sinks }
    }
}

impl MetricsSink for CompositeMetrics {
    fn increment_hit(&self) {
        self.sinks.iter().for_each(|sink| sink.increment_hit());
    }

    fn increment_miss(&self) {
        self.sinks.iter().for_each(|sink| sink.increment_miss());
    }

    fn record_span(&self, span: SpanRecord) {
        for sink in &self.sinks {
            sink.record_span(span.clone());
        }
    }

    fn record_transition(&self, event: TransitionEvent) {
        for sink in &self.sinks {
            sink.record_transition(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lead_state::LeadState;

    #[test]
    fn test_in_memory_counters() {
        let sink = InMemoryMetrics::new();
        sink.increment_hit();
        sink.increment_miss();
        sink.increment_miss();

        assert_eq!(sink.hits(), 1);
        assert_eq!(sink.misses(), 2);
    }

    #[test]
    fn test_in_memory_keeps_records() {
        let sink = InMemoryMetrics::new();
        sink.record_transition(TransitionEvent::begin(&LeadState::qualified(3, "Li"), None));
        sink.record_span(SpanRecord {
            name: "process_lead_status",
            lead_state: "Qualified",
            lead_score: Some(3),
            sale_id: None,
            outcome: SpanOutcome::Rejected,
            duration: Duration::from_millis(1),
        });

        assert_eq!(sink.transition_count(), 1);
        assert!(sink.spans()[0].is_error());
    }

    #[test]
    fn test_facade_without_recorder_is_noop() {
        let sink = FacadeMetrics;
        sink.increment_hit();
        sink.increment_miss();
        sink.record_transition(TransitionEvent::begin(&LeadState::qualified(1, "Al"), None));
    }

    #[test]
    fn test_composite_forwards_to_every_sink() {
        let first = Arc::new(InMemoryMetrics::new());
        let second = Arc::new(InMemoryMetrics::new());
        let sink = CompositeMetrics::new(vec![first.clone(), Arc::new(FacadeMetrics), second.clone()]);

        sink.increment_hit();
        sink.increment_miss();
        sink.record_transition(TransitionEvent::begin(&LeadState::new("ads", chrono::Utc::now()), None));
        sink.record_span(SpanRecord {
            name: "process_lead_status",
            lead_state: "New",
            lead_score: None,
            sale_id: None,
            outcome: SpanOutcome::Success,
            duration: Duration::from_millis(2),
        });

        for memory in [&first, &second] {
            assert_eq!(memory.hits(), 1);
            assert_eq!(memory.misses(), 1);
            assert_eq!(memory.transition_count(), 1);
            assert_eq!(memory.spans()[0].outcome, SpanOutcome::Success);
        }
    }
}
