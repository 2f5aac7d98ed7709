//! Guarded lead-state processing.
//!
//! ```text
//! process(state)
//!   → ProcessingSpan opened (closed on drop, whatever the exit path)
//!   → CircuitBreaker::call
//!       rejected → fallback, no TransitionEvent
//!       permitted → classifier → TransitionEvent recorded
//!           ok  → message
//!           err → failure counted → fallback
//!           panic → caught, treated as err
//! ```

use failsafe::Error;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::field;

use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::errors::{ProcessingError, ResultExt};
use crate::events::TransitionEvent;
use crate::lead_state::{self, LeadState};
use crate::telemetry::{MetricsSink, SpanOutcome, SpanRecord};

/// Answer returned whenever classification is unavailable.
pub const FALLBACK_MESSAGE: &str =
    "Analysis service temporarily in offline mode. Retrying...";

const SPAN_NAME: &str = "process_lead_status";

/// Turns a lead state into an outcome message.
pub trait LeadClassifier: Send + Sync {
    fn classify(&self, state: &LeadState) -> Result<String, ProcessingError>;
}

/// Fixed-template classification.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardClassifier;

impl LeadClassifier for StandardClassifier {
    fn classify(&self, state: &LeadState) -> Result<String, ProcessingError> {
        lead_state::classify(state)
    }
}

/// Scoped span around one `process` call.
///
/// Holds the entered `tracing` span and reports a `SpanRecord` to the sink
/// when dropped, so it is closed on every exit path including unwinding.
struct ProcessingSpan<'a> {
    entered: tracing::span::EnteredSpan,
    metrics: &'a dyn MetricsSink,
    record: Option<SpanRecord>,
    started: Instant,
}

impl<'a> ProcessingSpan<'a> {
    fn start(state: &LeadState, metrics: &'a dyn MetricsSink) -> Self {
        let span = tracing::info_span!(
            "process_lead_status",
            lead.state = state.variant_name(),
            lead.score = field::Empty,
            sale.id = field::Empty,
            error = false,
        );
        if let Some(score) = state.score() {
            span.record("lead.score", score);
        }
        if let Some(sale_id) = state.sale_id() {
            span.record("sale.id", sale_id);
        }

        Self {
            entered: span.entered(),
            metrics,
            record: Some(SpanRecord {
                name: SPAN_NAME,
                lead_state: state.variant_name(),
                lead_score: state.score(),
                sale_id: state.sale_id().map(str::to_string),
                outcome: SpanOutcome::Error,
                duration: Default::default(),
            }),
            started: Instant::now(),
        }
    }

    fn finish(&mut self, outcome: SpanOutcome) {
        if outcome != SpanOutcome::Success {
            self.entered.record("error", true);
        }
        if let Some(record) = self.record.as_mut() {
            record.outcome = outcome;
        }
    }
}

impl Drop for ProcessingSpan<'_> {
    fn drop(&mut self) {
        if let Some(mut record) = self.record.take() {
            record.duration = self.started.elapsed();
            self.metrics.record_span(record);
        }
    }
}

/// Classifies lead states behind a circuit breaker.
pub struct TransitionProcessor {
    breaker: Arc<CircuitBreaker>,
    classifier: Arc<dyn LeadClassifier>,
    metrics: Arc<dyn MetricsSink>,
}

impl TransitionProcessor {
    pub fn new(breaker: Arc<CircuitBreaker>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self::with_classifier(breaker, Arc::new(StandardClassifier), metrics)
    }

    pub fn with_classifier(
        breaker: Arc<CircuitBreaker>,
        classifier: Arc<dyn LeadClassifier>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            breaker,
            classifier,
            metrics,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Classifies `state`; never fails from the caller's point of view.
    pub fn process(&self, state: &LeadState) -> String {
        self.run(state, None)
    }

    /// Same as `process`, recording `lead_id` on the transition event.
    pub fn process_lead(&self, lead_id: &str, state: &LeadState) -> String {
        self.run(state, Some(lead_id))
    }

    /// Degraded-mode answer. Logs `error` and performs no classification.
    pub fn fallback(&self, state: &LeadState, error: &ProcessingError) -> String {
        tracing::error!(
            lead_state = state.variant_name(),
            breaker = ?self.breaker.state(),
            "Circuit breaker ACTIVATED: {}",
            error
        );
        FALLBACK_MESSAGE.to_string()
    }

    fn run(&self, state: &LeadState, lead_id: Option<&str>) -> String {
        let mut span = ProcessingSpan::start(state, self.metrics.as_ref());

        match self.breaker.call(|| self.classify_and_record(state, lead_id)) {
            Ok(message) => {
                span.finish(SpanOutcome::Success);
                message
            }
            Err(Error::Rejected) => {
                span.finish(SpanOutcome::Rejected);
                self.fallback(state, &self.rejection_cause())
            }
            Err(Error::Inner(e)) => {
                span.finish(SpanOutcome::Error);
                if self.breaker.state() == CircuitState::Open {
                    tracing::warn!(
                        breaker = self.breaker.name(),
                        "Lead classification failures reached the threshold"
                    );
                }
                self.fallback(state, &e)
            }
        }
    }

    /// `CircuitOpenRejection`, carrying the failure that opened the circuit when known.
    fn rejection_cause(&self) -> ProcessingError {
        match self.breaker.last_error() {
            Some(last) => ProcessingError::WithContext {
                source: Box::new(ProcessingError::CircuitOpenRejection),
                context: format!("last failure: {}", last),
            },
            None => ProcessingError::CircuitOpenRejection,
        }
    }

    /// Guarded region: classification plus the transition event.
    fn classify_and_record(
        &self,
        state: &LeadState,
        lead_id: Option<&str>,
    ) -> Result<String, ProcessingError> {
        let mut event = TransitionEvent::begin(state, lead_id);
        let result = catch_unwind(AssertUnwindSafe(|| self.classifier.classify(state)))
            .unwrap_or_else(|payload| {
                Err(ProcessingError::ClassificationFailure(format!(
                    "classifier panicked: {}",
                    panic_message(&*payload)
                )))
            })
            .with_context(|| format!("classifying {} lead", state.variant_name()));

        if result.is_ok() {
            event.mark_processed();
        }
        self.metrics.record_transition(event);

        result
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
