//! Circuit breaker guarding lead classification.
//!
//! # States
//!
//! - **CLOSED**: Normal operation, calls pass through.
//! - **OPEN**: Too many failures, calls are short-circuited.
//! - **HALF_OPEN**: One trial call tests whether the guarded logic recovered.
//!
//! # State Transitions
//!
//! ```text
//! Closed → Open:     consecutive failures >= threshold
//! Open → Half-Open:  reset timeout elapsed since opened_at
//! Half-Open → Closed: the trial call succeeds
//! Half-Open → Open:   the trial call fails (opened_at restarts)
//! ```
//!
//! Every permission carries the generation it was granted in. Only outcomes
//! from the current generation move the state machine, and only the trial's
//! outcome can leave HALF_OPEN.
//!
//! `CircuitBreaker::call` reports through `failsafe::Error`: `Rejected` when
//! the call was short-circuited, `Inner` when it ran and failed.

use failsafe::Error;
use parking_lot::Mutex;
use std::fmt::Display;
use std::time::{Duration, Instant};

/// Breaker settings.
///
/// # Defaults
///
/// - **Failure threshold**: 5 consecutive failures triggers OPEN state.
/// - **Reset timeout**: 30s in OPEN before a trial call is let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Breaker status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Read-only copy of the breaker state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerSnapshot {
    pub status: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_time: Option<Instant>,
    pub opened_at: Option<Instant>,
    /// Display form of the most recent failure.
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct BreakerState {
    status: CircuitState,
    consecutive_failures: u32,
    last_failure_time: Option<Instant>,
    opened_at: Option<Instant>,
    last_error: Option<String>,
    trial_in_flight: bool,
    /// Bumped on every status change.
    generation: u64,
}

impl BreakerState {
    fn transition(&mut self, status: CircuitState) {
        self.status = status;
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Permission to run one guarded call.
#[derive(Debug, Clone, Copy)]
struct Permit {
    generation: u64,
    trial: bool,
}

/// Records a failure for a permit that was never settled, e.g. on unwinding.
struct PermitGuard<'a> {
    breaker: &'a CircuitBreaker,
    permit: Option<Permit>,
}

impl PermitGuard<'_> {
    fn disarm(&mut self) {
        self.permit = None;
    }
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.breaker
                .record_failure(permit, "guarded call panicked".to_string());
        }
    }
}

/// Failure-counting guard around a fallible call.
///
/// Every read-decide-mutate step runs under one mutex. The guarded call itself
/// runs outside the lock once permission has been granted.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        tracing::info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            reset_timeout_ms = config.reset_timeout.as_millis() as u64,
            "Circuit breaker initialized"
        );

        Self {
            name,
            config,
            state: Mutex::new(BreakerState {
                status: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_time: None,
                opened_at: None,
                last_error: None,
                trial_in_flight: false,
                generation: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current status. An elapsed OPEN window is reported as OPEN until the
    /// next call asks for permission.
    pub fn state(&self) -> CircuitState {
        self.state.lock().status
    }

    /// Display form of the most recent failure, if any.
    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let state = self.state.lock();
        CircuitBreakerSnapshot {
            status: state.status,
            consecutive_failures: state.consecutive_failures,
            last_failure_time: state.last_failure_time,
            opened_at: state.opened_at,
            last_error: state.last_error.clone(),
        }
    }

    /// Runs `f` if the breaker permits it and records the outcome.
    ///
    /// Returns `Error::Rejected` without calling `f` when the circuit is open
    /// (or a half-open trial is already running), `Error::Inner` when `f` fails.
    /// A panic in `f` is recorded as a failure before it propagates.
    pub fn call<F, T, E>(&self, f: F) -> Result<T, Error<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: Display,
    {
        let permit = match self.try_acquire() {
            Some(permit) => permit,
            None => return Err(Error::Rejected),
        };
        let mut guard = PermitGuard {
            breaker: self,
            permit: Some(permit),
        };

        let result = f();
        guard.disarm();

        match result {
            Ok(value) => {
                self.record_success(permit);
                Ok(value)
            }
            Err(e) => {
                self.record_failure(permit, e.to_string());
                Err(Error::Inner(e))
            }
        }
    }

    /// Decides whether a call may proceed, moving OPEN to HALF_OPEN once the
    /// reset timeout has elapsed. Only one half-open trial is admitted.
    fn try_acquire(&self) -> Option<Permit> {
        let mut state = self.state.lock();
        match state.status {
            CircuitState::Closed => Some(Permit {
                generation: state.generation,
                trial: false,
            }),
            CircuitState::Open => {
                let elapsed = state
                    .opened_at
                    .map(|opened| opened.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    state.transition(CircuitState::HalfOpen);
                    state.trial_in_flight = true;
                    tracing::info!(component = %self.name, "Circuit breaker half-open (testing recovery)");
                    Some(Permit {
                        generation: state.generation,
                        trial: true,
                    })
                } else {
                    tracing::debug!(component = %self.name, "Circuit open, short-circuiting call");
                    None
                }
            }
            CircuitState::HalfOpen => {
                if state.trial_in_flight {
                    None
                } else {
                    state.trial_in_flight = true;
                    Some(Permit {
                        generation: state.generation,
                        trial: true,
                    })
                }
            }
        }
    }

    fn record_success(&self, permit: Permit) {
        let mut state = self.state.lock();
        if permit.generation != state.generation {
            // Admitted before the last transition; its outcome is stale.
            return;
        }

        match state.status {
            CircuitState::Closed => state.consecutive_failures = 0,
            CircuitState::HalfOpen if permit.trial => {
                state.consecutive_failures = 0;
                state.opened_at = None;
                state.trial_in_flight = false;
                state.transition(CircuitState::Closed);
                tracing::info!(component = %self.name, "Circuit breaker closed (recovered)");
            }
            _ => {}
        }
    }

    fn record_failure(&self, permit: Permit, cause: String) {
        let mut state = self.state.lock();
        let now = Instant::now();
        state.last_failure_time = Some(now);
        state.last_error = Some(cause);

        if permit.generation != state.generation {
            return;
        }

        match state.status {
            CircuitState::Closed => {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                if state.consecutive_failures >= self.config.failure_threshold {
                    state.opened_at = Some(now);
                    state.transition(CircuitState::Open);
                    tracing::error!(
                        component = %self.name,
                        consecutive_failures = state.consecutive_failures,
                        failure_threshold = self.config.failure_threshold,
                        "Circuit breaker opened (failing fast)"
                    );
                }
            }
            CircuitState::HalfOpen if permit.trial => {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                state.opened_at = Some(now);
                state.trial_in_flight = false;
                state.transition(CircuitState::Open);
                tracing::warn!(component = %self.name, "Half-open trial failed, circuit re-opened");
            }
            _ => {}
        }
    }
}

/// Creates the circuit breaker that guards lead classification.
///
/// # Configuration
///
/// - **Failure threshold**: `config.failure_threshold` consecutive failures trigger OPEN.
/// - **Reset timeout**: `config.reset_timeout` in OPEN before a single trial call.
///
/// # Example
///
/// ```rust
/// use rust_lead_core::circuit_breaker::{create_lead_circuit_breaker, CircuitBreakerConfig};
///
/// let circuit_breaker = create_lead_circuit_breaker(CircuitBreakerConfig::default());
/// let result = circuit_breaker.call(|| Ok::<_, String>("classified"));
/// assert!(result.is_ok());
/// ```
///
/// # Returns
///
/// * `CircuitBreaker` - whose `call` yields `Result<T, failsafe::Error<E>>`:
///   `Error::Inner(e)` when the guarded call failed, `Error::Rejected` when it was short-circuited.
pub fn create_lead_circuit_breaker(config: CircuitBreakerConfig) -> CircuitBreaker {
    CircuitBreaker::new("lead_processor", config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn fast_breaker(threshold: u32) -> CircuitBreaker {
        create_lead_circuit_breaker(CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout: Duration::from_millis(50),
        })
    }

    #[test]
    fn test_circuit_breaker_opens_after_failures() {
        let cb = create_lead_circuit_breaker(CircuitBreakerConfig::default());

        for _ in 0..5 {
            let result: Result<(), Error<&str>> = cb.call(|| Err::<(), &str>("simulated error"));
            assert!(result.is_err());
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.last_error().as_deref(), Some("simulated error"));

        let mut invoked = false;
        let result: Result<(), Error<&str>> = cb.call(|| {
            invoked = true;
            Ok::<(), &str>(())
        });

        match result {
            Err(Error::Rejected) => {}
            _ => panic!("Expected circuit to be open and reject requests"),
        }
        assert!(!invoked);
    }

    #[test]
    fn test_circuit_breaker_allows_success() {
        let cb = create_lead_circuit_breaker(CircuitBreakerConfig::default());

        let result: Result<i32, Error<&str>> = cb.call(|| Ok::<i32, &str>(42));

        assert_eq!(result.unwrap(), 42);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let cb = fast_breaker(3);

        let _ = cb.call(|| Err::<(), _>("e"));
        let _ = cb.call(|| Err::<(), _>("e"));
        assert_eq!(cb.snapshot().consecutive_failures, 2);

        let _ = cb.call(|| Ok::<(), &str>(()));
        assert_eq!(cb.snapshot().consecutive_failures, 0);

        let _ = cb.call(|| Err::<(), _>("e"));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_success_closes() {
        let cb = fast_breaker(1);

        let _ = cb.call(|| Err::<(), _>("e"));
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.snapshot().opened_at.is_some());

        std::thread::sleep(Duration::from_millis(60));

        let result: Result<&str, Error<&str>> = cb.call(|| Ok("recovered"));
        assert_eq!(result.unwrap(), "recovered");

        let snapshot = cb.snapshot();
        assert_eq!(snapshot.status, CircuitState::Closed);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert!(snapshot.opened_at.is_none());
    }

    #[test]
    fn test_half_open_failure_reopens_and_restarts_timeout() {
        let cb = fast_breaker(1);

        let _ = cb.call(|| Err::<(), _>("e"));
        let first_opened = cb.snapshot().opened_at.unwrap();

        std::thread::sleep(Duration::from_millis(60));
        let result = cb.call(|| Err::<(), _>("still failing"));
        assert!(matches!(result, Err(Error::Inner("still failing"))));

        let snapshot = cb.snapshot();
        assert_eq!(snapshot.status, CircuitState::Open);
        assert!(snapshot.opened_at.unwrap() > first_opened);
        assert_eq!(snapshot.last_error.as_deref(), Some("still failing"));

        // The window restarted, so the next call is rejected right away.
        let result = cb.call(|| Ok::<(), &str>(()));
        assert!(matches!(result, Err(Error::Rejected)));
    }

    #[test]
    fn test_half_open_admits_single_trial() {
        let cb = fast_breaker(1);
        let _ = cb.call(|| Err::<(), _>("e"));
        std::thread::sleep(Duration::from_millis(60));

        let outer: Result<(), Error<&str>> = cb.call(|| {
            assert_eq!(cb.state(), CircuitState::HalfOpen);
            let inner: Result<(), Error<&str>> = cb.call(|| Ok(()));
            assert!(matches!(inner, Err(Error::Rejected)));
            Ok(())
        });

        assert!(outer.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_panicking_trial_reopens_instead_of_sticking() {
        let cb = fast_breaker(1);
        let _ = cb.call(|| Err::<(), _>("e"));
        std::thread::sleep(Duration::from_millis(60));

        let unwound = catch_unwind(AssertUnwindSafe(|| {
            let _ = cb.call(|| -> Result<(), &str> { panic!("classifier blew up") });
        }));
        assert!(unwound.is_err());

        let snapshot = cb.snapshot();
        assert_eq!(snapshot.status, CircuitState::Open);
        assert_eq!(snapshot.last_error.as_deref(), Some("guarded call panicked"));

        // A fresh trial is admitted once the restarted window elapses.
        std::thread::sleep(Duration::from_millis(60));
        let result: Result<(), Error<&str>> = cb.call(|| Ok(()));
        assert!(result.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_panic_while_closed_counts_as_failure() {
        let cb = fast_breaker(2);

        let unwound = catch_unwind(AssertUnwindSafe(|| {
            let _ = cb.call(|| -> Result<(), &str> { panic!("boom") });
        }));

        assert!(unwound.is_err());
        assert_eq!(cb.snapshot().consecutive_failures, 1);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_stale_success_does_not_close_half_open() {
        use std::sync::mpsc::channel;

        let cb = &fast_breaker(1);
        let (admitted_tx, admitted_rx) = channel();
        let (finish_tx, finish_rx) = channel::<()>();
        let (trial_tx, trial_rx) = channel();
        let (release_tx, release_rx) = channel::<()>();

        std::thread::scope(|scope| {
            // Admitted while closed, finishes while the trial is running.
            let stale = scope.spawn(move || {
                cb.call(move || {
                    admitted_tx.send(()).unwrap();
                    finish_rx.recv().unwrap();
                    Ok::<(), &str>(())
                })
            });
            admitted_rx.recv().unwrap();

            let _ = cb.call(|| Err::<(), _>("opens"));
            std::thread::sleep(Duration::from_millis(60));

            let trial = scope.spawn(move || {
                cb.call(move || {
                    trial_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok::<(), &str>(())
                })
            });
            trial_rx.recv().unwrap();
            assert_eq!(cb.state(), CircuitState::HalfOpen);

            finish_tx.send(()).unwrap();
            assert!(stale.join().unwrap().is_ok());
            assert_eq!(cb.state(), CircuitState::HalfOpen);

            release_tx.send(()).unwrap();
            assert!(trial.join().unwrap().is_ok());
            assert_eq!(cb.state(), CircuitState::Closed);
        });
    }

    #[test]
    fn test_stale_outcomes_leave_trial_in_charge() {
        let cb = fast_breaker(1);

        let stale_success: Result<(), Error<&str>> = cb.call(|| {
            let stale_failure: Result<(), Error<&str>> = cb.call(|| {
                let _ = cb.call(|| Err::<(), _>("opens"));
                std::thread::sleep(Duration::from_millis(60));

                // The trial is granted here and fails; the two stale
                // outcomes recorded afterwards must not touch the state.
                let trial = cb.call(|| Err::<(), _>("trial failed"));
                assert!(matches!(trial, Err(Error::Inner("trial failed"))));
                assert_eq!(cb.state(), CircuitState::Open);
                Err("stale failure")
            });
            assert!(matches!(stale_failure, Err(Error::Inner("stale failure"))));
            Ok(())
        });

        assert!(stale_success.is_ok());
        let snapshot = cb.snapshot();
        assert_eq!(snapshot.status, CircuitState::Open);
        assert_eq!(snapshot.last_error.as_deref(), Some("stale failure"));

        // Still rejecting: the stale success did not close it.
        let result = cb.call(|| Ok::<(), &str>(()));
        assert!(matches!(result, Err(Error::Rejected)));
    }

    #[test]
    fn test_stale_failure_does_not_reopen_after_recovery() {
        let cb = fast_breaker(1);

        let stale: Result<(), Error<&str>> = cb.call(|| {
            let _ = cb.call(|| Err::<(), _>("opens"));
            std::thread::sleep(Duration::from_millis(60));

            let trial: Result<(), Error<&str>> = cb.call(|| {
                assert_eq!(cb.state(), CircuitState::HalfOpen);
                Ok(())
            });
            assert!(trial.is_ok());
            Err("slow failure from before the trial")
        });

        assert!(stale.is_err());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn test_concurrent_failures_open_once() {
        use std::sync::Arc;

        let cb = Arc::new(fast_breaker(4));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = Arc::clone(&cb);
                std::thread::spawn(move || {
                    let _ = cb.call(|| Err::<(), _>("e"));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = cb.snapshot();
        assert_eq!(snapshot.status, CircuitState::Open);
        assert!(snapshot.consecutive_failures >= 4);
    }
}
