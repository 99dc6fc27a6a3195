// ABOUTME: Circuit breaker strategy that fails fast once an operation keeps failing
// ABOUTME: Half-open state admits exactly one trial call before closing or reopening

use crate::{ErrorPredicate, Operation};
use codeatlas_core::{CodeAtlasError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - requests allowed
    Closed,
    /// Testing if the operation recovered - single request allowed
    HalfOpen,
    /// Failing - requests rejected until the reset timeout elapses
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::HalfOpen => write!(f, "Half-Open"),
            CircuitState::Open => write!(f, "Open"),
        }
    }
}

#[derive(Clone)]
pub struct CircuitBreakerOptions {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    /// Which errors count towards opening; `None` counts every error
    pub is_failure: Option<ErrorPredicate>,
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            is_failure: None,
        }
    }
}

impl std::fmt::Debug for CircuitBreakerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerOptions")
            .field("failure_threshold", &self.failure_threshold)
            .field("reset_timeout", &self.reset_timeout)
            .field("is_failure", &self.is_failure.is_some())
            .finish()
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreakerStrategy {
    options: CircuitBreakerOptions,
    inner: Mutex<BreakerState>,
}

/// Releases the half-open trial slot if the trial future is dropped
/// before it reports an outcome.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreakerStrategy,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.breaker.inner.lock();
            inner.trial_in_flight = false;
            debug!("Half-open trial abandoned, slot released");
        }
    }
}

impl CircuitBreakerStrategy {
    pub fn new(options: CircuitBreakerOptions) -> Self {
        Self {
            options,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Current state. An open circuit whose reset timeout has elapsed is
    /// reported as half-open even before the next call arrives.
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock();
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(at)) if at.elapsed() >= self.options.reset_timeout => {
                CircuitState::HalfOpen
            }
            (state, _) => state,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Reset the circuit breaker to initial state
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
        info!("Circuit breaker reset to initial state");
    }

    fn counts_as_failure(&self, err: &CodeAtlasError) -> bool {
        match &self.options.is_failure {
            Some(pred) => pred(err),
            None => true,
        }
    }

    fn open_error(&self, inner: &BreakerState) -> CodeAtlasError {
        let retry_after = inner
            .opened_at
            .map(|at| self.options.reset_timeout.saturating_sub(at.elapsed()))
            .unwrap_or(Duration::ZERO);
        CodeAtlasError::CircuitOpen {
            failures: inner.consecutive_failures,
            retry_after_ms: retry_after.as_millis() as u64,
        }
    }

    /// Returns whether the admitted call is the half-open trial.
    fn admit(&self) -> Result<bool> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.options.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    info!("Circuit breaker: Open -> Half-Open (testing recovery)");
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    Ok(true)
                } else {
                    debug!("Circuit open, rejecting call");
                    Err(self.open_error(&inner))
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    debug!("Half-open trial already in flight, rejecting call");
                    Err(self.open_error(&inner))
                } else {
                    inner.trial_in_flight = true;
                    Ok(true)
                }
            }
        }
    }

    fn record_success(&self, trial: bool) {
        let mut inner = self.inner.lock();
        if trial {
            info!("Circuit breaker: Half-Open -> Closed (recovered)");
            inner.state = CircuitState::Closed;
            inner.trial_in_flight = false;
            inner.opened_at = None;
            inner.consecutive_failures = 0;
        } else if inner.state == CircuitState::Closed {
            inner.consecutive_failures = 0;
        }
    }

    fn record_failure(&self, err: &CodeAtlasError, trial: bool) {
        let qualifies = self.counts_as_failure(err);
        let mut inner = self.inner.lock();
        if trial {
            inner.trial_in_flight = false;
            if qualifies {
                warn!("Circuit breaker: Half-Open -> Open (trial failed: {})", err);
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            return;
        }

        if inner.state != CircuitState::Closed || !qualifies {
            return;
        }
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.options.failure_threshold {
            warn!(
                "Circuit breaker: Closed -> Open ({} consecutive failures)",
                inner.consecutive_failures
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    pub(crate) async fn run<'a, T>(&self, op: Operation<'a, T>) -> Result<T> {
        let trial = self.admit()?;
        let mut guard = TrialGuard {
            breaker: self,
            armed: trial,
        };
        let result = op().await;
        guard.armed = false;
        match &result {
            Ok(_) => self.record_success(trial),
            Err(err) => self.record_failure(err, trial),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn breaker(threshold: u32, reset: Duration) -> CircuitBreakerStrategy {
        CircuitBreakerStrategy::new(CircuitBreakerOptions {
            failure_threshold: threshold,
            reset_timeout: reset,
            is_failure: None,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_opens_after_failures() {
        let cb = breaker(3, Duration::from_secs(10));
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let failing = operation(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(CodeAtlasError::Parse("boom".into()))
        });

        for _ in 0..3 {
            assert!(matches!(
                cb.run(failing.clone()).await,
                Err(CodeAtlasError::Parse(_))
            ));
        }
        assert_eq!(cb.state(), CircuitState::Open);

        let err = cb.run(failing.clone()).await.unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 3, "open circuit must not invoke the operation");
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_trial() {
        let cb = Arc::new(breaker(1, Duration::from_secs(5)));
        let _ = cb
            .run(operation(|| async { Err::<(), _>(CodeAtlasError::Parse("x".into())) }))
            .await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let trial_cb = cb.clone();
        let trial = tokio::spawn(async move {
            trial_cb
                .run(operation(|| async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, CodeAtlasError>(7)
                }))
                .await
        });
        tokio::task::yield_now().await;

        let rejected = cb.run(operation(|| async { Ok::<_, CodeAtlasError>(1) })).await;
        assert!(rejected.unwrap_err().is_circuit_open());

        assert_eq!(trial.await.unwrap().unwrap(), 7);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.run(operation(|| async { Ok::<_, CodeAtlasError>(1) })).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens() {
        let cb = breaker(1, Duration::from_secs(1));
        let fail = operation(|| async { Err::<(), _>(CodeAtlasError::Parse("x".into())) });
        let _ = cb.run(fail.clone()).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        let _ = cb.run(fail.clone()).await;
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.run(fail).await.unwrap_err().is_circuit_open());
    }

    #[tokio::test]
    async fn test_non_qualifying_errors_do_not_count() {
        let cb = CircuitBreakerStrategy::new(CircuitBreakerOptions {
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(60),
            is_failure: Some(Arc::new(|e: &CodeAtlasError| e.is_transient())),
        });
        let _ = cb
            .run(operation(|| async { Err::<(), _>(CodeAtlasError::Parse("x".into())) }))
            .await;
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = breaker(3, Duration::from_secs(60));
        let fail = operation(|| async { Err::<(), _>(CodeAtlasError::Parse("x".into())) });
        let _ = cb.run(fail.clone()).await;
        let _ = cb.run(fail.clone()).await;
        assert_eq!(cb.consecutive_failures(), 2);
        cb.run(operation(|| async { Ok::<_, CodeAtlasError>(()) }))
            .await
            .unwrap();
        assert_eq!(cb.consecutive_failures(), 0);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
