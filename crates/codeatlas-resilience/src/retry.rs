use crate::Operation;
use codeatlas_core::{CodeAtlasError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Decides whether an error is worth acting on (retrying, counting).
pub type ErrorPredicate = Arc<dyn Fn(&CodeAtlasError) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct RetryOptions {
    /// Attempts made after the first one
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    /// `None` retries transient errors only, never an open circuit
    pub retryable: Option<ErrorPredicate>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            retryable: None,
        }
    }
}

impl std::fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("max_delay", &self.max_delay)
            .field("retryable", &self.retryable.is_some())
            .finish()
    }
}

#[derive(Debug)]
pub struct RetryStrategy {
    options: RetryOptions,
}

impl RetryStrategy {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    fn is_retryable(&self, err: &CodeAtlasError) -> bool {
        match &self.options.retryable {
            Some(pred) => pred(err),
            None => err.is_transient() && !err.is_circuit_open(),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self
            .options
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        self.options
            .initial_delay
            .mul_f64(factor)
            .min(self.options.max_delay)
    }

    pub(crate) async fn run<'a, T>(&self, op: Operation<'a, T>) -> Result<T> {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("Operation succeeded after {} retries", attempt);
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if attempt >= self.options.max_retries || !self.is_retryable(&err) {
                        if attempt > 0 {
                            warn!("Giving up after {} retries: {}", attempt, err);
                        }
                        return Err(err);
                    }
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    debug!(
                        "Attempt {} failed ({}), retrying in {:?}",
                        attempt, err, delay
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}
