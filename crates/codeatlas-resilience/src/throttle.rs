use crate::Operation;
use codeatlas_core::Result;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ThrottleOptions {
    /// Calls admitted per window; 0 disables throttling
    pub rate_limit: usize,
    pub window: Duration,
}

impl Default for ThrottleOptions {
    fn default() -> Self {
        Self {
            rate_limit: 100,
            window: Duration::from_secs(1),
        }
    }
}

/// Sliding-window rate limiter over call start instants.
#[derive(Debug)]
pub struct ThrottleStrategy {
    options: ThrottleOptions,
    starts: Mutex<VecDeque<Instant>>,
}

impl ThrottleStrategy {
    pub fn new(options: ThrottleOptions) -> Self {
        Self {
            starts: Mutex::new(VecDeque::with_capacity(options.rate_limit)),
            options,
        }
    }

    pub fn options(&self) -> &ThrottleOptions {
        &self.options
    }

    /// Calls started within the current window.
    pub fn in_window(&self) -> usize {
        let mut starts = self.starts.lock();
        Self::prune(&mut starts, Instant::now(), self.options.window);
        starts.len()
    }

    fn prune(starts: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(front) = starts.front() {
            if now.duration_since(*front) >= window {
                starts.pop_front();
            } else {
                break;
            }
        }
    }

    /// Returns how long to wait, or records the slot and returns `None`.
    fn try_admit(&self) -> Option<Duration> {
        let mut starts = self.starts.lock();
        let now = Instant::now();
        Self::prune(&mut starts, now, self.options.window);
        if starts.len() < self.options.rate_limit {
            starts.push_back(now);
            return None;
        }
        starts
            .front()
            .map(|oldest| (*oldest + self.options.window).saturating_duration_since(now))
    }

    async fn acquire(&self) {
        if self.options.rate_limit == 0 {
            return;
        }
        while let Some(wait) = self.try_admit() {
            debug!("Rate limit of {} reached, waiting {:?}", self.options.rate_limit, wait);
            tokio::time::sleep(wait).await;
        }
    }

    pub(crate) async fn run<'a, T>(&self, op: Operation<'a, T>) -> Result<T> {
        self.acquire().await;
        op().await
    }
}
