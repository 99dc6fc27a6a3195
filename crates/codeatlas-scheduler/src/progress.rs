use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::info;

/// Progress after a completed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub processed: usize,
    pub total: usize,
    pub cache_hits: usize,
    pub failures: usize,
    pub batch: usize,
    pub batches: usize,
}

impl ProgressUpdate {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.processed as f64 * 100.0 / self.total as f64
        }
    }
}

pub type ProgressObserver = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Rate-limited progress logging plus an optional observer callback.
pub(crate) struct ProgressReporter {
    enabled: bool,
    interval: Duration,
    last_logged: Option<Instant>,
    observer: Option<ProgressObserver>,
}

impl ProgressReporter {
    pub(crate) fn new(enabled: bool, interval: Duration, observer: Option<ProgressObserver>) -> Self {
        Self {
            enabled,
            interval,
            last_logged: None,
            observer,
        }
    }

    pub(crate) fn report(&mut self, update: ProgressUpdate, last: bool) {
        if let Some(observer) = &self.observer {
            observer(update);
        }
        if !self.enabled {
            return;
        }

        let now = Instant::now();
        let due = self
            .last_logged
            .map_or(true, |at| now.duration_since(at) >= self.interval);
        if due || last {
            info!(
                "Progress: {}/{} files ({:.1}%), batch {}/{}, {} cached, {} failed",
                update.processed,
                update.total,
                update.percent(),
                update.batch,
                update.batches,
                update.cache_hits,
                update.failures
            );
            self.last_logged = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_observer_sees_every_update() {
        let recorder = Arc::new(Mutex::new(Vec::<ProgressUpdate>::new()));
        let sink = recorder.clone();
        let observer: ProgressObserver = Arc::new(move |u: ProgressUpdate| sink.lock().unwrap().push(u));
        let mut reporter = ProgressReporter::new(false, Duration::from_secs(1), Some(observer));

        for batch in 1..=3 {
            reporter.report(
                ProgressUpdate {
                    processed: batch * 2,
                    total: 6,
                    batch,
                    batches: 3,
                    ..ProgressUpdate::default()
                },
                batch == 3,
            );
        }

        let seen = recorder.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2].percent(), 100.0);
    }
}
