//! Background queue polling.

use crate::config::{RetryConfig, SyncConfig};
use crate::error::SyncResult;
use crate::queue::{drain, DrainStats, QueueWorker, WorkQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// Drains a queue through a worker on a fixed interval.
///
/// Workers are synchronous, so each batch runs on the blocking pool.
pub struct QueuePoller<T> {
    queue: Arc<dyn WorkQueue<T>>,
    worker: Arc<dyn QueueWorker<T>>,
    retry: RetryConfig,
    interval: Duration,
    batch_size: usize,
}

impl<T: Send + 'static> QueuePoller<T> {
    /// Creates a poller with the default configuration.
    pub fn new(queue: Arc<dyn WorkQueue<T>>, worker: Arc<dyn QueueWorker<T>>) -> Self {
        Self::from_config(queue, worker, &SyncConfig::default())
    }

    /// Creates a poller using the configured interval, batch size and retries.
    pub fn from_config(
        queue: Arc<dyn WorkQueue<T>>,
        worker: Arc<dyn QueueWorker<T>>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            queue,
            worker,
            retry: config.retry.clone(),
            interval: config.poll_interval,
            batch_size: config.worker_batch_size.max(1),
        }
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the poll interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the maximum items per tick.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Runs one batch on the current thread.
    pub fn poll_once(&self) -> SyncResult<DrainStats> {
        drain(
            self.queue.as_ref(),
            self.worker.as_ref(),
            &self.retry,
            self.batch_size,
        )
    }

    /// Polls until `shutdown` turns true or its sender is dropped.
    ///
    /// Returns the accumulated counters.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> DrainStats {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut total = DrainStats::default();
        info!(interval_ms = self.interval.as_millis() as u64, "Queue poller started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    let queue = Arc::clone(&self.queue);
                    let worker = Arc::clone(&self.worker);
                    let retry = self.retry.clone();
                    let batch_size = self.batch_size;
                    let result = tokio::task::spawn_blocking(move || {
                        drain(queue.as_ref(), worker.as_ref(), &retry, batch_size)
                    })
                    .await;
                    match result {
                        Ok(Ok(stats)) => {
                            if stats.processed() > 0 {
                                debug!(processed = stats.processed(), "Poll tick");
                            }
                            total.merge(stats);
                        }
                        Ok(Err(e)) => error!(error = %e, "Queue batch failed"),
                        Err(e) => error!(error = %e, "Queue batch panicked"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(
            succeeded = total.succeeded,
            retried = total.retried,
            dropped = total.dropped,
            "Queue poller stopped"
        );
        total
    }
}

impl<T> std::fmt::Debug for QueuePoller<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuePoller")
            .field("retry", &self.retry)
            .field("interval", &self.interval)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{MemoryQueue, QueueItem, WorkOutcome};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<u32>>);

    impl QueueWorker<u32> for Collect {
        fn process(&self, item: &QueueItem<u32>) -> WorkOutcome {
            self.0.lock().push(item.payload);
            WorkOutcome::Success
        }
    }

    #[tokio::test]
    async fn drains_until_shutdown() {
        let queue = Arc::new(MemoryQueue::new());
        for n in 0..5u32 {
            queue.push(n).unwrap();
        }
        let worker = Arc::new(Collect::default());
        let poller = QueuePoller::new(queue.clone(), worker.clone())
            .with_interval(Duration::from_millis(5))
            .with_batch_size(2);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(poller.run(rx));
        for _ in 0..200 {
            if queue.is_empty().unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();

        let stats = handle.await.unwrap();
        assert_eq!(stats.succeeded, 5);
        assert_eq!(*worker.0.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn stops_when_sender_dropped() {
        let queue: Arc<MemoryQueue<u32>> = Arc::new(MemoryQueue::new());
        let poller = QueuePoller::new(queue, Arc::new(Collect::default()))
            .with_interval(Duration::from_millis(5));
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let stats = poller.run(rx).await;
        assert_eq!(stats.processed(), 0);
    }

    #[test]
    fn config_drives_interval_and_batch() {
        let queue = Arc::new(MemoryQueue::new());
        for n in 0..5u32 {
            queue.push(n).unwrap();
        }
        let config = SyncConfig::default()
            .with_worker_batch_size(3)
            .with_poll_interval(Duration::from_millis(20));
        let poller = QueuePoller::from_config(queue.clone(), Arc::new(Collect::default()), &config);

        assert_eq!(poller.interval, Duration::from_millis(20));
        assert_eq!(poller.poll_once().unwrap().succeeded, 3);
        assert_eq!(queue.len().unwrap(), 2);
    }

    #[test]
    fn poll_once_respects_batch_size() {
        let queue = Arc::new(MemoryQueue::new());
        for n in 0..3u32 {
            queue.push(n).unwrap();
        }
        let poller = QueuePoller::new(queue.clone(), Arc::new(Collect::default())).with_batch_size(2);
        assert_eq!(poller.poll_once().unwrap().succeeded, 2);
        assert_eq!(queue.len().unwrap(), 1);
    }
}
