//! At-least-once work queues and the worker contract.

use crate::config::{RetryConfig, SyncConfig};
use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A claimed work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem<T> {
    /// Queue-assigned id.
    pub id: String,
    /// Item payload.
    pub payload: T,
    /// Number of claims so far, including this one.
    pub attempts: u32,
}

/// A pull-based queue with claim/complete/release semantics.
///
/// A claimed item is invisible to other workers until it is completed,
/// released, or its visibility timeout expires.
pub trait WorkQueue<T>: Send + Sync {
    /// Pushes an item and returns its id.
    fn push(&self, payload: T) -> SyncResult<String>;

    /// Claims the next visible item.
    fn claim(&self) -> SyncResult<Option<QueueItem<T>>>;

    /// Removes a claimed item.
    fn complete(&self, id: &str) -> SyncResult<()>;

    /// Returns a claimed item to the queue, visible again after `delay`.
    fn release(&self, id: &str, delay: Duration) -> SyncResult<()>;

    /// Returns true if the item is still queued or claimed.
    fn contains(&self, id: &str) -> SyncResult<bool>;

    /// Number of queued and claimed items.
    fn len(&self) -> SyncResult<usize>;

    /// Returns true if no items remain.
    fn is_empty(&self) -> SyncResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// Result of processing one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Done; remove the item.
    Success,
    /// Failed; release the item for another attempt.
    Retry(String),
    /// Failed permanently; remove the item.
    Drop(String),
}

impl WorkOutcome {
    /// Maps an error to retry or drop.
    pub fn from_error(error: &SyncError) -> Self {
        if error.is_retryable() {
            WorkOutcome::Retry(error.to_string())
        } else {
            WorkOutcome::Drop(error.to_string())
        }
    }
}

/// Processes items of one queue.
pub trait QueueWorker<T>: Send + Sync {
    /// Processes one item to completion.
    fn process(&self, item: &QueueItem<T>) -> WorkOutcome;
}

/// Counters from draining a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Items completed successfully.
    pub succeeded: usize,
    /// Items released for retry.
    pub retried: usize,
    /// Items removed after a permanent failure or too many attempts.
    pub dropped: usize,
}

impl DrainStats {
    /// Total items handled.
    pub fn processed(&self) -> usize {
        self.succeeded + self.retried + self.dropped
    }

    /// Adds another run's counters.
    pub fn merge(&mut self, other: DrainStats) {
        self.succeeded += other.succeeded;
        self.retried += other.retried;
        self.dropped += other.dropped;
    }
}

/// Claims and processes one item. Returns `None` if nothing was visible.
pub fn process_next<T>(
    queue: &dyn WorkQueue<T>,
    worker: &dyn QueueWorker<T>,
    retry: &RetryConfig,
) -> SyncResult<Option<WorkOutcome>> {
    let Some(item) = queue.claim()? else {
        return Ok(None);
    };
    let outcome = worker.process(&item);
    match &outcome {
        WorkOutcome::Success => queue.complete(&item.id)?,
        WorkOutcome::Retry(reason) if retry.allows_attempt(item.attempts) => {
            let delay = retry.delay_for_attempt(item.attempts);
            warn!(
                item = %item.id,
                attempts = item.attempts,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "Work item released for retry"
            );
            queue.release(&item.id, delay)?;
        }
        WorkOutcome::Retry(reason) => {
            error!(item = %item.id, attempts = item.attempts, reason = %reason, "Work item gave up");
            queue.complete(&item.id)?;
            return Ok(Some(WorkOutcome::Drop(reason.clone())));
        }
        WorkOutcome::Drop(reason) => {
            error!(item = %item.id, reason = %reason, "Work item dropped");
            queue.complete(&item.id)?;
        }
    }
    Ok(Some(outcome))
}

/// Processes up to `limit` items.
pub fn drain<T>(
    queue: &dyn WorkQueue<T>,
    worker: &dyn QueueWorker<T>,
    retry: &RetryConfig,
    limit: usize,
) -> SyncResult<DrainStats> {
    let mut stats = DrainStats::default();
    for _ in 0..limit {
        match process_next(queue, worker, retry)? {
            Some(WorkOutcome::Success) => stats.succeeded += 1,
            Some(WorkOutcome::Retry(_)) => stats.retried += 1,
            Some(WorkOutcome::Drop(_)) => stats.dropped += 1,
            None => break,
        }
    }
    if stats.processed() > 0 {
        info!(
            succeeded = stats.succeeded,
            retried = stats.retried,
            dropped = stats.dropped,
            "Queue batch processed"
        );
    }
    Ok(stats)
}

#[derive(Debug)]
struct Entry<T> {
    id: String,
    payload: T,
    attempts: u32,
    visible_at: Instant,
}

#[derive(Debug)]
struct Inner<T> {
    ready: VecDeque<Entry<T>>,
    claimed: HashMap<String, Entry<T>>,
}

/// In-memory work queue.
#[derive(Debug)]
pub struct MemoryQueue<T> {
    inner: Mutex<Inner<T>>,
    visibility_timeout: Duration,
}

impl<T> MemoryQueue<T> {
    /// Creates a queue with the default visibility timeout.
    pub fn new() -> Self {
        Self::from_config(&SyncConfig::default())
    }

    /// Creates a queue with the configured visibility timeout.
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::with_visibility_timeout(config.visibility_timeout)
    }

    /// Creates a queue with the given visibility timeout.
    pub fn with_visibility_timeout(visibility_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                ready: VecDeque::new(),
                claimed: HashMap::new(),
            }),
            visibility_timeout,
        }
    }

    /// How long a claimed item stays invisible.
    pub fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }
}

impl<T> Default for MemoryQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send> WorkQueue<T> for MemoryQueue<T> {
    fn push(&self, payload: T) -> SyncResult<String> {
        let id = Uuid::new_v4().to_string();
        self.inner.lock().ready.push_back(Entry {
            id: id.clone(),
            payload,
            attempts: 0,
            visible_at: Instant::now(),
        });
        Ok(id)
    }

    fn claim(&self) -> SyncResult<Option<QueueItem<T>>> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired: Vec<String> = inner
            .claimed
            .iter()
            .filter(|(_, entry)| entry.visible_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            if let Some(entry) = inner.claimed.remove(&id) {
                debug!(item = %id, "Visibility timeout expired");
                inner.ready.push_back(entry);
            }
        }

        let Some(position) = inner.ready.iter().position(|e| e.visible_at <= now) else {
            return Ok(None);
        };
        let Some(mut entry) = inner.ready.remove(position) else {
            return Ok(None);
        };
        entry.attempts += 1;
        entry.visible_at = now + self.visibility_timeout;
        let item = QueueItem {
            id: entry.id.clone(),
            payload: entry.payload.clone(),
            attempts: entry.attempts,
        };
        inner.claimed.insert(entry.id.clone(), entry);
        Ok(Some(item))
    }

    fn complete(&self, id: &str) -> SyncResult<()> {
        let mut inner = self.inner.lock();
        if inner.claimed.remove(id).is_none() {
            // The claim expired and the item went back to the ready list.
            inner.ready.retain(|entry| entry.id != id);
        }
        Ok(())
    }

    fn release(&self, id: &str, delay: Duration) -> SyncResult<()> {
        let mut inner = self.inner.lock();
        if let Some(mut entry) = inner.claimed.remove(id) {
            entry.visible_at = Instant::now() + delay;
            inner.ready.push_back(entry);
        }
        Ok(())
    }

    fn contains(&self, id: &str) -> SyncResult<bool> {
        let inner = self.inner.lock();
        Ok(inner.claimed.contains_key(id) || inner.ready.iter().any(|e| e.id == id))
    }

    fn len(&self) -> SyncResult<usize> {
        let inner = self.inner.lock();
        Ok(inner.ready.len() + inner.claimed.len())
    }
}
