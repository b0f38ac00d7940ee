//! Configuration for the sync engine.

use std::time::Duration;
use uuid::Uuid;

/// Configuration for one syndicating repository.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Client UUID (unique per repository, used as CDF origin and initiator).
    pub client_uuid: Uuid,
    /// Human-readable client name.
    pub client_name: String,
    /// Hub URL; empty means not connected.
    pub hub_url: String,
    /// Webhook registration UUID used for interest lists.
    pub webhook_uuid: Option<Uuid>,
    /// URL the hub delivers webhook notifications to.
    pub webhook_url: Option<String>,
    /// Maximum UUIDs fetched from the hub per request.
    pub fetch_batch_size: usize,
    /// Maximum items a worker processes per run.
    pub worker_batch_size: usize,
    /// Maximum UUIDs sent per interest list request.
    pub interest_batch_size: usize,
    /// Maximum fetch rounds while assembling a dependency closure.
    pub max_closure_rounds: usize,
    /// Ingestion loop cap; `None` means document size plus one.
    pub max_ingest_iterations: Option<usize>,
    /// How long a claimed work item stays invisible to other workers.
    pub visibility_timeout: Duration,
    /// Queue poll interval for background workers.
    pub poll_interval: Duration,
    /// Retry configuration for work items.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(client_uuid: Uuid, client_name: impl Into<String>, hub_url: impl Into<String>) -> Self {
        Self {
            client_uuid,
            client_name: client_name.into(),
            hub_url: hub_url.into(),
            webhook_uuid: None,
            webhook_url: None,
            fetch_batch_size: 50,
            worker_batch_size: 10,
            interest_batch_size: 50,
            max_closure_rounds: 20,
            max_ingest_iterations: None,
            visibility_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the webhook registration.
    pub fn with_webhook(mut self, webhook_uuid: Uuid, url: impl Into<String>) -> Self {
        self.webhook_uuid = Some(webhook_uuid);
        self.webhook_url = Some(url.into());
        self
    }

    /// Sets the fetch batch size.
    pub fn with_fetch_batch_size(mut self, size: usize) -> Self {
        self.fetch_batch_size = size.max(1);
        self
    }

    /// Sets the worker batch size.
    pub fn with_worker_batch_size(mut self, size: usize) -> Self {
        self.worker_batch_size = size.max(1);
        self
    }

    /// Sets the interest list batch size.
    pub fn with_interest_batch_size(mut self, size: usize) -> Self {
        self.interest_batch_size = size.max(1);
        self
    }

    /// Sets the maximum closure fetch rounds.
    pub fn with_max_closure_rounds(mut self, rounds: usize) -> Self {
        self.max_closure_rounds = rounds.max(1);
        self
    }

    /// Sets a fixed ingestion iteration cap.
    pub fn with_max_ingest_iterations(mut self, iterations: usize) -> Self {
        self.max_ingest_iterations = Some(iterations);
        self
    }

    /// Sets the visibility timeout for claimed work items.
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Returns true if a hub is configured.
    pub fn is_connected(&self) -> bool {
        !self.hub_url.is_empty() && !self.client_uuid.is_nil()
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(Uuid::nil(), "", "")
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts; `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with an attempt limit.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..Self::unlimited()
        }
    }

    /// Creates a configuration that never gives up.
    pub fn unlimited() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: Some(1),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Disables jitter.
    pub fn without_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Returns true if another attempt is allowed after `attempts` have been made.
    pub fn allows_attempt(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts < max)
    }

    /// Calculates the delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% jitter
            let jitter = delay_secs * 0.25 * rand_jitter();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Cheap pseudo-random jitter derived from the clock.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}
