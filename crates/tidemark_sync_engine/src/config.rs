//! Engine configuration.

use rand::Rng;
use std::time::Duration;
use tidemark_sync_protocol::PROTOCOL_VERSION;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Principal (user/account) whose data is synchronized.
    pub principal_id: String,
    /// Device ID (stable per installation).
    pub device_id: String,
    /// Server URL.
    pub server_url: String,
    /// Protocol version.
    pub protocol_version: u16,
    /// Retry configuration for `sync_with_retry`.
    pub retry: RetryConfig,
    /// Request timeout.
    pub timeout: Duration,
    /// Coalesce queued changes of the same entity.
    pub coalesce_pending: bool,
}

impl SyncConfig {
    /// Configuration for one device of one principal.
    pub fn new(
        principal_id: impl Into<String>,
        device_id: impl Into<String>,
        server_url: impl Into<String>,
    ) -> Self {
        Self {
            principal_id: principal_id.into(),
            device_id: device_id.into(),
            server_url: server_url.into(),
            protocol_version: PROTOCOL_VERSION,
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(30),
            coalesce_pending: false,
        }
    }

    /// Generates a fresh random device identifier.
    pub fn generate_device_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Selects the protocol version sent with every request.
    pub fn with_protocol_version(mut self, version: u16) -> Self {
        self.protocol_version = version;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enables or disables coalescing of pending changes.
    pub fn with_coalesce_pending(mut self, coalesce: bool) -> Self {
        self.coalesce_pending = coalesce;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("", Self::generate_device_id(), "")
    }
}

/// Backoff policy for [`sync_with_retry`].
///
/// Attempt `n` (1-based, after the first failure) waits
/// `initial_delay * backoff_multiplier^(n-1)`, capped at `max_delay`, plus
/// up to a quarter of that again when jitter is on.
///
/// [`sync_with_retry`]: crate::RepositorySyncOrchestrator::sync_with_retry
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total cycles tried, the first one included.
    pub max_attempts: u32,
    /// Wait before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for a single wait, before jitter.
    pub max_delay: Duration,
    /// Growth factor between consecutive waits.
    pub backoff_multiplier: f64,
    /// Randomize waits so devices do not retry in lockstep.
    pub add_jitter: bool,
}

const JITTER_FRACTION: f64 = 0.25;

impl RetryConfig {
    /// Policy with `max_attempts` attempts and default backoff.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// A single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
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

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Returns true if more than one attempt is allowed.
    pub fn allows_retry(&self) -> bool {
        self.max_attempts > 1
    }

    /// Wait before attempt `attempt`; attempt 0 is the initial try.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let Some(exponent) = attempt.checked_sub(1) else {
            return Duration::ZERO;
        };
        let exponent = i32::try_from(exponent).unwrap_or(i32::MAX);
        let cap = self.max_delay.as_secs_f64();
        let base = (self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent))
            .min(cap)
            .max(0.0);

        let factor = if self.add_jitter {
            1.0 + rand::thread_rng().gen_range(0.0..=JITTER_FRACTION)
        } else {
            1.0
        };
        Duration::from_secs_f64(base * factor)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
