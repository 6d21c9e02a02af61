//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;

/// Configuration for syncing one context against a server.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the REST collection, e.g. `https://host/api/entities`.
    pub base_url: String,
    /// URL of the push endpoint.
    pub push_url: String,
    /// Interval of the periodic pass.
    pub periodic_interval: Duration,
    /// Timeout of a single remote call.
    pub request_timeout: Duration,
    /// Number of inbound live frames buffered before the reader blocks.
    pub live_buffer: usize,
    /// Pause between closing and reopening the live channel.
    pub reconnect_delay: Duration,
    /// Backoff after a failed pass.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration for a server.
    pub fn new(base_url: impl Into<String>, push_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            push_url: push_url.into(),
            periodic_interval: Duration::from_secs(15 * 60),
            request_timeout: Duration::from_secs(30),
            live_buffer: 256,
            reconnect_delay: Duration::from_millis(500),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the periodic pass interval.
    pub fn with_periodic_interval(mut self, interval: Duration) -> Self {
        self.periodic_interval = interval;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the live frame buffer size. Zero is raised to one.
    pub fn with_live_buffer(mut self, frames: usize) -> Self {
        self.live_buffer = frames.max(1);
        self
    }

    /// Sets the reconnect settle delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}

/// Backoff applied by the scheduler after a failed pass.
///
/// Failed passes are retried indefinitely; only the spacing grows.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Lower bound on any retry delay.
    pub min_interval: Duration,
    /// Whether to add up to 25% random jitter.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a configuration with the default schedule.
    pub fn new() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(30 * 60),
            backoff_multiplier: 2.0,
            min_interval: Duration::from_secs(10),
            add_jitter: true,
        }
    }

    /// Creates a configuration that retries immediately.
    ///
    /// Meant for tests.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            min_interval: Duration::ZERO,
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

    /// Sets the minimum retry interval.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Calculates the delay before retrying after `attempt` consecutive
    /// failures. Attempt 0 means no failure yet.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let mut delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter && delay_secs > 0.0 {
            delay_secs += delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
        }

        Duration::from_secs_f64(delay_secs).max(self.min_interval)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_defaults() {
        let config = SyncConfig::new("http://localhost/api/games", "ws://localhost");
        assert_eq!(config.periodic_interval, Duration::from_secs(900));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.live_buffer, 256);
    }

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::default()
            .with_periodic_interval(Duration::from_secs(60))
            .with_live_buffer(0)
            .with_retry(RetryConfig::immediate());
        assert_eq!(config.periodic_interval, Duration::from_secs(60));
        assert_eq!(config.live_buffer, 1);
        assert_eq!(config.retry.min_interval, Duration::ZERO);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new()
            .with_initial_delay(Duration::from_secs(10))
            .with_backoff_multiplier(2.0)
            .with_min_interval(Duration::ZERO)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(10));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(20));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(40));
    }

    #[test]
    fn retry_delay_is_capped() {
        let config = RetryConfig::new()
            .with_max_delay(Duration::from_secs(60))
            .with_jitter(false);
        assert_eq!(config.delay_for_attempt(30), Duration::from_secs(60));
    }

    #[test]
    fn retry_delay_respects_min_interval() {
        let config = RetryConfig::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_min_interval(Duration::from_secs(10))
            .with_jitter(false);
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_within_quarter() {
        let config = RetryConfig::new().with_jitter(true);
        for _ in 0..50 {
            let delay = config.delay_for_attempt(1);
            assert!(delay >= Duration::from_secs(10));
            assert!(delay <= Duration::from_secs_f64(12.5));
        }
    }
}
