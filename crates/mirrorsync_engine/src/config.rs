//! Configuration for the sync engine.

use mirrorsync_protocol::SyncClientOptions;
use rand::Rng;
use std::time::Duration;

/// Configuration for a [`crate::SyncEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Session options pushed to both peers right after `begin_sync`.
    pub client_options: SyncClientOptions,
    /// Pass limit for [`crate::SyncEngine::run_until_converged`].
    pub max_passes: usize,
    /// Feed issues left unresolved by one pass into the next pass's
    /// correction round.
    pub carry_over_issues: bool,
    /// Retry configuration.
    pub retry: RetryConfig,
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the session options.
    pub fn with_client_options(mut self, options: SyncClientOptions) -> Self {
        self.client_options = options;
        self
    }

    /// Sets the page size.
    pub fn with_items_per_page(mut self, items: usize) -> Self {
        self.client_options = self.client_options.with_items_per_page(items);
        self
    }

    /// Sets the pass limit for run-until-converged.
    pub fn with_max_passes(mut self, passes: usize) -> Self {
        self.max_passes = passes.max(1);
        self
    }

    /// Sets whether unresolved issues carry into the next pass.
    pub fn with_carry_over_issues(mut self, value: bool) -> Self {
        self.carry_over_issues = value;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            client_options: SyncClientOptions::default(),
            max_passes: 5,
            carry_over_issues: true,
            retry: RetryConfig::default(),
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
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
    pub fn with_jitter(mut self, value: bool) -> Self {
        self.add_jitter = value;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.add_jitter && capped > 0.0 {
            let jitter = capped * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(capped + jitter)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
