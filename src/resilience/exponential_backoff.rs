use rand::Rng;
use std::time::Duration;

/// Delay schedule between connection attempts
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Number of delays handed out before giving up
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Scale each delay by a random factor in [0.5, 1.0]
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Schedule for `attempts` connection attempts: one delay between each pair
    pub fn for_connect(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.saturating_sub(1) as usize,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
pub struct ExponentialBackoff {
    current_attempt: usize,
    config: RetryConfig,
}

impl ExponentialBackoff {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            current_attempt: 0,
            config,
        }
    }

    /// Next delay, or None once the schedule is exhausted
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.current_attempt >= self.config.max_attempts {
            return None;
        }
        self.current_attempt += 1;

        let exp = (self.current_attempt - 1) as i32;
        let base_ms = self.config.initial_backoff.as_millis() as f64;
        let max_ms = self.config.max_backoff.as_millis() as f64;
        let capped_ms = (base_ms * self.config.backoff_multiplier.powi(exp)).min(max_ms);

        let delay_ms = if self.config.use_jitter {
            capped_ms * rand::rng().random_range(0.5..=1.0)
        } else {
            capped_ms
        };

        Some(Duration::from_millis(delay_ms as u64))
    }

    pub fn attempts(&self) -> usize {
        self.current_attempt
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}
