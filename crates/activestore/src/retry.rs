use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub struct RetryBackoffConfig {
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryBackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 5,
            backoff_factor: 2.0,
            max_delay_ms: 200,
            jitter: true,
        }
    }
}

impl RetryBackoffConfig {
    pub fn none() -> Self {
        Self {
            initial_delay_ms: 0,
            backoff_factor: 1.0,
            max_delay_ms: 0,
            jitter: false,
        }
    }
}

/// How often and how patiently a contended update is retried.
///
/// `max_attempts: None` retries until the write lands.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub backoff: RetryBackoffConfig,
}

impl RetryPolicy {
    /// Unbounded, back to back.
    pub fn immediate() -> Self {
        Self {
            max_attempts: None,
            backoff: RetryBackoffConfig::none(),
        }
    }

    /// At most `max_attempts` attempts with the default backoff.
    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            backoff: RetryBackoffConfig::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: RetryBackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based).
    pub fn allows_another(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }

    pub fn delay_after(&self, attempt: u32, jitter_seed: u64) -> Duration {
        Duration::from_millis(delay_for_attempt_ms(attempt, &self.backoff, jitter_seed))
    }
}

pub fn delay_for_attempt_ms(attempt: u32, config: &RetryBackoffConfig, jitter_seed: u64) -> u64 {
    let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let base = (config.initial_delay_ms as f64) * config.backoff_factor.powi(exp);
    let mut delay = base.min(config.max_delay_ms as f64);
    if config.jitter {
        delay *= jitter_factor(attempt, jitter_seed);
    }
    delay.round().max(0.0) as u64
}

fn jitter_factor(attempt: u32, jitter_seed: u64) -> f64 {
    let mut x = jitter_seed ^ ((attempt as u64) << 32) ^ 0x9E3779B97F4A7C15;
    x ^= x >> 12;
    x ^= x << 25;
    x ^= x >> 27;
    let r = x.wrapping_mul(0x2545F4914F6CDD1D);
    let unit = (r as f64) / (u64::MAX as f64);
    0.5 + unit
}
