use super::types::*;
use super::utils::*;
use crate::core::errors::{ConfigError, FetchErrorKind};
use std::time::Duration;

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_policy: BackoffPolicy::Exponential { factor: 2.0 },
            jitter: 0.1,
            max_retry_after: Duration::from_secs(15 * 60),
            conditions: Vec::new(),
        }
    }
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, category: RetryCategory) -> usize {
        self.total_retries += 1;
        let count = self.counts.entry(category).or_insert(0);
        *count += 1;
        *count
    }
}

impl RetryCondition {
    pub fn status(code: u16, category: RetryCategory) -> Self {
        Self::StatusCode { code, category }
    }

    pub fn content(pattern: impl Into<String>, is_regex: bool, category: RetryCategory) -> Self {
        Self::Content {
            condition: ContentRetryCondition {
                pattern: pattern.into(),
                is_regex,
            },
            category,
        }
    }

    pub fn category(&self) -> &RetryCategory {
        match self {
            Self::StatusCode { category, .. } | Self::Content { category, .. } => category,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delays(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.backoff_policy = policy;
        self
    }

    pub fn with_jitter(mut self, jitter: f32) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_retry_after(mut self, max_retry_after: Duration) -> Self {
        self.max_retry_after = max_retry_after;
        self
    }

    pub fn with_condition(mut self, condition: RetryCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::InvalidValue {
                key: "jitter".to_string(),
                value: self.jitter.to_string(),
            });
        }
        Ok(())
    }

    /// Checks the configured extra conditions against a response that
    /// otherwise looked usable.
    pub fn match_conditions(&self, status: u16, content: &str) -> Option<FetchErrorKind> {
        self.conditions
            .iter()
            .find(|condition| retry_condition_should_apply(condition, status, content))
            .map(|condition| FetchErrorKind::BotDetected {
                category: condition.category().clone(),
                status,
            })
    }

    /// Base backoff before retry number `retry` (0-based), jitter excluded.
    pub fn calculate_delay(&self, retry: usize) -> Duration {
        calculate_delay(self, retry)
    }

    /// The error's retry-after hint, capped at `max_retry_after`.
    pub fn retry_after_hint(&self, error: &FetchErrorKind) -> Option<Duration> {
        error
            .retry_after()
            .map(|hint| hint.min(self.max_retry_after))
    }

    /// Delay to sleep after failed attempt number `attempt` (1-based), or
    /// `None` when the error is permanent or the attempts are used up.
    pub fn next_delay(&self, error: &FetchErrorKind, attempt: usize) -> Option<Duration> {
        if !error.is_retriable() || attempt >= self.max_attempts {
            return None;
        }

        let base = self.calculate_delay(attempt.saturating_sub(1));
        let delay = apply_jitter(base, self.jitter, self.max_delay);
        Some(match self.retry_after_hint(error) {
            Some(hint) => delay.max(hint),
            None => delay,
        })
    }
}
