use super::types::*;
use chrono::{DateTime, Utc};
use rand::Rng;
use regex::Regex;
use std::time::Duration;

pub fn check_content_condition(condition: &ContentRetryCondition, content: &str) -> bool {
    if condition.is_regex {
        Regex::new(&condition.pattern)
            .map(|re| re.is_match(content))
            .unwrap_or(false)
    } else {
        content
            .to_lowercase()
            .contains(&condition.pattern.to_lowercase())
    }
}

pub fn retry_condition_should_apply(condition: &RetryCondition, status: u16, content: &str) -> bool {
    match condition {
        RetryCondition::StatusCode { code, .. } => *code == status,
        RetryCondition::Content { condition, .. } => check_content_condition(condition, content),
    }
}

/// Backoff before retry number `retry` (0-based), without jitter.
pub fn calculate_delay(config: &RetryConfig, retry: usize) -> Duration {
    if retry == 0 {
        return std::cmp::min(config.initial_delay, config.max_delay);
    }

    let initial = config.initial_delay.as_secs_f64();
    let secs = match config.backoff_policy {
        BackoffPolicy::Constant => initial,
        BackoffPolicy::Linear => initial * (retry + 1) as f64,
        BackoffPolicy::Exponential { factor } => initial * (factor as f64).powi(retry as i32),
    };

    if !secs.is_finite() || secs >= config.max_delay.as_secs_f64() {
        config.max_delay
    } else {
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Adds up to `ratio * delay` of random jitter, never exceeding `max`.
pub fn apply_jitter(delay: Duration, ratio: f32, max: Duration) -> Duration {
    if ratio <= 0.0 || delay.is_zero() {
        return delay;
    }
    let spread = delay.as_secs_f64() * ratio as f64;
    let extra = rand::thread_rng().gen_range(0.0..=spread);
    std::cmp::min(delay + Duration::from_secs_f64(extra), max)
}

/// Parses a `Retry-After` header: delta-seconds or an HTTP date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let when = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = when.with_timezone(&Utc) - Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}
