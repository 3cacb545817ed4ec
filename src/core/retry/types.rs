use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ContentRetryCondition {
    pub pattern: String,
    pub is_regex: bool,
}

/// Extra retry triggers on top of the built-in status classification.
#[derive(Debug, Clone)]
pub enum RetryCondition {
    StatusCode {
        code: u16,
        category: RetryCategory,
    },
    Content {
        condition: ContentRetryCondition,
        category: RetryCategory,
    },
}

#[derive(Debug, Clone, Copy)]
pub enum BackoffPolicy {
    Constant,
    Linear,
    Exponential { factor: f32 },
}

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize)]
pub enum RetryCategory {
    RateLimit,      // 429, 503 with Retry-After, vendor quota errors
    ServerError,    // 500-599
    Timeout,        // attempt deadline or 408
    Network,        // connection refused/reset
    BotDetection,   // captchas, "unusual traffic" pages
    Custom(String), // Custom category
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts per target, first try included.
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_policy: BackoffPolicy,
    /// Fraction of the base delay added as random jitter (0.0 disables it).
    pub jitter: f32,
    /// Upper bound on a server's retry-after hint.
    pub max_retry_after: Duration,
    pub conditions: Vec<RetryCondition>,
}

/// Retry bookkeeping for a single target.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub counts: HashMap<RetryCategory, usize>,
    pub total_retries: usize,
}
