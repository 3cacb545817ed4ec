mod r#impl;
mod types;
mod utils;

pub use types::{
    BackoffPolicy, ContentRetryCondition, RetryCategory, RetryCondition, RetryConfig, RetryState,
};
pub use utils::{apply_jitter, calculate_delay, check_content_condition, parse_retry_after};
