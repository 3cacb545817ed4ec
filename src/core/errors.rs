use crate::core::retry::RetryCategory;
use crate::http::Target;
use crate::storage::base::StorageError;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Extraction error: {0}")]
    ExtractionError(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("LLM error: {0}")]
    LlmError(String),
}

pub type ScraperResult<T> = Result<T, ScraperError>;

/// Fatal problems detected before any fetch starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("proxy use is required but the proxy pool is empty")]
    EmptyProxyPool,

    #[error("invalid proxy endpoint {url}: {reason}")]
    InvalidProxy { url: String, reason: String },

    #[error("missing credential {0}")]
    MissingCredential(String),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("rate policy must allow at least one request per non-zero interval")]
    ZeroRate,

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Classification of a single failed attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FetchErrorKind {
    #[error("request timed out")]
    Timeout,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("server error (HTTP {0})")]
    ServerError(u16),

    #[error("rate limited (HTTP {status})")]
    RateLimited {
        status: u16,
        retry_after: Option<Duration>,
    },

    #[error("response matched retry condition {category:?} (HTTP {status})")]
    BotDetected { category: RetryCategory, status: u16 },

    #[error("not found (HTTP {0})")]
    NotFound(u16),

    #[error("authorization rejected (HTTP {0})")]
    Unauthorized(u16),

    #[error("request rejected (HTTP {0})")]
    ClientError(u16),

    #[error("malformed target: {0}")]
    MalformedTarget(String),

    /// The worker serving the target's rate key died before finishing it.
    #[error("fetch worker failed: {0}")]
    WorkerFailed(String),
}

impl FetchErrorKind {
    /// Maps an HTTP status to a failure kind. `None` means the status is a success.
    pub fn from_status(status: u16, retry_after: Option<Duration>) -> Option<Self> {
        match status {
            0..=399 => None,
            404 | 410 => Some(Self::NotFound(status)),
            401 | 403 | 407 => Some(Self::Unauthorized(status)),
            408 => Some(Self::Timeout),
            429 => Some(Self::RateLimited {
                status,
                retry_after,
            }),
            503 if retry_after.is_some() => Some(Self::RateLimited {
                status,
                retry_after,
            }),
            500..=599 => Some(Self::ServerError(status)),
            _ => Some(Self::ClientError(status)),
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::Connection(_)
                | Self::ServerError(_)
                | Self::RateLimited { .. }
                | Self::BotDetected { .. }
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Category used for retry bookkeeping; `None` for permanent kinds.
    pub fn category(&self) -> Option<RetryCategory> {
        match self {
            Self::Timeout => Some(RetryCategory::Timeout),
            Self::Connection(_) => Some(RetryCategory::Network),
            Self::ServerError(_) => Some(RetryCategory::ServerError),
            Self::RateLimited { .. } => Some(RetryCategory::RateLimit),
            Self::BotDetected { category, .. } => Some(category.clone()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchErrorKind {
    /// The request URL is dropped from the message: vendor URLs carry API
    /// keys and access tokens in their query strings.
    fn from(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_builder() {
            Self::MalformedTarget(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), None)
                .unwrap_or_else(|| Self::Connection(err.to_string()))
        } else {
            Self::Connection(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Disposition {
    /// Every allowed attempt failed with a retriable error.
    Exhausted,
    /// A non-retriable error ended the target on its first occurrence.
    Permanent,
}

/// Terminal failure for one target, as yielded by the fetch loop.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{target}: {disposition:?} after {attempts} attempt(s), last error: {last_error}")]
pub struct FetchFailure {
    pub target: Target,
    pub attempts: usize,
    pub last_error: FetchErrorKind,
    pub disposition: Disposition,
}

impl FetchFailure {
    pub fn permanent(target: Target, attempts: usize, last_error: FetchErrorKind) -> Self {
        Self {
            target,
            attempts,
            last_error,
            disposition: Disposition::Permanent,
        }
    }

    pub fn exhausted(target: Target, attempts: usize, last_error: FetchErrorKind) -> Self {
        Self {
            target,
            attempts,
            last_error,
            disposition: Disposition::Exhausted,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.disposition == Disposition::Exhausted
    }
}
