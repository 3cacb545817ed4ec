//! Request spacing per rate-limit key.
//!
//! A [`RateBudget`] owns the earliest instant at which the next request for
//! its key may be dispatched. Workers reserve slots on it before every
//! attempt; server back-pressure (`Retry-After`) pushes the instant forward.

mod budget;

pub use budget::RateBudget;

use crate::core::ConfigError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How requests are spaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatePolicy {
    /// At least this much time between two dispatches.
    MinInterval(Duration),
    /// At most `requests` dispatches per `interval`, spread evenly.
    PerInterval { requests: u32, interval: Duration },
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self::MinInterval(Duration::from_secs(1))
    }
}

impl RatePolicy {
    pub fn min_spacing(&self) -> Result<Duration, ConfigError> {
        match *self {
            Self::MinInterval(spacing) => Ok(spacing),
            Self::PerInterval { requests, interval } => {
                if requests == 0 || interval.is_zero() {
                    return Err(ConfigError::ZeroRate);
                }
                Ok(interval / requests)
            }
        }
    }
}

/// Grouping under which spacing is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateKeying {
    /// One budget for every request.
    #[default]
    Global,
    /// One budget per proxy endpoint; direct requests share one.
    PerProxy,
    /// One budget per destination host.
    PerHost,
}

impl FromStr for RateKeying {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(Self::Global),
            "proxy" | "per-proxy" => Ok(Self::PerProxy),
            "host" | "per-host" => Ok(Self::PerHost),
            _ => Err(ConfigError::InvalidValue {
                key: "rate key".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RateKey(String);

impl RateKey {
    pub const GLOBAL: &'static str = "global";
    pub const DIRECT: &'static str = "direct";

    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn global() -> Self {
        Self::new(Self::GLOBAL)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
