use crate::core::FetchErrorKind;
use crate::proxy::ProxyEndpoint;
use crate::rate_limit::RateKey;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Url,
    Query,
    PlaceId,
    /// A bare website domain, for email lookups.
    Domain,
}

/// Something to fetch: a page URL, a search query, a vendor place id or a
/// website domain.
///
/// The raw value is kept as given so malformed URLs can still be reported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Target {
    kind: TargetKind,
    value: String,
}

impl Target {
    pub fn url(value: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Url,
            value: value.into(),
        }
    }

    pub fn query(value: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Query,
            value: value.into(),
        }
    }

    pub fn place_id(value: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::PlaceId,
            value: value.into(),
        }
    }

    pub fn domain(value: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Domain,
            value: value.into(),
        }
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Parses a `Url` target, accepting only http(s).
    pub fn parse_url(&self) -> Result<Url, FetchErrorKind> {
        if self.kind != TargetKind::Url {
            return Err(FetchErrorKind::MalformedTarget(format!(
                "expected a URL target, got {}",
                self
            )));
        }

        let url = Url::parse(self.value.trim())
            .map_err(|e| FetchErrorKind::MalformedTarget(format!("{}: {}", self.value, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(FetchErrorKind::MalformedTarget(format!(
                "unsupported scheme {} in {}",
                other, self.value
            ))),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            TargetKind::Url => "url",
            TargetKind::Query => "query",
            TargetKind::PlaceId => "place_id",
            TargetKind::Domain => "domain",
        };
        write!(f, "{}:{}", kind, self.value)
    }
}

/// A resolved, ready-to-send attempt for one target.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Position of the target in the loop input.
    pub index: usize,
    pub target: Target,
    pub url: Url,
    pub proxy: Option<ProxyEndpoint>,
    pub rate_key: RateKey,
    pub timeout: Duration,
    /// 1-based attempt number.
    pub attempt: usize,
    pub dispatched_at: Instant,
}

impl FetchRequest {
    pub fn deadline(&self) -> Instant {
        self.dispatched_at + self.timeout
    }
}
