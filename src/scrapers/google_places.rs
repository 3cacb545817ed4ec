use async_trait::async_trait;
use log::warn;
use serde::Deserialize;
use url::Url;

use super::{HttpScraper, Scraper};
use crate::core::{ConfigError, FetchErrorKind};
use crate::http::{FetchRequest, FetchResponse, Target, TargetKind};
use crate::proxy::ProxyPool;

pub const GOOGLE_PLACES_BASE_URL: &str = "https://maps.googleapis.com/maps/api/place/";

/// Google Places Web Service: Text Search for queries, Place Details for
/// place ids.
pub struct GooglePlacesScraper {
    http: HttpScraper,
    api_key: String,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct StatusEnvelope {
    status: Option<String>,
    error_message: Option<String>,
}

impl GooglePlacesScraper {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential(
                "GOOGLE_PLACES_API_KEY".to_string(),
            ));
        }
        let base_url = Url::parse(GOOGLE_PLACES_BASE_URL).map_err(|e| ConfigError::InvalidValue {
            key: "google places base url".to_string(),
            value: e.to_string(),
        })?;

        Ok(Self {
            http: HttpScraper::new()?,
            api_key,
            base_url,
        })
    }

    /// Points the scraper at another host, e.g. a local mock server. The URL
    /// must end with a slash for relative joins to keep its path.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, ConfigError> {
        self.base_url = Url::parse(base_url).map_err(|_| ConfigError::InvalidValue {
            key: "google places base url".to_string(),
            value: base_url.to_string(),
        })?;
        Ok(self)
    }

    pub fn with_proxies(mut self, pool: &ProxyPool) -> Result<Self, ConfigError> {
        self.http = self.http.with_proxies(pool)?;
        Ok(self)
    }

    fn endpoint(&self, path: &str) -> Result<Url, FetchErrorKind> {
        self.base_url
            .join(path)
            .map_err(|e| FetchErrorKind::MalformedTarget(e.to_string()))
    }
}

#[async_trait]
impl Scraper for GooglePlacesScraper {
    fn name(&self) -> &str {
        "google_places"
    }

    fn resolve(&self, target: &Target) -> Result<Url, FetchErrorKind> {
        let value = target.value().trim();
        if value.is_empty() {
            return Err(FetchErrorKind::MalformedTarget(format!(
                "empty {}",
                target
            )));
        }

        let mut url = match target.kind() {
            TargetKind::Query => {
                let mut url = self.endpoint("textsearch/json")?;
                url.query_pairs_mut().append_pair("query", value);
                url
            }
            TargetKind::PlaceId => {
                let mut url = self.endpoint("details/json")?;
                url.query_pairs_mut().append_pair("place_id", value);
                url
            }
            TargetKind::Url | TargetKind::Domain => {
                return Err(FetchErrorKind::MalformedTarget(format!(
                    "google places cannot fetch {}",
                    target
                )))
            }
        };
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchErrorKind> {
        self.http.execute(request).await
    }

    fn classify(&self, response: &FetchResponse) -> Option<FetchErrorKind> {
        let envelope: StatusEnvelope = serde_json::from_str(&response.decoded_body).ok()?;
        let status = envelope.status?;
        let error = match status.as_str() {
            "OK" | "ZERO_RESULTS" => return None,
            "OVER_QUERY_LIMIT" => FetchErrorKind::RateLimited {
                status: response.status,
                retry_after: response.retry_after(),
            },
            "REQUEST_DENIED" => FetchErrorKind::Unauthorized(response.status),
            "INVALID_REQUEST" => FetchErrorKind::MalformedTarget(format!(
                "{} rejected as invalid",
                response.target
            )),
            "NOT_FOUND" => FetchErrorKind::NotFound(response.status),
            "UNKNOWN_ERROR" => FetchErrorKind::ServerError(response.status),
            _ => return None,
        };

        warn!(
            "Google Places returned {} for {}: {}",
            status,
            response.target,
            envelope.error_message.as_deref().unwrap_or("no message")
        );
        Some(error)
    }
}
