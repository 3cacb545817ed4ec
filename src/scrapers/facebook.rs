use async_trait::async_trait;
use log::warn;
use serde::Deserialize;
use url::Url;

use super::{HttpScraper, Scraper};
use crate::core::{ConfigError, FetchErrorKind};
use crate::http::{FetchRequest, FetchResponse, Target, TargetKind};
use crate::proxy::ProxyPool;

pub const FACEBOOK_GRAPH_URL: &str = "https://graph.facebook.com/v15.0/search";
pub const FACEBOOK_PLACE_FIELDS: &str = "name,category_list,phone,emails,website,link,location";

/// Graph API place search.
pub struct FacebookScraper {
    http: HttpScraper,
    access_token: String,
    search_url: Url,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<GraphError>,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    message: Option<String>,
    code: Option<i64>,
}

impl FacebookScraper {
    pub fn new(access_token: impl Into<String>) -> Result<Self, ConfigError> {
        let access_token = access_token.into();
        if access_token.trim().is_empty() {
            return Err(ConfigError::MissingCredential(
                "FACEBOOK_ACCESS_TOKEN".to_string(),
            ));
        }

        Ok(Self {
            http: HttpScraper::new()?,
            access_token,
            search_url: parse_search_url(FACEBOOK_GRAPH_URL)?,
        })
    }

    pub fn with_search_url(mut self, search_url: &str) -> Result<Self, ConfigError> {
        self.search_url = parse_search_url(search_url)?;
        Ok(self)
    }

    pub fn with_proxies(mut self, pool: &ProxyPool) -> Result<Self, ConfigError> {
        self.http = self.http.with_proxies(pool)?;
        Ok(self)
    }
}

fn parse_search_url(raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|_| ConfigError::InvalidValue {
        key: "facebook search url".to_string(),
        value: raw.to_string(),
    })
}

/// Maps a Graph API error code, falling back to the HTTP status.
fn classify_graph_error(code: Option<i64>, status: u16) -> FetchErrorKind {
    match code {
        // Application, user, page and custom-rate throttling
        Some(4) | Some(17) | Some(32) | Some(613) => FetchErrorKind::RateLimited {
            status,
            retry_after: None,
        },
        Some(190) | Some(102) => FetchErrorKind::Unauthorized(status),
        _ => FetchErrorKind::from_status(status, None)
            .unwrap_or(FetchErrorKind::ClientError(status)),
    }
}

#[async_trait]
impl Scraper for FacebookScraper {
    fn name(&self) -> &str {
        "facebook"
    }

    fn resolve(&self, target: &Target) -> Result<Url, FetchErrorKind> {
        let query = target.value().trim();
        if target.kind() != TargetKind::Query || query.is_empty() {
            return Err(FetchErrorKind::MalformedTarget(format!(
                "facebook place search needs a query, got {}",
                target
            )));
        }

        let mut url = self.search_url.clone();
        url.query_pairs_mut()
            .append_pair("type", "place")
            .append_pair("q", query)
            .append_pair("fields", FACEBOOK_PLACE_FIELDS)
            .append_pair("access_token", &self.access_token);
        Ok(url)
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchErrorKind> {
        self.http.execute(request).await
    }

    fn classify(&self, response: &FetchResponse) -> Option<FetchErrorKind> {
        let envelope: ErrorEnvelope = serde_json::from_str(&response.decoded_body).ok()?;
        let error = envelope.error?;
        warn!(
            "Graph API error {:?} for {}: {}",
            error.code,
            response.target,
            error.message.as_deref().unwrap_or("no message")
        );
        Some(classify_graph_error(error.code, response.status))
    }
}
