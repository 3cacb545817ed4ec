use async_trait::async_trait;
use log::warn;
use serde::Deserialize;
use url::Url;

use super::{HttpScraper, Scraper};
use crate::core::{ConfigError, FetchErrorKind};
use crate::http::{FetchRequest, FetchResponse, Target, TargetKind};
use crate::proxy::ProxyPool;

pub const HUNTER_DOMAIN_SEARCH_URL: &str = "https://api.hunter.io/v2/domain-search";

/// Hunter.io domain search: public email addresses for a website's domain.
///
/// Takes `Domain` targets, or `Url` targets whose host is used.
pub struct HunterScraper {
    http: HttpScraper,
    api_key: String,
    search_url: Url,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorEnvelope {
    errors: Vec<HunterError>,
}

#[derive(Debug, Deserialize)]
struct HunterError {
    id: Option<String>,
    details: Option<String>,
}

impl HunterScraper {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential("HUNTER_API_KEY".to_string()));
        }

        Ok(Self {
            http: HttpScraper::new()?,
            api_key,
            search_url: parse_search_url(HUNTER_DOMAIN_SEARCH_URL)?,
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
        key: "hunter search url".to_string(),
        value: raw.to_string(),
    })
}

/// The registrable part a lookup should use: no scheme, path or `www.`.
fn lookup_domain(target: &Target) -> Result<String, FetchErrorKind> {
    let host = match target.kind() {
        TargetKind::Domain => target.value().trim().trim_end_matches('/').to_ascii_lowercase(),
        TargetKind::Url => target
            .parse_url()?
            .host_str()
            .map(str::to_ascii_lowercase)
            .unwrap_or_default(),
        _ => String::new(),
    };
    let domain = host.strip_prefix("www.").unwrap_or(&host);
    if domain.is_empty() || !domain.contains('.') || domain.contains('/') {
        return Err(FetchErrorKind::MalformedTarget(format!(
            "hunter needs a website domain, got {}",
            target
        )));
    }
    Ok(domain.to_string())
}

#[async_trait]
impl Scraper for HunterScraper {
    fn name(&self) -> &str {
        "hunter"
    }

    fn resolve(&self, target: &Target) -> Result<Url, FetchErrorKind> {
        let domain = lookup_domain(target)?;
        let mut url = self.search_url.clone();
        url.query_pairs_mut()
            .append_pair("domain", &domain)
            .append_pair("api_key", &self.api_key);
        Ok(url)
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchErrorKind> {
        self.http.execute(request).await
    }

    fn classify(&self, response: &FetchResponse) -> Option<FetchErrorKind> {
        let envelope: ErrorEnvelope = serde_json::from_str(&response.decoded_body).ok()?;
        let error = envelope.errors.into_iter().next()?;
        warn!(
            "Hunter error {} for {}: {}",
            error.id.as_deref().unwrap_or("unknown"),
            response.target,
            error.details.as_deref().unwrap_or("no details")
        );
        let kind = match error.id.as_deref() {
            Some("too_many_requests") => FetchErrorKind::RateLimited {
                status: response.status,
                retry_after: response.retry_after(),
            },
            Some("authentication_failed") | Some("no_user") => {
                FetchErrorKind::Unauthorized(response.status)
            }
            _ => FetchErrorKind::from_status(response.status, response.retry_after())
                .unwrap_or(FetchErrorKind::ClientError(response.status)),
        };
        Some(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::RateKey;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_resolve_domain_search() {
        let scraper = HunterScraper::new("hk").unwrap();
        let url = scraper.resolve(&Target::domain("WWW.Drpetrov.mk/")).unwrap();
        assert_eq!(url.host_str(), Some("api.hunter.io"));
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("domain".to_string(), "drpetrov.mk".to_string()),
                ("api_key".to_string(), "hk".to_string()),
            ]
        );

        let from_site = scraper
            .resolve(&Target::url("https://www.smiledent.mk/contact"))
            .unwrap();
        assert!(from_site.as_str().contains("domain=smiledent.mk"));

        assert!(scraper.resolve(&Target::domain("localhost")).is_err());
        assert!(scraper.resolve(&Target::query("spa in Ohrid")).is_err());
    }

    #[tokio::test]
    async fn test_classify_error_body() {
        let server = MockServer::start().await;
        let scraper = HunterScraper::new("hk")
            .unwrap()
            .with_search_url(&format!("{}/v2/domain-search", server.uri()))
            .unwrap();

        Mock::given(method("GET"))
            .and(path("/v2/domain-search"))
            .and(query_param("domain", "spa.mk"))
            .respond_with(ResponseTemplate::new(429).set_body_string(
                r#"{"errors":[{"id":"too_many_requests","code":429,"details":"You have reached the rate limit."}]}"#,
            ))
            .mount(&server)
            .await;

        let target = Target::domain("spa.mk");
        let request = FetchRequest {
            index: 0,
            url: scraper.resolve(&target).unwrap(),
            target,
            proxy: None,
            rate_key: RateKey::global(),
            timeout: Duration::from_secs(5),
            attempt: 1,
            dispatched_at: tokio::time::Instant::now(),
        };

        let response = scraper.fetch(&request).await.unwrap();
        let error = scraper.classify(&response).unwrap();
        assert!(matches!(error, FetchErrorKind::RateLimited { status: 429, .. }));
        assert!(error.is_retriable());
    }

    #[test]
    fn test_missing_key() {
        assert!(matches!(
            HunterScraper::new(" "),
            Err(ConfigError::MissingCredential(_))
        ));
    }
}
