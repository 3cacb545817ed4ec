use async_trait::async_trait;
use log::debug;
use parking_lot::RwLock;
use reqwest::{header, Client, ClientBuilder};
use std::collections::HashMap;
use std::time::Instant;

use super::Scraper;
use crate::core::{ConfigError, FetchErrorKind};
use crate::http::{FetchRequest, FetchResponse};
use crate::proxy::{ProxyEndpoint, ProxyPool};

pub(crate) const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Plain page fetcher over reqwest. Keeps one client per proxy endpoint so
/// connection pools are never shared across exits.
pub struct HttpScraper {
    headers: header::HeaderMap,
    direct: Client,
    proxied: RwLock<HashMap<String, Client>>,
}

impl HttpScraper {
    pub fn new() -> Result<Self, ConfigError> {
        Self::with_header_map(default_headers())
    }

    fn with_header_map(headers: header::HeaderMap) -> Result<Self, ConfigError> {
        let direct = build_client(&headers, None)?;
        Ok(Self {
            headers,
            direct,
            proxied: RwLock::new(HashMap::new()),
        })
    }

    /// Adds or overrides default headers. Invalid names or values are
    /// configuration errors.
    pub fn with_headers(self, headers: Vec<(&str, &str)>) -> Result<Self, ConfigError> {
        let mut header_map = self.headers;
        for (key, value) in headers {
            let invalid = || ConfigError::InvalidValue {
                key: format!("header {}", key),
                value: value.to_string(),
            };
            let name = header::HeaderName::from_bytes(key.as_bytes()).map_err(|_| invalid())?;
            let value = header::HeaderValue::from_str(value).map_err(|_| invalid())?;
            header_map.insert(name, value);
        }
        Self::with_header_map(header_map)
    }

    /// Builds the per-proxy clients up front so proxy problems surface at
    /// startup rather than mid-run.
    pub fn with_proxies(self, pool: &ProxyPool) -> Result<Self, ConfigError> {
        {
            let mut proxied = self.proxied.write();
            for endpoint in pool.endpoints() {
                let client = build_client(&self.headers, Some(endpoint))?;
                proxied.insert(endpoint.key(), client);
            }
        }
        Ok(self)
    }

    fn client_for(&self, proxy: Option<&ProxyEndpoint>) -> Result<Client, FetchErrorKind> {
        let Some(endpoint) = proxy else {
            return Ok(self.direct.clone());
        };

        let key = endpoint.key();
        if let Some(client) = self.proxied.read().get(&key) {
            return Ok(client.clone());
        }

        let client = build_client(&self.headers, Some(endpoint))
            .map_err(|e| FetchErrorKind::Connection(e.to_string()))?;
        self.proxied.write().insert(key, client.clone());
        Ok(client)
    }

    pub(crate) fn extract_headers(response: &reqwest::Response) -> HashMap<String, String> {
        response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|val| (k.to_string(), val.to_string())))
            .collect()
    }

    /// Sends the request through the right client and reads the full body.
    pub(crate) async fn execute(
        &self,
        request: &FetchRequest,
    ) -> Result<FetchResponse, FetchErrorKind> {
        let client = self.client_for(request.proxy.as_ref())?;
        let started = Instant::now();

        let response = client
            .get(request.url.clone())
            .timeout(request.timeout)
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers = Self::extract_headers(&response);
        let raw_body = response.bytes().await?;

        debug!(
            "{} answered HTTP {} with {} bytes",
            request.target,
            status,
            raw_body.len()
        );

        let mut fetched = FetchResponse::from_request(request, status, headers, raw_body.to_vec());
        fetched.latency = started.elapsed();
        Ok(fetched)
    }
}

fn default_headers() -> header::HeaderMap {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::USER_AGENT,
        header::HeaderValue::from_static(DEFAULT_USER_AGENT),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        header::HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE),
    );
    headers
}

fn build_client(
    headers: &header::HeaderMap,
    proxy: Option<&ProxyEndpoint>,
) -> Result<Client, ConfigError> {
    let mut builder = ClientBuilder::new().default_headers(headers.clone());
    if let Some(endpoint) = proxy {
        builder = builder.proxy(endpoint.to_reqwest()?);
    }
    builder
        .build()
        .map_err(|e| ConfigError::Client(e.to_string()))
}

#[async_trait]
impl Scraper for HttpScraper {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchErrorKind> {
        self.execute(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{ResponseType, Target};
    use crate::rate_limit::RateKey;
    use std::time::Duration;
    use url::Url;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request_for(url: Url) -> FetchRequest {
        FetchRequest {
            index: 0,
            target: Target::url(url.as_str()),
            url,
            proxy: None,
            rate_key: RateKey::global(),
            timeout: Duration::from_secs(5),
            attempt: 1,
            dispatched_at: tokio::time::Instant::now(),
        }
    }

    #[tokio::test]
    async fn test_get_request() {
        let server = MockServer::start().await;
        let scraper = HttpScraper::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/listing"))
            .and(header_exists("accept-language"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><body>Dental Clinic</body></html>", "text/html"),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap().join("/listing").unwrap();
        let response = scraper.fetch(&request_for(url)).await.unwrap();

        assert_eq!(response.status, 200);
        assert!(response.decoded_body.contains("Dental Clinic"));
        assert_eq!(response.response_type, ResponseType::Html);
        assert_eq!(response.attempts, 1);
        assert!(response.proxy.is_none());

        // Header matchers split on commas, so compare the raw value instead.
        let received = server.received_requests().await.unwrap();
        assert_eq!(
            received[0]
                .headers
                .get("accept-language")
                .and_then(|v| v.to_str().ok()),
            Some(DEFAULT_ACCEPT_LANGUAGE)
        );
    }

    #[tokio::test]
    async fn test_error_status_is_a_response() {
        let server = MockServer::start().await;
        let scraper = HttpScraper::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "12")
                    .set_body_string("slow down"),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap().join("/gone").unwrap();
        let response = scraper.fetch(&request_for(url)).await.unwrap();

        assert_eq!(response.status, 429);
        assert_eq!(response.retry_after(), Some(Duration::from_secs(12)));
    }

    #[tokio::test]
    async fn test_custom_headers() {
        let server = MockServer::start().await;
        let custom_ua = "CustomBot/1.0";
        let scraper = HttpScraper::new()
            .unwrap()
            .with_headers(vec![("user-agent", custom_ua)])
            .unwrap();

        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("user-agent", custom_ua))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let response = scraper.fetch(&request_for(url)).await.unwrap();
        assert_eq!(response.decoded_body, "ok");
    }

    #[tokio::test]
    async fn test_invalid_headers() {
        let scraper = HttpScraper::new().unwrap();
        let result = scraper.with_headers(vec![("invalid\0header", "value")]);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[tokio::test]
    async fn test_connection_refused_is_retriable() {
        let scraper = HttpScraper::new().unwrap();
        let url = Url::parse("http://127.0.0.1:9/").unwrap();
        let err = scraper.fetch(&request_for(url)).await.unwrap_err();
        assert!(err.is_retriable());
    }
}
