use super::request::{FetchRequest, Target};
use crate::core::retry::{parse_retry_after, RetryCategory};
use crate::core::FetchFailure;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Html,
    Json,
    Text,
    Binary,
}

/// Raw payload of a successful fetch plus response metadata.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub target: Target,
    pub url: Url,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub raw_body: Vec<u8>,
    pub decoded_body: String,
    pub response_type: ResponseType,
    pub timestamp: DateTime<Utc>,
    pub latency: Duration,
    pub attempts: usize,
    pub retry_history: HashMap<RetryCategory, usize>,
    /// Proxy key the response came through, if any.
    pub proxy: Option<String>,
}

impl FetchResponse {
    pub fn from_request(
        request: &FetchRequest,
        status: u16,
        headers: HashMap<String, String>,
        raw_body: Vec<u8>,
    ) -> Self {
        let decoded_body = String::from_utf8_lossy(&raw_body).into_owned();
        let response_type = detect_content_type(&headers, &decoded_body);
        Self {
            target: request.target.clone(),
            url: request.url.clone(),
            status,
            headers,
            raw_body,
            decoded_body,
            response_type,
            timestamp: Utc::now(),
            latency: Duration::ZERO,
            attempts: request.attempt,
            retry_history: HashMap::new(),
            proxy: request.proxy.as_ref().map(|p| p.key()),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after").and_then(parse_retry_after)
    }
}

pub fn detect_content_type(headers: &HashMap<String, String>, body: &str) -> ResponseType {
    let content_type = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .map(|(_, v)| v.to_ascii_lowercase());

    if let Some(content_type) = content_type {
        if content_type.contains("text/html") || content_type.contains("xhtml") {
            ResponseType::Html
        } else if content_type.contains("json") {
            ResponseType::Json
        } else if content_type.contains("text/") {
            ResponseType::Text
        } else {
            ResponseType::Binary
        }
    } else {
        // Try to detect content type from body
        let trimmed = body.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            ResponseType::Json
        } else if trimmed
            .get(..9)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("<!doctype"))
            || trimmed.starts_with("<html")
        {
            ResponseType::Html
        } else {
            ResponseType::Text
        }
    }
}

pub type FetchResult = Result<FetchResponse, FetchFailure>;

/// One element of the fetch loop's output stream.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub index: usize,
    pub result: FetchResult,
}

impl FetchOutcome {
    pub fn target(&self) -> &Target {
        match &self.result {
            Ok(response) => &response.target,
            Err(failure) => &failure.target,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}
