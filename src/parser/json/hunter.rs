use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;

use crate::core::ScraperResult;
use crate::http::FetchResponse;
use crate::parser::base::Extractor;
use crate::parser::record::{non_empty, BusinessRecord};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DomainSearch {
    data: DomainData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DomainData {
    domain: Option<String>,
    organization: Option<String>,
    emails: Vec<FoundEmail>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FoundEmail {
    value: Option<String>,
    confidence: Option<u8>,
}

/// One record per looked-up domain carrying its first public email.
#[derive(Debug, Default, Clone)]
pub struct HunterExtractor;

impl HunterExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Extractor for HunterExtractor {
    fn name(&self) -> &str {
        "hunter"
    }

    async fn extract(&self, response: &FetchResponse) -> ScraperResult<Vec<BusinessRecord>> {
        let search: DomainSearch = serde_json::from_str(&response.decoded_body)?;
        let data = search.data;
        let domain = data
            .domain
            .as_deref()
            .and_then(non_empty)
            .unwrap_or_else(|| response.target.value().to_string());

        let Some((email, confidence)) = data
            .emails
            .iter()
            .find_map(|e| Some((e.value.as_deref().and_then(non_empty)?, e.confidence)))
        else {
            debug!("No public email for {}", domain);
            return Ok(Vec::new());
        };

        let mut record = BusinessRecord {
            name: data
                .organization
                .as_deref()
                .and_then(non_empty)
                .or_else(|| Some(domain.clone())),
            email: Some(email),
            website: Some(domain.clone()),
            source_url: Some(response.target.to_string()),
            ..BusinessRecord::default()
        };
        if let Some(confidence) = confidence {
            record
                .extra
                .insert("email_confidence".to_string(), confidence.to_string());
        }
        record
            .extra
            .insert("emails_found".to_string(), data.emails.len().to_string());
        info!("Found an email for {}", domain);
        Ok(vec![record])
    }
}
