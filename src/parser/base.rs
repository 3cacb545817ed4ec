use super::record::BusinessRecord;
use crate::core::{ScraperError, ScraperResult};
use crate::http::FetchResponse;
use async_trait::async_trait;
use scraper::Selector;

/// Turns one fetched payload into business records.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(&self, response: &FetchResponse) -> ScraperResult<Vec<BusinessRecord>>;

    /// Fields a listing's detail page adds to the record that linked to it.
    /// Extractors without detail pages find nothing.
    async fn extract_detail(&self, _response: &FetchResponse) -> ScraperResult<Option<BusinessRecord>> {
        Ok(None)
    }
}

pub(crate) fn parse_selector(css: &str) -> ScraperResult<Selector> {
    Selector::parse(css)
        .map_err(|e| ScraperError::ExtractionError(format!("invalid selector {:?}: {}", css, e)))
}
