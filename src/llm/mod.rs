//! LLM-backed completion of business records.
//!
//! Enrichment is a collaborator of the extractors, not of the fetch loop:
//! it has its own timeout and retry policy and never holds a rate slot.

mod client;
mod config;

pub use client::OpenAiEnricher;
pub use config::LlmConfig;

use crate::core::ScraperResult;
use crate::parser::BusinessRecord;
use async_trait::async_trait;

#[async_trait]
pub trait Enricher: Send + Sync {
    /// Returns the model's view of the business behind `record`, read from
    /// `content`. Callers decide which of the returned fields to keep.
    async fn enrich(&self, record: &BusinessRecord, content: &str) -> ScraperResult<BusinessRecord>;
}
