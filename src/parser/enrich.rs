use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use scraper::Html;

use crate::core::ScraperResult;
use crate::http::{FetchResponse, ResponseType};
use crate::llm::Enricher;
use crate::parser::base::Extractor;
use crate::parser::record::{clean_text, BusinessRecord};

/// Wraps an extractor and asks an [`Enricher`] to complete records that
/// lack a phone, address or category. Existing values are never replaced,
/// and an enrichment failure keeps the record as extracted.
pub struct EnrichingExtractor {
    inner: Arc<dyn Extractor>,
    enricher: Arc<dyn Enricher>,
    max_content_chars: usize,
}

impl EnrichingExtractor {
    pub fn new(
        inner: Arc<dyn Extractor>,
        enricher: Arc<dyn Enricher>,
        max_content_chars: usize,
    ) -> Self {
        Self {
            inner,
            enricher,
            max_content_chars,
        }
    }

    fn page_content(&self, response: &FetchResponse) -> String {
        let text = match response.response_type {
            ResponseType::Html => {
                let document = Html::parse_document(&response.decoded_body);
                clean_text(&document.root_element().text().collect::<Vec<_>>().join(" "))
            }
            _ => response.decoded_body.clone(),
        };
        truncate_chars(&text, self.max_content_chars)
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

#[async_trait]
impl Extractor for EnrichingExtractor {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn extract(&self, response: &FetchResponse) -> ScraperResult<Vec<BusinessRecord>> {
        let mut records = self.inner.extract(response).await?;
        if records.iter().all(BusinessRecord::is_complete) {
            return Ok(records);
        }

        let content = self.page_content(response);
        let mut enriched = 0;
        for record in records.iter_mut().filter(|r| !r.is_complete()) {
            debug!(
                "Enriching {:?}, missing {:?}",
                record.name,
                record.missing_core_fields()
            );
            match self.enricher.enrich(record, &content).await {
                Ok(suggestion) => {
                    record.fill_missing(&suggestion);
                    enriched += 1;
                }
                Err(e) => warn!(
                    "Enrichment failed for {:?} from {}: {}",
                    record.name, response.target, e
                ),
            }
        }
        if enriched > 0 {
            info!("Enriched {} record(s) from {}", enriched, response.target);
        }
        Ok(records)
    }

    async fn extract_detail(&self, response: &FetchResponse) -> ScraperResult<Option<BusinessRecord>> {
        self.inner.extract_detail(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ScraperError;
    use crate::parser::test_support::html_response;
    use parking_lot::Mutex;

    struct FixedExtractor(Vec<BusinessRecord>);

    #[async_trait]
    impl Extractor for FixedExtractor {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn extract(&self, _: &FetchResponse) -> ScraperResult<Vec<BusinessRecord>> {
            Ok(self.0.clone())
        }
    }

    /// Answers with a fixed record and remembers the content it was shown.
    #[derive(Default)]
    struct FakeEnricher {
        reply: Option<BusinessRecord>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Enricher for FakeEnricher {
        async fn enrich(&self, _: &BusinessRecord, content: &str) -> ScraperResult<BusinessRecord> {
            self.seen.lock().push(content.to_string());
            self.reply
                .clone()
                .ok_or_else(|| ScraperError::LlmError("model unavailable".to_string()))
        }
    }

    fn complete_record() -> BusinessRecord {
        BusinessRecord {
            name: Some("Complete".into()),
            phone: Some("070 000 000".into()),
            address: Some("Skopje".into()),
            category: Some("spa".into()),
            ..BusinessRecord::default()
        }
    }

    #[tokio::test]
    async fn test_fills_only_missing_fields() {
        let mut partial = BusinessRecord::named("Spa Ohrid");
        partial.phone = Some("046 111 222".into());

        let suggestion = BusinessRecord {
            name: Some("Hallucinated Name".into()),
            phone: Some("000".into()),
            address: Some("Kej Makedonija 1, Ohrid".into()),
            category: Some("spa".into()),
            ..BusinessRecord::default()
        };
        let enricher = Arc::new(FakeEnricher {
            reply: Some(suggestion),
            ..FakeEnricher::default()
        });
        let extractor = EnrichingExtractor::new(
            Arc::new(FixedExtractor(vec![partial, complete_record()])),
            enricher.clone(),
            20,
        );

        let response = html_response(
            "https://spa-ohrid.mk/",
            "<html><body><p>Spa   Ohrid, Kej Makedonija 1, Ohrid. Open daily.</p></body></html>",
        );
        let records = extractor.extract(&response).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name.as_deref(), Some("Spa Ohrid"));
        assert_eq!(records[0].phone.as_deref(), Some("046 111 222"));
        assert_eq!(records[0].address.as_deref(), Some("Kej Makedonija 1, Ohrid"));
        assert_eq!(records[1], complete_record());

        // Only the incomplete record is sent, with tag-free, truncated text.
        let seen = enricher.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], "Spa Ohrid, Kej Maked");
    }

    #[tokio::test]
    async fn test_enrichment_failure_keeps_record() {
        let enricher = Arc::new(FakeEnricher::default());
        let extractor = EnrichingExtractor::new(
            Arc::new(FixedExtractor(vec![BusinessRecord::named("Barber")])),
            enricher,
            100,
        );

        let records = extractor
            .extract(&html_response("https://barber.mk/", "<p>Barber</p>"))
            .await
            .unwrap();
        assert_eq!(records, vec![BusinessRecord::named("Barber")]);
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate_chars("Штип 2000", 4), "Штип");
        assert_eq!(truncate_chars("short", 100), "short");
    }
}
