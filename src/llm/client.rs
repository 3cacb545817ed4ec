use std::collections::HashMap;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::config::LlmConfig;
use super::Enricher;
use crate::core::retry::parse_retry_after;
use crate::core::{ConfigError, FetchErrorKind, ScraperError, ScraperResult};
use crate::parser::record::non_empty;
use crate::parser::BusinessRecord;

const SYSTEM_PROMPT: &str = "You clean and complete business directory records. \
Answer with a single JSON object and nothing else. Use only facts present in the \
supplied page content; leave a field null when the content does not state it.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<ChatChoice>>,
    error: Option<ChatError>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatError {
    message: String,
}

/// Enricher for OpenAI-compatible chat completion APIs.
pub struct OpenAiEnricher {
    client: Client,
    config: LlmConfig,
    api_key: String,
}

impl OpenAiEnricher {
    pub fn new(config: LlmConfig) -> Result<Self, ConfigError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ConfigError::MissingCredential("OPENAI_API_KEY".to_string()))?;
        config.retry.validate()?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    fn prompt(&self, record: &BusinessRecord, content: &str) -> String {
        let known = serde_json::to_string_pretty(record).unwrap_or_default();
        format!(
            "Known fields:\n{}\n\nPage content:\n{}\n\n\
             Reply with JSON using the keys business_name, category, address, phone, \
             email, website. Phone numbers in international format.",
            known, content
        )
    }

    /// One round trip. Errors are classified the same way fetch attempts are.
    async fn complete(&self, prompt: &str) -> Result<String, FetchErrorKind> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt.to_string(),
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(self.config.completions_url())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        if let Some(kind) = FetchErrorKind::from_status(status, retry_after) {
            return Err(kind);
        }

        let body: ChatResponse = response.json().await?;
        if let Some(error) = body.error {
            warn!("LLM API reported an error: {}", error.message);
            return Err(FetchErrorKind::ClientError(status));
        }
        body.choices
            .and_then(|choices| choices.into_iter().next())
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| FetchErrorKind::ServerError(status))
    }
}

#[async_trait]
impl Enricher for OpenAiEnricher {
    async fn enrich(&self, record: &BusinessRecord, content: &str) -> ScraperResult<BusinessRecord> {
        let prompt = self.prompt(record, content);
        let mut attempt = 1;
        loop {
            match self.complete(&prompt).await {
                Ok(reply) => {
                    debug!("LLM reply after {} attempt(s): {}", attempt, reply);
                    return parse_reply(&reply);
                }
                Err(kind) => match self.config.retry.next_delay(&kind, attempt) {
                    Some(delay) => {
                        warn!(
                            "LLM attempt {} failed ({}), retrying in {:?}",
                            attempt, kind, delay
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        return Err(ScraperError::LlmError(format!(
                            "gave up after {} attempt(s): {}",
                            attempt, kind
                        )))
                    }
                },
            }
        }
    }
}

/// Reads the model's JSON answer, tolerating markdown fences and a few key
/// spellings. Placeholder values such as "N/A" are treated as absent.
pub(crate) fn parse_reply(reply: &str) -> ScraperResult<BusinessRecord> {
    let trimmed = reply.trim();
    let json = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed);

    let fields: HashMap<String, Value> = match serde_json::from_str(json.trim()) {
        Ok(fields) => fields,
        Err(e) => {
            return Err(ScraperError::LlmError(format!(
                "reply is not a JSON object: {}",
                e
            )))
        }
    };
    let text = |keys: &[&str]| {
        keys.iter()
            .filter_map(|key| fields.get(*key))
            .find_map(|value| value.as_str().and_then(non_empty))
    };

    let mut record = BusinessRecord {
        name: text(&["business_name", "name"]),
        category: text(&["category"]),
        address: text(&["address"]),
        phone: text(&["phone", "phone_number"]),
        email: text(&["email"]),
        website: text(&["website", "url"]),
        ..BusinessRecord::default()
    };
    if let Some(maps) = text(&["google_maps_url"]) {
        record.extra.insert("google_maps_url".to_string(), maps);
    }
    Ok(record)
}
