use std::fmt;
use std::time::Duration;

use url::Url;

use crate::config::{parse_var, Lookup};
use crate::core::retry::RetryConfig;
use crate::core::ConfigError;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4";

#[derive(Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    /// Base URL of an OpenAI-compatible API; `/chat/completions` is appended.
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Page text beyond this many characters is cut before prompting.
    pub max_content_chars: usize,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.2,
            max_tokens: 500,
            max_content_chars: 4000,
            timeout: Duration::from_secs(60),
            retry: RetryConfig::default().with_delays(Duration::from_secs(2), Duration::from_secs(30)),
        }
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("max_content_chars", &self.max_content_chars)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl LlmConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key: &str| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let endpoint = match lookup.get("LLM_ENDPOINT") {
            Some(raw) => {
                let url = Url::parse(raw.trim()).map_err(|_| ConfigError::InvalidValue {
                    key: "LLM_ENDPOINT".to_string(),
                    value: raw.clone(),
                })?;
                url.as_str().trim_end_matches('/').to_string()
            }
            None => defaults.endpoint.clone(),
        };

        let max_content_chars =
            parse_var(&lookup, "LLM_MAX_CONTENT_CHARS")?.unwrap_or(defaults.max_content_chars);
        if max_content_chars == 0 {
            return Err(ConfigError::InvalidValue {
                key: "LLM_MAX_CONTENT_CHARS".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(Self {
            api_key: lookup.get("OPENAI_API_KEY"),
            endpoint,
            model: lookup.get("LLM_MODEL").unwrap_or_else(|| defaults.model.clone()),
            max_content_chars,
            timeout: parse_var::<u64>(&lookup, "LLM_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            ..defaults
        })
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_overrides() {
        let defaults = LlmConfig::from_lookup(|_: &str| None).unwrap();
        assert_eq!(
            defaults.completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(defaults.model, "gpt-4");
        assert!(defaults.api_key.is_none());

        let config = LlmConfig::from_lookup(|key: &str| match key {
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            "LLM_ENDPOINT" => Some("http://localhost:11434/v1/".to_string()),
            "LLM_MODEL" => Some("llama3".to_string()),
            "LLM_MAX_CONTENT_CHARS" => Some("1200".to_string()),
            "LLM_TIMEOUT_SECS" => Some("5".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(
            config.completions_url(),
            "http://localhost:11434/v1/chat/completions"
        );
        assert_eq!(config.model, "llama3");
        assert_eq!(config.max_content_chars, 1200);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(!format!("{:?}", config).contains("sk-test"));
    }

    #[test]
    fn test_rejects_zero_content_limit() {
        let result = LlmConfig::from_lookup(|key: &str| {
            (key == "LLM_MAX_CONTENT_CHARS").then(|| "0".to_string())
        });
        assert!(result.is_err());
    }
}
