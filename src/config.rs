//! Environment-driven settings for a harvest run.
//!
//! Every value has a default; invalid numbers or URLs are reported as
//! [`ConfigError`] before anything is fetched. `main` loads `.env` with
//! dotenvy first, then CLI flags override what is read here.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::core::retry::RetryConfig;
use crate::core::{ConfigError, FetchLoopConfig, FollowConfig};
use crate::llm::LlmConfig;
use crate::proxy::{ProxyEndpoint, ProxyPool, SelectionPolicy};
use crate::rate_limit::{RateKeying, RatePolicy};

pub const DEFAULT_OUTPUT_DIR: &str = "data/output";

/// Source of raw settings, usually `std::env::var`.
pub(crate) trait Lookup {
    fn get(&self, key: &str) -> Option<String>;
}

impl<F: Fn(&str) -> Option<String>> Lookup for F {
    fn get(&self, key: &str) -> Option<String> {
        self(key).filter(|value| !value.trim().is_empty())
    }
}

pub(crate) fn parse_var<T: FromStr>(lookup: &impl Lookup, key: &str) -> Result<Option<T>, ConfigError> {
    lookup
        .get(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
            })
        })
        .transpose()
}

fn parse_bool(lookup: &impl Lookup, key: &str) -> Result<Option<bool>, ConfigError> {
    lookup
        .get(key)
        .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
            }),
        })
        .transpose()
}

fn millis(lookup: &impl Lookup, key: &str) -> Result<Option<Duration>, ConfigError> {
    Ok(parse_var::<u64>(lookup, key)?.map(Duration::from_millis))
}

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub fetch: FetchLoopConfig,
    pub proxies: Vec<ProxyEndpoint>,
    pub proxy_selection: SelectionPolicy,
    pub google_places_api_key: Option<String>,
    pub facebook_access_token: Option<String>,
    pub hunter_api_key: Option<String>,
    pub follow: FollowConfig,
    pub llm: LlmConfig,
    pub output_dir: PathBuf,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            fetch: FetchLoopConfig::default(),
            proxies: Vec::new(),
            proxy_selection: SelectionPolicy::default(),
            google_places_api_key: None,
            facebook_access_token: None,
            hunter_api_key: None,
            follow: FollowConfig::default(),
            llm: LlmConfig::default(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

impl HarvestConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key: &str| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            fetch: fetch_config(&lookup)?,
            proxies: proxies(&lookup)?,
            proxy_selection: parse_var(&lookup, "PROXY_SELECTION")?
                .unwrap_or(defaults.proxy_selection),
            google_places_api_key: lookup.get("GOOGLE_PLACES_API_KEY"),
            facebook_access_token: lookup.get("FACEBOOK_ACCESS_TOKEN"),
            hunter_api_key: lookup.get("HUNTER_API_KEY"),
            follow: follow_config(&lookup)?,
            llm: LlmConfig::from_lookup(&lookup)?,
            output_dir: lookup
                .get("HARVEST_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
        })
    }

    /// The configured proxies, or `None` when there are none.
    pub fn proxy_pool(&self) -> Option<ProxyPool> {
        if self.proxies.is_empty() {
            return None;
        }
        Some(ProxyPool::new(self.proxies.clone(), self.proxy_selection))
    }
}

fn fetch_config(lookup: &impl Lookup) -> Result<FetchLoopConfig, ConfigError> {
    let defaults = FetchLoopConfig::default();
    let retry_defaults = RetryConfig::default();

    let per_interval = parse_var::<u32>(lookup, "HARVEST_REQUESTS_PER_INTERVAL")?;
    let interval = millis(lookup, "HARVEST_INTERVAL_MS")?;
    let rate_policy = match (per_interval, interval) {
        (Some(requests), Some(interval)) => RatePolicy::PerInterval { requests, interval },
        (Some(requests), None) => RatePolicy::PerInterval {
            requests,
            interval: Duration::from_secs(1),
        },
        _ => millis(lookup, "HARVEST_MIN_INTERVAL_MS")?
            .map(RatePolicy::MinInterval)
            .unwrap_or(defaults.rate_policy),
    };
    // Reject zero-rate settings here rather than at loop construction.
    rate_policy.min_spacing()?;

    let retry = RetryConfig {
        max_attempts: parse_var(lookup, "HARVEST_MAX_ATTEMPTS")?
            .unwrap_or(retry_defaults.max_attempts),
        initial_delay: millis(lookup, "HARVEST_INITIAL_BACKOFF_MS")?
            .unwrap_or(retry_defaults.initial_delay),
        max_delay: millis(lookup, "HARVEST_MAX_BACKOFF_MS")?.unwrap_or(retry_defaults.max_delay),
        jitter: parse_var(lookup, "HARVEST_JITTER")?.unwrap_or(retry_defaults.jitter),
        max_retry_after: parse_var::<u64>(lookup, "HARVEST_MAX_RETRY_AFTER_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(retry_defaults.max_retry_after),
        ..retry_defaults
    };
    retry.validate()?;

    let timeout = parse_var::<u64>(lookup, "HARVEST_TIMEOUT_SECS")?
        .map(Duration::from_secs)
        .unwrap_or(defaults.timeout);
    if timeout.is_zero() {
        return Err(ConfigError::InvalidValue {
            key: "HARVEST_TIMEOUT_SECS".to_string(),
            value: "0".to_string(),
        });
    }

    Ok(FetchLoopConfig {
        rate_policy,
        rate_keying: parse_var::<RateKeying>(lookup, "HARVEST_RATE_KEY")?
            .unwrap_or(defaults.rate_keying),
        retry,
        timeout,
        proxy_required: parse_bool(lookup, "PROXY_REQUIRED")?.unwrap_or(defaults.proxy_required),
    })
}

fn follow_config(lookup: &impl Lookup) -> Result<FollowConfig, ConfigError> {
    let defaults = FollowConfig::default();
    Ok(FollowConfig {
        max_depth: parse_var(lookup, "HARVEST_FOLLOW_DEPTH")?.unwrap_or(defaults.max_depth),
        link_patterns: lookup
            .get("HARVEST_LINK_PATTERNS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or(defaults.link_patterns),
        same_host: parse_bool(lookup, "HARVEST_FOLLOW_SAME_HOST")?.unwrap_or(defaults.same_host),
        profiles: parse_bool(lookup, "HARVEST_FOLLOW_PROFILES")?.unwrap_or(defaults.profiles),
        max_follow_ups: parse_var(lookup, "HARVEST_MAX_FOLLOW_UPS")?
            .unwrap_or(defaults.max_follow_ups),
    })
}

/// `PROXY_URLS` wins; otherwise the four BrightData variables describe a
/// single residential endpoint.
fn proxies(lookup: &impl Lookup) -> Result<Vec<ProxyEndpoint>, ConfigError> {
    if let Some(raw) = lookup.get("PROXY_URLS") {
        return raw
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(ProxyEndpoint::parse)
            .collect();
    }

    let user = lookup.get("BRIGHTDATA_USER");
    let pass = lookup.get("BRIGHTDATA_PASS");
    let host = lookup.get("BRIGHTDATA_HOST");
    match (user, pass, host) {
        (Some(user), Some(pass), Some(host)) => {
            let port = parse_var::<u16>(lookup, "BRIGHTDATA_PORT")?.ok_or_else(|| {
                ConfigError::MissingCredential("BRIGHTDATA_PORT".to_string())
            })?;
            Ok(vec![ProxyEndpoint::from_parts(&user, &pass, &host, port)?])
        }
        (None, None, None) => Ok(Vec::new()),
        (user, pass, _) => {
            let missing = if user.is_none() {
                "BRIGHTDATA_USER"
            } else if pass.is_none() {
                "BRIGHTDATA_PASS"
            } else {
                "BRIGHTDATA_HOST"
            };
            Err(ConfigError::MissingCredential(missing.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = HarvestConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(
            config.fetch.rate_policy,
            RatePolicy::MinInterval(Duration::from_secs(1))
        );
        assert_eq!(config.fetch.retry.max_attempts, 3);
        assert_eq!(config.fetch.timeout, Duration::from_secs(30));
        assert_eq!(config.fetch.rate_keying, RateKeying::Global);
        assert!(config.proxies.is_empty());
        assert!(config.proxy_pool().is_none());
        assert_eq!(config.output_dir, PathBuf::from("data/output"));
    }

    #[test]
    fn test_fetch_settings() {
        let config = HarvestConfig::from_lookup(lookup(&[
            ("HARVEST_REQUESTS_PER_INTERVAL", "4"),
            ("HARVEST_INTERVAL_MS", "2000"),
            ("HARVEST_MAX_ATTEMPTS", "5"),
            ("HARVEST_INITIAL_BACKOFF_MS", "250"),
            ("HARVEST_JITTER", "0"),
            ("HARVEST_TIMEOUT_SECS", "10"),
            ("HARVEST_RATE_KEY", "host"),
            ("HARVEST_OUTPUT_DIR", "/tmp/harvest"),
        ]))
        .unwrap();

        assert_eq!(
            config.fetch.rate_policy.min_spacing().unwrap(),
            Duration::from_millis(500)
        );
        assert_eq!(config.fetch.retry.max_attempts, 5);
        assert_eq!(config.fetch.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.fetch.retry.jitter, 0.0);
        assert_eq!(config.fetch.timeout, Duration::from_secs(10));
        assert_eq!(config.fetch.rate_keying, RateKeying::PerHost);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/harvest"));
    }

    #[test]
    fn test_follow_settings() {
        let config = HarvestConfig::from_lookup(lookup(&[
            ("HARVEST_FOLLOW_DEPTH", "2"),
            ("HARVEST_LINK_PATTERNS", "wellness, spa ,"),
            ("HARVEST_FOLLOW_PROFILES", "yes"),
            ("HUNTER_API_KEY", "hk"),
        ]))
        .unwrap();
        assert_eq!(
            config.follow,
            FollowConfig {
                max_depth: 2,
                link_patterns: vec!["wellness".to_string(), "spa".to_string()],
                profiles: true,
                ..FollowConfig::default()
            }
        );
        assert_eq!(config.hunter_api_key.as_deref(), Some("hk"));

        let defaults = HarvestConfig::from_lookup(lookup(&[])).unwrap();
        assert!(!defaults.follow.is_enabled());
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        for pairs in [
            vec![("HARVEST_MAX_ATTEMPTS", "three")],
            vec![("HARVEST_MAX_ATTEMPTS", "0")],
            vec![("HARVEST_JITTER", "1.5")],
            vec![("HARVEST_TIMEOUT_SECS", "0")],
            vec![("HARVEST_REQUESTS_PER_INTERVAL", "0")],
            vec![("HARVEST_RATE_KEY", "per-city")],
            vec![("PROXY_REQUIRED", "maybe")],
            vec![("HARVEST_FOLLOW_DEPTH", "-1")],
            vec![("PROXY_URLS", "ftp://proxy:21")],
            vec![("LLM_ENDPOINT", "not a url")],
        ] {
            assert!(
                HarvestConfig::from_lookup(lookup(&pairs)).is_err(),
                "{:?} should be rejected",
                pairs
            );
        }
    }

    #[test]
    fn test_proxy_urls() {
        let config = HarvestConfig::from_lookup(lookup(&[
            ("PROXY_URLS", "http://a:1@p1.example:8000, socks5://p2.example:1080,"),
            ("PROXY_SELECTION", "random"),
            ("PROXY_REQUIRED", "true"),
        ]))
        .unwrap();
        assert_eq!(config.proxies.len(), 2);
        assert_eq!(config.proxy_selection, SelectionPolicy::Random);
        assert!(config.fetch.proxy_required);
        assert_eq!(config.proxy_pool().unwrap().len(), 2);
    }

    #[test]
    fn test_brightdata_endpoint() {
        let config = HarvestConfig::from_lookup(lookup(&[
            ("BRIGHTDATA_USER", "brd-customer-x"),
            ("BRIGHTDATA_PASS", "secret"),
            ("BRIGHTDATA_HOST", "brd.superproxy.io"),
            ("BRIGHTDATA_PORT", "33335"),
        ]))
        .unwrap();
        assert_eq!(config.proxies.len(), 1);
        assert_eq!(config.proxies[0].key(), "http://brd.superproxy.io:33335");
        assert_eq!(config.proxies[0].url().username(), "brd-customer-x");

        let partial = HarvestConfig::from_lookup(lookup(&[("BRIGHTDATA_USER", "brd-customer-x")]));
        assert_eq!(
            partial.unwrap_err(),
            ConfigError::MissingCredential("BRIGHTDATA_PASS".to_string())
        );
    }

    #[test]
    fn test_blank_values_count_as_unset() {
        let config = HarvestConfig::from_lookup(lookup(&[
            ("GOOGLE_PLACES_API_KEY", "  "),
            ("HARVEST_MAX_ATTEMPTS", ""),
        ]))
        .unwrap();
        assert!(config.google_places_api_key.is_none());
        assert_eq!(config.fetch.retry.max_attempts, 3);
    }
}
