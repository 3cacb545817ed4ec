pub mod config;
pub mod core;
pub mod http;
pub mod llm;
pub mod parser;
pub mod presets;
pub mod proxy;
pub mod rate_limit;
pub mod scrapers;
pub mod stats;
pub mod storage;

pub use config::HarvestConfig;
pub use core::{
    ConfigError, FetchErrorKind, FetchFailure, FetchLoop, FetchLoopConfig, FollowConfig,
    HarvestSummary, Harvester, ScraperError, ScraperResult,
};
pub use http::{FetchOutcome, FetchResponse, Target};
pub use parser::{BusinessRecord, Extractor};
pub use proxy::{ProxyEndpoint, ProxyPool};
pub use scrapers::Scraper;
pub use stats::StatsTracker;
pub use storage::{CsvStorage, DiskStorage, StorageManager};
