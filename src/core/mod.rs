mod errors;
pub mod fetching;
pub mod follow;
pub mod harvester;
pub mod retry;

pub use errors::{
    ConfigError, Disposition, FetchErrorKind, FetchFailure, ScraperError, ScraperResult,
};
pub use fetching::{FetchLoop, FetchLoopConfig};
pub use follow::FollowConfig;
pub use harvester::{HarvestSummary, Harvester};
