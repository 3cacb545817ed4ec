#[cfg(feature = "browser")]
pub mod browser;
pub mod facebook;
pub mod google_places;
pub mod http_scraper;
pub mod hunter;
#[cfg(test)]
pub mod mock_scraper;

mod scraper;
pub use scraper::Scraper;
#[cfg(feature = "browser")]
pub use browser::{BrowserOptions, BrowserScraper};
pub use facebook::FacebookScraper;
pub use google_places::GooglePlacesScraper;
pub use http_scraper::HttpScraper;
pub use hunter::HunterScraper;
#[cfg(test)]
pub use mock_scraper::MockScraper;
