pub mod base;
pub mod enrich;
pub mod html;
pub mod json;
pub mod record;

pub use base::Extractor;
pub use enrich::EnrichingExtractor;
pub use html::{LinkExtractor, ListingExtractor, ListingSelectors, PageExtractor};
pub use json::{FacebookExtractor, GooglePlacesExtractor, HunterExtractor};
pub use record::BusinessRecord;
