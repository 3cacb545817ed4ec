mod facebook;
mod hunter;
mod places;

pub use facebook::FacebookExtractor;
pub use hunter::HunterExtractor;
pub use places::GooglePlacesExtractor;
