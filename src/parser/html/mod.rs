mod links;
mod listing;
mod page;

pub use links::LinkExtractor;
pub use listing::{ListingExtractor, ListingSelectors};
pub use page::PageExtractor;
