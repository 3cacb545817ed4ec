pub(crate) mod request;
pub(crate) mod response;

pub use request::{FetchRequest, Target, TargetKind};
pub use response::{detect_content_type, FetchOutcome, FetchResponse, FetchResult, ResponseType};
