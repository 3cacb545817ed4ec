use crate::core::FetchErrorKind;
use crate::http::{FetchRequest, FetchResponse, Target};
use async_trait::async_trait;
use url::Url;

/// Transport for a single attempt. Retry, spacing and ordering live in the
/// fetch loop; a scraper only turns a resolved request into a response.
#[async_trait]
pub trait Scraper: Send + Sync {
    fn name(&self) -> &str;

    /// Turns a target into the URL to request. Errors here are permanent.
    fn resolve(&self, target: &Target) -> Result<Url, FetchErrorKind> {
        target.parse_url()
    }

    /// Performs one attempt. Non-2xx statuses are returned as responses;
    /// only transport problems are errors.
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchErrorKind>;

    /// Vendor-level failure hidden inside an otherwise successful response,
    /// e.g. an API error status carried in a JSON body.
    fn classify(&self, _response: &FetchResponse) -> Option<FetchErrorKind> {
        None
    }
}
