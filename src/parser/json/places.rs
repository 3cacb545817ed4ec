use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;

use crate::core::ScraperResult;
use crate::http::{FetchResponse, TargetKind};
use crate::parser::base::Extractor;
use crate::parser::record::{non_empty, BusinessRecord};

const MAPS_PLACE_URL: &str = "https://www.google.com/maps/place/?q=place_id:";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlacesPayload {
    results: Vec<Place>,
    result: Option<Place>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Place {
    place_id: Option<String>,
    name: Option<String>,
    formatted_address: Option<String>,
    vicinity: Option<String>,
    formatted_phone_number: Option<String>,
    international_phone_number: Option<String>,
    website: Option<String>,
    url: Option<String>,
    rating: Option<f64>,
    user_ratings_total: Option<u64>,
    business_status: Option<String>,
    types: Vec<String>,
}

/// Records from Places Text Search or Place Details payloads.
#[derive(Debug, Default, Clone)]
pub struct GooglePlacesExtractor;

impl GooglePlacesExtractor {
    pub fn new() -> Self {
        Self
    }
}

/// The keyword part of a "<keyword> in <city>, <country>" query.
fn query_category(response: &FetchResponse) -> Option<String> {
    if response.target.kind() != TargetKind::Query {
        return None;
    }
    let query = response.target.value();
    let keyword = query.split_once(" in ").map_or(query, |(keyword, _)| keyword);
    non_empty(keyword)
}

fn place_record(place: Place, category: Option<&String>, source_url: &str) -> Option<BusinessRecord> {
    let name = place.name.as_deref().and_then(non_empty)?;
    let text = |field: &Option<String>| field.as_deref().and_then(non_empty);

    let mut record = BusinessRecord {
        name: Some(name),
        category: category
            .cloned()
            .or_else(|| place.types.first().map(|t| t.replace('_', " "))),
        address: text(&place.formatted_address).or_else(|| text(&place.vicinity)),
        phone: text(&place.international_phone_number)
            .or_else(|| text(&place.formatted_phone_number)),
        website: text(&place.website),
        source_url: Some(source_url.to_string()),
        ..BusinessRecord::default()
    };

    let maps_url = text(&place.url).or_else(|| {
        place
            .place_id
            .as_ref()
            .map(|id| format!("{}{}", MAPS_PLACE_URL, id))
    });
    if let Some(maps_url) = maps_url {
        record.extra.insert("google_maps_url".to_string(), maps_url);
    }
    if let Some(id) = place.place_id {
        record.extra.insert("place_id".to_string(), id);
    }
    if let Some(rating) = place.rating {
        record.extra.insert("rating".to_string(), rating.to_string());
    }
    if let Some(total) = place.user_ratings_total {
        record.extra.insert("user_ratings_total".to_string(), total.to_string());
    }
    if let Some(status) = place.business_status {
        record.extra.insert("business_status".to_string(), status);
    }
    Some(record)
}

#[async_trait]
impl Extractor for GooglePlacesExtractor {
    fn name(&self) -> &str {
        "google_places"
    }

    async fn extract(&self, response: &FetchResponse) -> ScraperResult<Vec<BusinessRecord>> {
        let payload: PlacesPayload = serde_json::from_str(&response.decoded_body)?;
        let category = query_category(response);
        // The query string carries the API key, so only the target is recorded.
        let source = response.target.to_string();

        let places = payload.result.into_iter().chain(payload.results);
        let records: Vec<BusinessRecord> = places
            .filter_map(|place| place_record(place, category.as_ref(), &source))
            .collect();

        if records.is_empty() {
            debug!("No places in response for {}", response.target);
        } else {
            info!("Extracted {} place(s) for {}", records.len(), response.target);
        }
        Ok(records)
    }
}
