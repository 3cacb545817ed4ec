use async_trait::async_trait;
use log::info;
use serde::Deserialize;

use crate::core::ScraperResult;
use crate::http::FetchResponse;
use crate::parser::base::Extractor;
use crate::parser::record::{non_empty, BusinessRecord};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GraphPage {
    data: Vec<GraphPlace>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GraphPlace {
    id: Option<String>,
    name: Option<String>,
    category_list: Vec<GraphCategory>,
    phone: Option<String>,
    emails: Vec<String>,
    website: Option<String>,
    link: Option<String>,
    location: Option<GraphLocation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GraphCategory {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GraphLocation {
    street: Option<String>,
    city: Option<String>,
}

impl GraphLocation {
    fn address(&self) -> Option<String> {
        let street = self.street.as_deref().and_then(non_empty);
        let city = self.city.as_deref().and_then(non_empty);
        match (street, city) {
            (Some(street), Some(city)) if !street.contains(&city) => {
                Some(format!("{}, {}", street, city))
            }
            (Some(street), _) => Some(street),
            (None, city) => city,
        }
    }
}

/// Records from a Graph API place search.
#[derive(Debug, Default, Clone)]
pub struct FacebookExtractor;

impl FacebookExtractor {
    pub fn new() -> Self {
        Self
    }
}

fn graph_record(place: GraphPlace, source: &str) -> Option<BusinessRecord> {
    let text = |field: &Option<String>| field.as_deref().and_then(non_empty);
    let name = text(&place.name)?;

    let mut record = BusinessRecord {
        name: Some(name),
        category: place
            .category_list
            .first()
            .and_then(|c| c.name.as_deref())
            .and_then(non_empty),
        address: place.location.as_ref().and_then(GraphLocation::address),
        phone: text(&place.phone),
        email: place.emails.first().and_then(|e| non_empty(e)),
        website: text(&place.website),
        source_url: Some(source.to_string()),
        ..BusinessRecord::default()
    };
    if let Some(link) = text(&place.link) {
        record.social_links.insert("facebook".to_string(), link);
    }
    if let Some(id) = place.id {
        record.extra.insert("facebook_id".to_string(), id);
    }
    Some(record)
}

#[async_trait]
impl Extractor for FacebookExtractor {
    fn name(&self) -> &str {
        "facebook"
    }

    async fn extract(&self, response: &FetchResponse) -> ScraperResult<Vec<BusinessRecord>> {
        let page: GraphPage = serde_json::from_str(&response.decoded_body)?;
        let source = response.target.to_string();

        let records: Vec<BusinessRecord> = page
            .data
            .into_iter()
            .filter_map(|place| graph_record(place, &source))
            .collect();
        info!("Extracted {} page(s) for {}", records.len(), response.target);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Target;
    use crate::parser::test_support::json_response;

    #[tokio::test]
    async fn test_graph_search_results() {
        let body = r#"{
            "data": [
                {
                    "id": "1001",
                    "name": "Wellness Center Struga",
                    "category_list": [{"id": "1", "name": "Spa"}, {"id": "2", "name": "Gym"}],
                    "phone": "+389 46 780 000",
                    "emails": ["hello@wellness-struga.mk"],
                    "link": "https://www.facebook.com/wellnessstruga",
                    "location": {"street": "Goce Delčev 4", "city": "Struga"}
                },
                {
                    "name": "Massage Ohrid",
                    "location": {"city": "Ohrid"}
                }
            ],
            "paging": {}
        }"#;
        let response = json_response(
            Target::query("spa in Struga, Macedonia"),
            "https://graph.facebook.com/v15.0/search?type=place",
            body,
        );
        let records = FacebookExtractor::new().extract(&response).await.unwrap();

        assert_eq!(records.len(), 2);
        let first = &records[0];
        assert_eq!(first.category.as_deref(), Some("Spa"));
        assert_eq!(first.email.as_deref(), Some("hello@wellness-struga.mk"));
        assert_eq!(first.address.as_deref(), Some("Goce Delčev 4, Struga"));
        assert_eq!(
            first.social_links["facebook"],
            "https://www.facebook.com/wellnessstruga"
        );
        assert_eq!(first.extra["facebook_id"], "1001");

        let second = &records[1];
        assert_eq!(second.address.as_deref(), Some("Ohrid"));
        assert!(second.category.is_none());
        assert!(second.email.is_none());
    }
}
