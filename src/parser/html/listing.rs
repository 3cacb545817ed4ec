use async_trait::async_trait;
use log::{debug, info};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::core::{ScraperError, ScraperResult};
use crate::http::FetchResponse;
use crate::parser::base::{parse_selector, Extractor};
use crate::parser::record::{non_empty, BusinessRecord};

/// CSS selectors for one directory site's result cards. Every selector
/// except `card` is evaluated inside a card.
///
/// Defaults match the zk.mk yellow pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingSelectors {
    pub card: String,
    pub name: String,
    pub address: String,
    pub place: String,
    pub phone: String,
    pub website: String,
    pub hours: String,
    /// Caption prefixes stripped from field text, e.g. "Address :".
    pub labels: Vec<String>,
    /// Evaluated on a listing's own profile page rather than a card.
    pub profile_phone: String,
    pub profile_email: String,
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            card: "div.result, .company-list-item, .business-card".to_string(),
            name: "h2.fontot a.companyname, .company-name, .business-title".to_string(),
            address: "ul.details li[origcaption='Адреса'], .company-address, .address".to_string(),
            place: "ul.details li[origcaption='Место']".to_string(),
            phone: "span[itemprop='telephone'], .company-phone, .phone".to_string(),
            website: "a[itemprop='url'], a.website".to_string(),
            hours: "li[origcaption='Работно време'] span.workingtime".to_string(),
            labels: vec![
                "Address :".to_string(),
                "Address:".to_string(),
                "Place:".to_string(),
                "Адреса:".to_string(),
                "Место:".to_string(),
            ],
            profile_phone: "span[itemprop='telephone']".to_string(),
            profile_email: "a[href^='mailto:']".to_string(),
        }
    }
}

impl ListingSelectors {
    pub fn from_json(raw: &str) -> ScraperResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

struct Compiled {
    card: Selector,
    name: Selector,
    address: Selector,
    place: Selector,
    phone: Selector,
    website: Selector,
    hours: Selector,
    profile_phone: Selector,
    profile_email: Selector,
}

/// Records from a directory results page, one per card.
pub struct ListingExtractor {
    selectors: Compiled,
    labels: Vec<String>,
    category: Option<String>,
}

impl ListingExtractor {
    pub fn new(selectors: ListingSelectors) -> ScraperResult<Self> {
        if selectors.card.trim().is_empty() {
            return Err(ScraperError::ExtractionError(
                "listing card selector is empty".to_string(),
            ));
        }

        Ok(Self {
            selectors: Compiled {
                card: parse_selector(&selectors.card)?,
                name: parse_selector(&selectors.name)?,
                address: parse_selector(&selectors.address)?,
                place: parse_selector(&selectors.place)?,
                phone: parse_selector(&selectors.phone)?,
                website: parse_selector(&selectors.website)?,
                hours: parse_selector(&selectors.hours)?,
                profile_phone: parse_selector(&selectors.profile_phone)?,
                profile_email: parse_selector(&selectors.profile_email)?,
            },
            labels: selectors.labels,
            category: None,
        })
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    fn field(&self, card: ElementRef<'_>, selector: &Selector) -> Option<String> {
        let element = card.select(selector).next()?;
        let text = element.text().collect::<String>();
        let mut text = text.trim();
        for label in &self.labels {
            if let Some(rest) = text.strip_prefix(label.as_str()) {
                text = rest;
                break;
            }
        }
        non_empty(text)
    }

    fn card_record(&self, card: ElementRef<'_>, response: &FetchResponse) -> Option<BusinessRecord> {
        let name = self.field(card, &self.selectors.name)?;
        let mut record = BusinessRecord {
            name: Some(name),
            category: self.category.clone(),
            address: self.field(card, &self.selectors.address),
            phone: self.field(card, &self.selectors.phone),
            source_url: Some(response.url.to_string()),
            ..BusinessRecord::default()
        };

        let link = |selector: &Selector| {
            card.select(selector)
                .find_map(|a| a.value().attr("href"))
                .and_then(|href| response.url.join(href).ok())
                .map(|url| url.to_string())
        };
        record.website = link(&self.selectors.website);
        if let Some(profile) = link(&self.selectors.name) {
            record.extra.insert("profile_url".to_string(), profile);
        }
        if let Some(place) = self.field(card, &self.selectors.place) {
            record.extra.insert("place".to_string(), place);
        }
        if let Some(hours) = self.field(card, &self.selectors.hours) {
            record.extra.insert("working_hours".to_string(), hours);
        }
        Some(record)
    }
}

#[async_trait]
impl Extractor for ListingExtractor {
    fn name(&self) -> &str {
        "listing"
    }

    async fn extract(&self, response: &FetchResponse) -> ScraperResult<Vec<BusinessRecord>> {
        let document = Html::parse_document(&response.decoded_body);
        let cards: Vec<ElementRef<'_>> = document.select(&self.selectors.card).collect();

        let records: Vec<BusinessRecord> = cards
            .iter()
            .filter_map(|card| self.card_record(*card, response))
            .collect();

        if records.len() < cards.len() {
            debug!(
                "Skipped {} card(s) without a name on {}",
                cards.len() - records.len(),
                response.url
            );
        }
        info!("Found {} listing(s) on {}", records.len(), response.url);
        Ok(records)
    }

    async fn extract_detail(&self, response: &FetchResponse) -> ScraperResult<Option<BusinessRecord>> {
        let document = Html::parse_document(&response.decoded_body);
        let phone = document
            .select(&self.selectors.profile_phone)
            .find_map(|span| non_empty(&span.text().collect::<String>()));
        let email = document.select(&self.selectors.profile_email).find_map(|a| {
            let href = a.value().attr("href")?;
            let address = href.strip_prefix("mailto:").unwrap_or(href);
            non_empty(address.split('?').next().unwrap_or_default())
        });

        if phone.is_none() && email.is_none() {
            debug!("No contact details on profile {}", response.url);
            return Ok(None);
        }
        Ok(Some(BusinessRecord {
            phone,
            email,
            ..BusinessRecord::default()
        }))
    }
}
