use async_trait::async_trait;
use log::{debug, trace};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::core::{ScraperError, ScraperResult};
use crate::http::FetchResponse;
use crate::parser::base::{parse_selector, Extractor};
use crate::parser::record::{clean_text, non_empty, BusinessRecord};

const EMAIL_PATTERN: &str = r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}";
const PHONE_PATTERN: &str = r"\+?\d[\d\s/().-]{6,18}\d";

const SOCIAL_NETWORKS: [(&str, &[&str]); 4] = [
    ("facebook", &["facebook.com", "fb.com"]),
    ("instagram", &["instagram.com"]),
    ("twitter", &["twitter.com", "x.com"]),
    ("linkedin", &["linkedin.com"]),
];

/// Heuristic fields from a single business website page.
pub struct PageExtractor {
    site_name: Selector,
    heading: Selector,
    title: Selector,
    links: Selector,
    address: Selector,
    body: Selector,
    email_re: Regex,
    phone_re: Regex,
    category: Option<String>,
}

impl PageExtractor {
    pub fn new() -> ScraperResult<Self> {
        Ok(Self {
            site_name: parse_selector("meta[property='og:site_name']")?,
            heading: parse_selector("h1")?,
            title: parse_selector("title")?,
            links: parse_selector("a[href]")?,
            address: parse_selector("address, [itemprop='address'], .address")?,
            body: parse_selector("body")?,
            email_re: compile(EMAIL_PATTERN)?,
            phone_re: compile(PHONE_PATTERN)?,
            category: None,
        })
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    fn business_name(&self, document: &Html) -> Option<String> {
        document
            .select(&self.site_name)
            .find_map(|meta| meta.value().attr("content").and_then(non_empty))
            .or_else(|| first_text(document, &self.heading))
            .or_else(|| first_text(document, &self.title))
    }

    fn address(&self, document: &Html, body_text: &str) -> Option<String> {
        if let Some(address) = first_text(document, &self.address) {
            return Some(address);
        }

        // "Address: ul. Partizanska 5, Bitola" style labels in free text
        body_text.split(['\n', '|']).find_map(|line| {
            let lower = line.to_lowercase();
            let start = lower.find("address").or_else(|| lower.find("адреса"))?;
            let after = line.get(start..)?.split_once(':').map(|(_, rest)| rest)?;
            non_empty(after)
        })
    }
}

pub(crate) fn compile(pattern: &str) -> ScraperResult<Regex> {
    Regex::new(pattern).map_err(|e| ScraperError::ExtractionError(e.to_string()))
}

fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .find_map(|element| non_empty(&element.text().collect::<String>()))
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join("\n")
}

fn digit_count(candidate: &str) -> usize {
    candidate.chars().filter(|c| c.is_ascii_digit()).count()
}

fn find_email(re: &Regex, text: &str) -> Option<String> {
    re.find(text).map(|m| m.as_str().to_string())
}

fn find_phone(re: &Regex, text: &str) -> Option<String> {
    re.find_iter(text)
        .map(|m| clean_text(m.as_str()))
        .find(|candidate| (8..=15).contains(&digit_count(candidate)))
}

fn social_network(href: &str) -> Option<&'static str> {
    let host = Url::parse(href).ok()?.host_str()?.trim_start_matches("www.").to_string();
    SOCIAL_NETWORKS
        .iter()
        .find(|(_, domains)| {
            domains
                .iter()
                .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
        })
        .map(|(network, _)| *network)
}

fn is_maps_link(href: &str) -> bool {
    href.contains("maps.google.") || href.contains("google.com/maps") || href.contains("goo.gl/maps")
}

#[async_trait]
impl Extractor for PageExtractor {
    fn name(&self) -> &str {
        "page"
    }

    async fn extract(&self, response: &FetchResponse) -> ScraperResult<Vec<BusinessRecord>> {
        let document = Html::parse_document(&response.decoded_body);
        let body_text = document
            .select(&self.body)
            .next()
            .map(element_text)
            .unwrap_or_default();
        trace!("Page text for {}: {}", response.url, body_text);

        let mut record = BusinessRecord {
            name: self.business_name(&document),
            category: self.category.clone(),
            website: Some(response.url.origin().ascii_serialization()),
            source_url: Some(response.url.to_string()),
            ..BusinessRecord::default()
        };

        for link in document.select(&self.links) {
            let Some(href) = link.value().attr("href").map(str::trim) else {
                continue;
            };

            if let Some(address) = href.strip_prefix("mailto:") {
                let address = address.split('?').next().unwrap_or_default();
                if record.email.is_none() {
                    record.email = non_empty(address);
                }
            } else if let Some(number) = href.strip_prefix("tel:") {
                if record.phone.is_none() {
                    record.phone = non_empty(number);
                }
            } else if let Ok(absolute) = response.url.join(href) {
                let absolute = absolute.to_string();
                if is_maps_link(&absolute) {
                    record
                        .extra
                        .entry("google_maps_url".to_string())
                        .or_insert(absolute);
                } else if let Some(network) = social_network(&absolute) {
                    record
                        .social_links
                        .entry(network.to_string())
                        .or_insert(absolute);
                }
            }
        }

        if record.email.is_none() {
            record.email = find_email(&self.email_re, &body_text);
        }
        if record.phone.is_none() {
            record.phone = find_phone(&self.phone_re, &body_text);
        }
        record.address = self.address(&document, &body_text);

        // The origin alone is not a finding.
        let found = record.name.is_some()
            || record.phone.is_some()
            || record.email.is_some()
            || record.address.is_some()
            || !record.social_links.is_empty();
        if !found {
            debug!("No business details found on {}", response.url);
            return Ok(Vec::new());
        }
        Ok(vec![record])
    }
}
