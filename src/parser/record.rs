use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One business listing as written to the sinks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessRecord {
    pub name: Option<String>,
    pub category: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub source_url: Option<String>,
    #[serde(default)]
    pub social_links: BTreeMap<String, String>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl BusinessRecord {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Core contact fields that are still empty.
    pub fn missing_core_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if is_blank(&self.phone) {
            missing.push("phone");
        }
        if is_blank(&self.address) {
            missing.push("address");
        }
        if is_blank(&self.category) {
            missing.push("category");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_core_fields().is_empty()
    }

    /// Copies fields from `other` only where this record has none. Existing
    /// values are never overwritten.
    pub fn fill_missing(&mut self, other: &BusinessRecord) {
        fill(&mut self.name, &other.name);
        fill(&mut self.category, &other.category);
        fill(&mut self.address, &other.address);
        fill(&mut self.phone, &other.phone);
        fill(&mut self.email, &other.email);
        fill(&mut self.website, &other.website);
        fill(&mut self.source_url, &other.source_url);
        for (network, link) in &other.social_links {
            self.social_links
                .entry(network.clone())
                .or_insert_with(|| link.clone());
        }
        for (key, value) in &other.extra {
            self.extra
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

fn is_blank(field: &Option<String>) -> bool {
    field.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn fill(field: &mut Option<String>, other: &Option<String>) {
    if is_blank(field) && !is_blank(other) {
        *field = other.clone();
    }
}

/// Collapses runs of whitespace (including non-breaking spaces) and trims.
pub fn clean_text(raw: &str) -> String {
    raw.split(|c: char| c.is_whitespace() || c == '\u{a0}')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// `Some(cleaned)` unless the text is empty or a placeholder.
pub fn non_empty(raw: &str) -> Option<String> {
    let cleaned = clean_text(raw);
    match cleaned.as_str() {
        "" | "N/A" | "n/a" | "-" => None,
        _ => Some(cleaned),
    }
}
