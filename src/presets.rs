//! Default search keywords and locations for wellness businesses in
//! North Macedonia.

use crate::http::Target;

pub const DEFAULT_COUNTRY: &str = "Macedonia";

pub const KEYWORDS: [&str; 8] = [
    "beauty salon",
    "spa",
    "nail salon",
    "barber shop",
    "weight loss clinic",
    "massage therapist",
    "dentist",
    "counseling center",
];

pub const CITIES: [&str; 34] = [
    "Skopje",
    "Bitola",
    "Kumanovo",
    "Prilep",
    "Tetovo",
    "Veles",
    "Ohrid",
    "Gostivar",
    "Štip",
    "Strumica",
    "Kavadarci",
    "Kočani",
    "Kičevo",
    "Struga",
    "Radoviš",
    "Gevgelija",
    "Debar",
    "Kriva Palanka",
    "Sveti Nikole",
    "Negotino",
    "Delčevo",
    "Vinica",
    "Resen",
    "Berovo",
    "Probištip",
    "Kratovo",
    "Bogdanci",
    "Kruševo",
    "Makedonski Brod",
    "Dojran",
    "Valandovo",
    "Demir Hisar",
    "Pehčevo",
    "Demir Kapija",
];

/// One query per city and keyword, city-major, as
/// "<keyword> in <city>, <country>".
pub fn build_queries<K, C>(keywords: &[K], cities: &[C], country: &str) -> Vec<Target>
where
    K: AsRef<str>,
    C: AsRef<str>,
{
    cities
        .iter()
        .flat_map(|city| {
            keywords.iter().map(move |keyword| {
                Target::query(format!(
                    "{} in {}, {}",
                    keyword.as_ref().trim(),
                    city.as_ref().trim(),
                    country
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_queries() {
        let queries = build_queries(&["spa", "dentist"], &["Ohrid", "Štip"], DEFAULT_COUNTRY);
        let values: Vec<&str> = queries.iter().map(Target::value).collect();
        assert_eq!(
            values,
            vec![
                "spa in Ohrid, Macedonia",
                "dentist in Ohrid, Macedonia",
                "spa in Štip, Macedonia",
                "dentist in Štip, Macedonia",
            ]
        );
    }

    #[test]
    fn test_full_preset_size() {
        assert_eq!(build_queries(&KEYWORDS, &CITIES, DEFAULT_COUNTRY).len(), 8 * 34);
    }
}
