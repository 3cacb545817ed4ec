use scraper::{Html, Selector};
use url::Url;

use crate::core::ScraperResult;
use crate::http::{FetchResponse, ResponseType};
use crate::parser::base::parse_selector;

/// Absolute http(s) links found in an HTML page, fragments removed, in
/// document order without duplicates.
pub struct LinkExtractor {
    anchors: Selector,
}

impl LinkExtractor {
    pub fn new() -> ScraperResult<Self> {
        Ok(Self {
            anchors: parse_selector("a[href]")?,
        })
    }

    pub fn links(&self, response: &FetchResponse) -> Vec<Url> {
        if response.response_type != ResponseType::Html {
            return Vec::new();
        }

        let document = Html::parse_document(&response.decoded_body);
        let mut links: Vec<Url> = Vec::new();
        for anchor in document.select(&self.anchors) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let Ok(mut link) = response.url.join(href.trim()) else {
                continue;
            };
            if !matches!(link.scheme(), "http" | "https") {
                continue;
            }
            link.set_fragment(None);
            if !links.contains(&link) {
                links.push(link);
            }
        }
        links
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::test_support::{html_response, json_response};
    use crate::http::Target;

    #[test]
    fn test_links_are_absolute_and_deduplicated() {
        let response = html_response(
            "https://www.myguidemacedonia.com/wellness/katlanovska-spa",
            r##"<a href="/wellness/tana-cosmetic">Tana</a>
               <a href="https://www.myguidemacedonia.com/wellness/tana-cosmetic#reviews">again</a>
               <a href="mailto:info@spa.mk">mail</a>
               <a href="javascript:void(0)">js</a>
               <a href="#top">top</a>
               <a href="https://swam.mk/about-swam/">SWAM</a>"##,
        );
        let links: Vec<String> = LinkExtractor::new()
            .unwrap()
            .links(&response)
            .into_iter()
            .map(String::from)
            .collect();

        assert_eq!(
            links,
            vec![
                "https://www.myguidemacedonia.com/wellness/tana-cosmetic",
                "https://www.myguidemacedonia.com/wellness/katlanovska-spa",
                "https://swam.mk/about-swam/",
            ]
        );
    }

    #[test]
    fn test_non_html_has_no_links() {
        let response = json_response(
            Target::url("https://api.example.com/x"),
            "https://api.example.com/x",
            r#"{"href": "<a href='https://a.mk/'>a</a>"}"#,
        );
        assert!(LinkExtractor::new().unwrap().links(&response).is_empty());
    }
}
