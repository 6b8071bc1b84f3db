use crate::fetcher::PageState;
use crate::portal::PortalProfile;
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use reqwest::Url;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::BTreeSet;

/// Links found on one page, split by where they were seen.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ExtractedLinks {
    pub dom: BTreeSet<String>,
    pub structured: BTreeSet<String>,
}

impl ExtractedLinks {
    /// Union of both sources in lexicographic order.
    pub fn merged(self) -> Vec<String> {
        let mut all = self.dom;
        all.extend(self.structured);
        all.into_iter().collect()
    }
}

/// Drop the query string (and fragment) so tracking parameters do not make
/// the same listing look like two.
pub fn strip_query(url: &str) -> String {
    let end = url.find(|c| c == '?' || c == '#').unwrap_or(url.len());
    url[..end].trim().to_string()
}

pub struct LinkExtractor {
    anchor_selector: Selector,
    detail_pattern: Regex,
    container_fields: Vec<String>,
    url_fields: Vec<String>,
}

impl LinkExtractor {
    pub fn new(profile: &PortalProfile) -> Result<Self> {
        let anchor_selector = Selector::parse("a[href]")
            .map_err(|e| anyhow!("Failed to parse link selector: {:?}", e))?;
        let detail_pattern = Regex::new(&profile.detail_pattern)
            .with_context(|| format!("Invalid detail pattern for {}", profile.name))?;

        Ok(Self {
            anchor_selector,
            detail_pattern,
            container_fields: profile.container_fields.clone(),
            url_fields: profile.url_fields.clone(),
        })
    }

    pub fn extract(&self, page: &PageState) -> ExtractedLinks {
        ExtractedLinks {
            dom: self.dom_links(page),
            structured: self.structured_links(page),
        }
    }

    fn dom_links(&self, page: &PageState) -> BTreeSet<String> {
        let document = Html::parse_document(&page.html);
        let base = Url::parse(&page.url).ok();

        let mut links = BTreeSet::new();
        for element in document.select(&self.anchor_selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            let href = href.trim();

            // Relative hrefs are resolved against the page they were found on
            let absolute = if href.starts_with("http") {
                href.to_string()
            } else {
                match base.as_ref().and_then(|b| b.join(href).ok()) {
                    Some(url) => url.to_string(),
                    None => continue,
                }
            };

            if self.detail_pattern.is_match(&absolute) {
                let link = strip_query(&absolute);
                if !link.is_empty() {
                    links.insert(link);
                }
            }
        }

        links
    }

    fn structured_links(&self, page: &PageState) -> BTreeSet<String> {
        let mut links = BTreeSet::new();

        for response in page.captured.iter().filter(|r| r.is_json()) {
            let data: Value = match serde_json::from_str(&response.body) {
                Ok(data) => data,
                Err(e) => {
                    tracing::debug!("Skipping unparseable response from {}: {}", response.url, e);
                    continue;
                }
            };

            for item in self.containers(&data).flatten() {
                if let Some(url) = self.item_url(item) {
                    if url.starts_with("http") {
                        links.insert(strip_query(url));
                    }
                }
            }
        }

        links
    }

    /// Every configured container field of `data` that holds an array.
    fn containers<'a>(&'a self, data: &'a Value) -> impl Iterator<Item = &'a Vec<Value>> + 'a {
        self.container_fields
            .iter()
            .filter_map(move |field| data.get(field).and_then(Value::as_array))
    }

    fn item_url<'a>(&self, item: &'a Value) -> Option<&'a str> {
        self.url_fields
            .iter()
            .find_map(|field| item.get(field).and_then(Value::as_str).filter(|s| !s.is_empty()))
    }
}
