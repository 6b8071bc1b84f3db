use chrono::{DateTime, Local};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// One listing URL as it is persisted: the CSV columns are `locality,page,url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub locality: String,
    #[serde(rename = "page")]
    pub page_number: u32,
    pub url: String,
}

impl ListingRecord {
    pub fn new(locality: &str, page_number: u32, url: &str) -> Self {
        Self {
            locality: locality.to_string(),
            page_number,
            url: url.to_string(),
        }
    }
}

/// Inclusive bounds for a randomized pause.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    pub const ZERO: DelayRange = DelayRange {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    pub fn from_secs(min: f64, max: f64) -> Self {
        Self {
            min: Duration::from_secs_f64(min.max(0.0)),
            max: Duration::from_secs_f64(max.max(min).max(0.0)),
        }
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        rng.gen_range(self.min..=self.max)
    }
}

/// The search a single crawl walks through, page by page.
///
/// `base_url` may carry `{locality}` and `{page}` placeholders. Without a
/// `{page}` placeholder the page index is appended as a `page` query parameter.
#[derive(Debug, Clone)]
pub struct CrawlQuery {
    pub base_url: String,
    pub locality: String,
    /// `None` crawls until a stop heuristic fires.
    pub max_pages: Option<u32>,
    pub delay: DelayRange,
    pub run_id: String,
}

impl CrawlQuery {
    pub fn page_url(&self, page: u32) -> String {
        let base = self
            .base_url
            .replace("{locality}", &urlencoding::encode(&self.locality));

        if base.contains("{page}") {
            base.replace("{page}", &page.to_string())
        } else if base.contains('?') {
            format!("{}&page={}", base, page)
        } else {
            format!("{}?page={}", base, page)
        }
    }

    /// Namespace shared by the run directory and every file inside it.
    pub fn filename_base(&self) -> String {
        format!("{}_{}", slug(&self.locality), self.run_id)
    }
}

fn slug(label: &str) -> String {
    let slug: String = label
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c.to_ascii_lowercase() } else { '-' })
        .collect();
    if slug.is_empty() {
        "all".to_string()
    } else {
        slug
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    Ok,
    Timeout,
    SessionLost,
}

impl fmt::Display for PageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageOutcome::Ok => write!(f, "ok"),
            PageOutcome::Timeout => write!(f, "timeout"),
            PageOutcome::SessionLost => write!(f, "session-lost"),
        }
    }
}

/// What one page visit produced. Links are deduplicated and sorted so two
/// results with the same set compare equal regardless of discovery order.
#[derive(Debug, Clone)]
pub struct PageResult {
    pub page: u32,
    pub links: Vec<String>,
    pub fetched_at: DateTime<Local>,
    pub outcome: PageOutcome,
}

impl PageResult {
    pub fn new<I>(page: u32, links: I, outcome: PageOutcome) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let links: BTreeSet<String> = links
            .into_iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();

        Self {
            page,
            links: links.into_iter().collect(),
            fetched_at: Local::now(),
            outcome,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn records(&self, locality: &str) -> Vec<ListingRecord> {
        self.links
            .iter()
            .map(|url| ListingRecord::new(locality, self.page, url))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Too many pages in a row without any detail link.
    Empty,
    /// Too many pages in a row repeating the previous page.
    Duplicate,
    /// The configured page limit was reached.
    Limit,
    /// The fetch session could not be recovered.
    SessionLoss,
    /// A caller asked the crawl to stop between pages.
    Cancelled,
}

impl StopReason {
    /// Whether the crawl ran until the result set looked exhausted or the limit.
    pub fn is_natural(&self) -> bool {
        matches!(self, StopReason::Empty | StopReason::Duplicate | StopReason::Limit)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StopReason::Empty => "consecutive empty pages",
            StopReason::Duplicate => "consecutive identical pages",
            StopReason::Limit => "page limit reached",
            StopReason::SessionLoss => "fetch session lost",
            StopReason::Cancelled => "cancelled",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    pub run_id: String,
    pub locality: String,
    pub pages_visited: u32,
    pub unique_listings: usize,
    pub stop_reason: StopReason,
    pub finished_at: DateTime<Local>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(base_url: &str) -> CrawlQuery {
        CrawlQuery {
            base_url: base_url.to_string(),
            locality: "Sint-Gillis Waas".to_string(),
            max_pages: None,
            delay: DelayRange::ZERO,
            run_id: "20250101_1200".to_string(),
        }
    }

    #[test]
    fn test_page_url_appends_to_existing_query() {
        let q = query("https://immovlan.be/en/real-estate?transactiontypes=for-sale");
        assert_eq!(
            q.page_url(3),
            "https://immovlan.be/en/real-estate?transactiontypes=for-sale&page=3"
        );
    }

    #[test]
    fn test_page_url_without_query() {
        let q = query("https://immovlan.be/en/real-estate");
        assert_eq!(q.page_url(1), "https://immovlan.be/en/real-estate?page=1");
    }

    #[test]
    fn test_page_url_placeholders() {
        let q = query("https://site.test/search/{locality}/p{page}");
        assert_eq!(q.page_url(7), "https://site.test/search/Sint-Gillis%20Waas/p7");
    }

    #[test]
    fn test_filename_base_is_path_safe() {
        let q = query("https://site.test");
        assert_eq!(q.filename_base(), "sint-gillis-waas_20250101_1200");
    }

    #[test]
    fn test_page_result_sorts_and_dedups() {
        let result = PageResult::new(
            2,
            vec![
                "https://s/b".to_string(),
                " https://s/a ".to_string(),
                "https://s/b".to_string(),
                "".to_string(),
            ],
            PageOutcome::Ok,
        );
        assert_eq!(result.links, vec!["https://s/a", "https://s/b"]);
        let records = result.records("gent");
        assert_eq!(records[0], ListingRecord::new("gent", 2, "https://s/a"));
    }

    #[test]
    fn test_delay_range_sample_within_bounds() {
        let range = DelayRange::from_secs(0.01, 0.02);
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let d = range.sample(&mut rng);
            assert!(d >= range.min && d <= range.max);
        }
        assert_eq!(DelayRange::ZERO.sample(&mut rng), Duration::ZERO);
    }
}
