//! A [`FetchSession`] backed by a blocking HTTP client.
//!
//! There is no browser behind it: pages are not rendered, nothing is lazy
//! loaded and there is no consent overlay to click. Structured responses are
//! taken from JSON script blocks embedded in the page instead of network
//! capture.

use crate::fetcher::{CapturedResponse, FetchError, FetchSession, PageState, SessionFactory};
use reqwest::blocking::Client;
use scraper::{Html, Selector};
use std::time::Duration;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36";

const EMBEDDED_JSON_SELECTOR: &str =
    r#"script[type="application/json"], script[type="application/ld+json"], script#__NEXT_DATA__"#;

/// Ad, analytics and tracking hosts that are never worth a request.
pub const BLOCKED_DOMAINS: &[&str] = &[
    "doubleclick.net",
    "googletagmanager.com",
    "google-analytics.com",
    "smartadserver.com",
    "optimizely.com",
    "facebook.net",
    "adsafeprotected.com",
    "pubmatic.com",
    "adservice.google.com",
    "adservice.google.be",
    "pagead2.googlesyndication.com",
    "api-image.immovlan.be",
    "xiti.com",
    "privacy-center.com",
    "accounts.google.com",
];

pub fn is_blocked(url: &str) -> bool {
    let url = url.to_lowercase();
    BLOCKED_DOMAINS.iter().any(|domain| url.contains(domain))
}

#[derive(Debug, Clone)]
pub struct HttpSessionFactory {
    pub timeout: Duration,
    pub user_agent: String,
}

impl HttpSessionFactory {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

impl SessionFactory for HttpSessionFactory {
    type Session = HttpFetchSession;

    fn create(&mut self) -> Result<HttpFetchSession, FetchError> {
        let client = Client::builder()
            .cookie_store(true)
            .user_agent(self.user_agent.as_str())
            .timeout(self.timeout)
            .build()
            .map_err(|e| FetchError::SessionInvalid(format!("failed to build HTTP client: {}", e)))?;

        tracing::debug!("Started HTTP fetch session");
        Ok(HttpFetchSession {
            client: Some(client),
            page: PageState::default(),
        })
    }
}

pub struct HttpFetchSession {
    client: Option<Client>,
    page: PageState,
}

impl HttpFetchSession {
    fn client(&self) -> Result<&Client, FetchError> {
        self.client
            .as_ref()
            .ok_or_else(|| FetchError::SessionInvalid("session closed".to_string()))
    }
}

/// JSON script blocks in `html`, each treated as one captured response.
pub fn embedded_json(url: &str, html: &str) -> Vec<CapturedResponse> {
    let Ok(selector) = Selector::parse(EMBEDDED_JSON_SELECTOR) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);

    document
        .select(&selector)
        .map(|script| CapturedResponse {
            url: url.to_string(),
            content_type: script
                .value()
                .attr("type")
                .unwrap_or("application/json")
                .to_string(),
            body: script.text().collect::<String>(),
        })
        .filter(|response| !response.body.trim().is_empty())
        .collect()
}

impl FetchSession for HttpFetchSession {
    fn is_alive(&self) -> bool {
        self.client.is_some()
    }

    fn navigate(&mut self, url: &str) -> Result<(), FetchError> {
        if is_blocked(url) {
            return Err(FetchError::Navigation {
                url: url.to_string(),
                reason: "blocked domain".to_string(),
            });
        }

        let response = self.client()?.get(url).send().map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout { url: url.to_string() }
            } else {
                FetchError::Navigation {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().to_string();
        let html = response.text().map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout { url: url.to_string() }
            } else {
                FetchError::Navigation {
                    url: url.to_string(),
                    reason: format!("failed to read body: {}", e),
                }
            }
        })?;

        self.page.captured.extend(embedded_json(&final_url, &html));
        self.page.url = final_url;
        self.page.html = html;
        Ok(())
    }

    fn clear_captured(&mut self) {
        self.page.captured.clear();
    }

    fn dismiss_overlay(&mut self, _selector: &str, _timeout: Duration) -> Result<bool, FetchError> {
        self.client()?;
        Ok(false)
    }

    fn wait_for_selector(&mut self, selector: &str, _timeout: Duration) -> Result<bool, FetchError> {
        self.client()?;
        let parsed =
            Selector::parse(selector).map_err(|_| FetchError::Selector(selector.to_string()))?;
        let document = Html::parse_document(&self.page.html);
        let found = document.select(&parsed).next().is_some();
        Ok(found)
    }

    fn supports_scrolling(&self) -> bool {
        false
    }

    fn scroll_to_bottom(&mut self) -> Result<(), FetchError> {
        self.client()?;
        Ok(())
    }

    fn page_height(&mut self) -> Result<u64, FetchError> {
        self.client()?;
        Ok(self.page.html.len() as u64)
    }

    fn snapshot(&mut self) -> Result<PageState, FetchError> {
        self.client()?;
        Ok(self.page.clone())
    }

    fn close(&mut self) {
        if self.client.take().is_some() {
            tracing::debug!("Closed HTTP fetch session");
        }
        self.page = PageState::default();
    }
}
