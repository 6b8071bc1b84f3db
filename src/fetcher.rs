//! The page-fetching capability the crawl controller drives.
//!
//! A [`FetchSession`] is one live browsing session (a browser tab, or a
//! cookie-keeping HTTP client). Sessions can die; the controller asks a
//! [`SessionFactory`] for a fresh one when that happens.

use std::time::Duration;
use thiserror::Error;

/// A background response captured while a page loaded.
#[derive(Debug, Clone, Default)]
pub struct CapturedResponse {
    pub url: String,
    pub content_type: String,
    pub body: String,
}

impl CapturedResponse {
    pub fn is_json(&self) -> bool {
        self.content_type.to_ascii_lowercase().contains("json")
    }
}

/// Everything the link extractor gets to see of a loaded page.
#[derive(Debug, Clone, Default)]
pub struct PageState {
    pub url: String,
    pub html: String,
    pub captured: Vec<CapturedResponse>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out loading {url}")]
    Timeout { url: String },

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("fetch session is no longer usable: {0}")]
    SessionInvalid(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("invalid selector {0:?}")]
    Selector(String),
}

impl FetchError {
    /// Errors that only spoil the current page. Everything else means the
    /// session itself can no longer be trusted.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Timeout { .. } | FetchError::Status { .. })
    }
}

pub trait FetchSession {
    fn is_alive(&self) -> bool;

    fn navigate(&mut self, url: &str) -> Result<(), FetchError>;

    /// Forget responses captured so far.
    fn clear_captured(&mut self);

    /// Click the consent button if it shows up within `timeout`.
    /// Returns whether something was dismissed.
    fn dismiss_overlay(&mut self, selector: &str, timeout: Duration) -> Result<bool, FetchError>;

    /// Returns `Ok(false)` when nothing matched before `timeout`.
    fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<bool, FetchError>;

    /// Sessions that never lazy-load content report `false` and are not scrolled.
    fn supports_scrolling(&self) -> bool {
        true
    }

    fn scroll_to_bottom(&mut self) -> Result<(), FetchError>;

    fn page_height(&mut self) -> Result<u64, FetchError>;

    /// Current rendered content plus the responses captured since the last clear.
    fn snapshot(&mut self) -> Result<PageState, FetchError>;

    fn close(&mut self);
}

pub trait SessionFactory {
    type Session: FetchSession;

    fn create(&mut self) -> Result<Self::Session, FetchError>;
}

/// Holds at most one session and closes it when replaced or dropped, so a
/// crawl never leaks its browser whichever way it ends.
pub struct SessionSlot<S: FetchSession> {
    session: Option<S>,
}

impl<S: FetchSession> SessionSlot<S> {
    pub fn empty() -> Self {
        Self { session: None }
    }

    pub fn is_occupied(&self) -> bool {
        self.session.is_some()
    }

    pub fn get(&self) -> Option<&S> {
        self.session.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut S> {
        self.session.as_mut()
    }

    pub fn replace(&mut self, session: S) -> &mut S {
        self.release();
        self.session.insert(session)
    }

    pub fn release(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }
}

impl<S: FetchSession> Drop for SessionSlot<S> {
    fn drop(&mut self) {
        self.release();
    }
}
