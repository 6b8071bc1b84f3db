//! Paginated crawl of one search query.
//!
//! Each page goes through fetch, settle (consent, link wait, scroll), extract
//! and classify. Classification decides whether the result set looks
//! exhausted: some portals return empty pages past the end, others keep
//! repeating the last valid page, so both signals are tracked separately.

use crate::fetcher::{FetchError, FetchSession, SessionFactory, SessionSlot};
use crate::link_extractor::LinkExtractor;
use crate::models::{
    CrawlOutcome, CrawlQuery, DelayRange, ListingRecord, PageOutcome, PageResult, StopReason,
};
use crate::portal::PortalProfile;
use crate::recorder::RunRecorder;
use crate::tui::{CrawlTUI, PageMark};
use anyhow::Result;
use chrono::Local;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub max_empty_pages: u32,
    pub max_identical_pages: u32,
    pub consent_timeout: Duration,
    pub link_wait_timeout: Duration,
    pub scroll_delay: DelayRange,
    /// Upper bound on scroll rounds for pages that never stop growing.
    pub max_scroll_rounds: u32,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            max_empty_pages: 3,
            max_identical_pages: 10,
            consent_timeout: Duration::from_secs(5),
            link_wait_timeout: Duration::from_secs(10),
            scroll_delay: DelayRange::from_secs(1.5, 2.5),
            max_scroll_rounds: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageClass {
    Empty,
    Identical,
    Novel,
}

impl From<PageClass> for PageMark {
    fn from(class: PageClass) -> Self {
        match class {
            PageClass::Empty => PageMark::Empty,
            PageClass::Identical => PageMark::Identical,
            PageClass::Novel => PageMark::Novel,
        }
    }
}

/// Everything a crawl remembers between pages.
#[derive(Debug)]
pub struct CrawlState {
    pub page: u32,
    pub pages_visited: u32,
    pub consecutive_empty: u32,
    pub consecutive_identical: u32,
    pub session_healthy: bool,
    records: Vec<ListingRecord>,
    seen: HashSet<String>,
    last_links: Vec<String>,
}

impl Default for CrawlState {
    fn default() -> Self {
        Self {
            page: 0,
            pages_visited: 0,
            consecutive_empty: 0,
            consecutive_identical: 0,
            session_healthy: true,
            records: Vec::new(),
            seen: HashSet::new(),
            last_links: Vec::new(),
        }
    }
}

impl CrawlState {
    /// Classify a page's sorted link list against the previous page and
    /// update the counters. Exactly one counter moves per page; a novel page
    /// resets both.
    pub fn classify(&mut self, links: &[String]) -> PageClass {
        let class = if !links.is_empty() && links == self.last_links.as_slice() {
            self.consecutive_identical += 1;
            PageClass::Identical
        } else if links.is_empty() {
            self.consecutive_empty += 1;
            PageClass::Empty
        } else {
            self.consecutive_empty = 0;
            self.consecutive_identical = 0;
            PageClass::Novel
        };

        self.last_links = links.to_vec();
        class
    }

    /// Add the URLs not seen before, tagged with the page they first showed
    /// up on. Returns how many were new.
    pub fn admit(&mut self, locality: &str, page: u32, links: &[String]) -> usize {
        let mut added = 0;
        for url in links {
            if self.seen.insert(url.clone()) {
                self.records.push(ListingRecord::new(locality, page, url));
                added += 1;
            }
        }
        added
    }

    pub fn records(&self) -> &[ListingRecord] {
        &self.records
    }

    pub fn contains(&self, url: &str) -> bool {
        self.seen.contains(url)
    }

    pub fn unique_listings(&self) -> usize {
        self.records.len()
    }
}

pub struct CrawlController<F: SessionFactory, R: RunRecorder> {
    query: CrawlQuery,
    settings: CrawlSettings,
    profile: PortalProfile,
    extractor: LinkExtractor,
    factory: F,
    recorder: R,
    cancel: Arc<AtomicBool>,
    state: CrawlState,
}

impl<F: SessionFactory, R: RunRecorder> CrawlController<F, R> {
    pub fn new(
        query: CrawlQuery,
        settings: CrawlSettings,
        profile: PortalProfile,
        factory: F,
        recorder: R,
    ) -> Result<Self> {
        let extractor = LinkExtractor::new(&profile)?;
        Ok(Self {
            query,
            settings,
            profile,
            extractor,
            factory,
            recorder,
            cancel: Arc::new(AtomicBool::new(false)),
            state: CrawlState::default(),
        })
    }

    /// Share a stop flag with the caller. It is only checked between pages.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn state(&self) -> &CrawlState {
        &self.state
    }

    pub fn records(&self) -> &[ListingRecord] {
        self.state.records()
    }

    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    pub fn query(&self) -> &CrawlQuery {
        &self.query
    }

    /// Crawl until a stop condition, then write the final aggregate. Fetch
    /// and persistence problems never escape; they end up in the outcome and
    /// the run log.
    pub fn run(&mut self, mut tui: Option<&mut CrawlTUI>) -> CrawlOutcome {
        self.state = CrawlState::default();
        info!("Scraping locality: {}", self.query.locality);

        if let Some(tui) = tui.as_mut() {
            if let Err(e) = tui.start_crawl(&self.query.locality, self.query.max_pages) {
                debug!("Progress display failed: {}", e);
            }
        }

        let mut slot = SessionSlot::empty();
        let stop_reason = self.crawl_pages(&mut slot, &mut tui);
        slot.release();

        let outcome = CrawlOutcome {
            run_id: self.query.run_id.clone(),
            locality: self.query.locality.clone(),
            pages_visited: self.state.pages_visited,
            unique_listings: self.state.unique_listings(),
            stop_reason,
            finished_at: Local::now(),
        };

        if stop_reason.is_natural() {
            info!(
                "Stopped {} after {} pages: {} ({} unique listings)",
                self.query.locality, outcome.pages_visited, stop_reason, outcome.unique_listings
            );
        } else {
            warn!(
                "Crawl of {} ended early after {} pages: {} ({} unique listings)",
                self.query.locality, outcome.pages_visited, stop_reason, outcome.unique_listings
            );
        }

        if let Err(e) = self.recorder.record_final(&outcome, self.state.records()) {
            error!("Failed to write final results for {}: {:#}", self.query.locality, e);
        }

        if let Some(tui) = tui.as_mut() {
            if let Err(e) = tui.finish_crawl(&outcome) {
                debug!("Progress display failed: {}", e);
            }
        }

        outcome
    }

    fn crawl_pages(
        &mut self,
        slot: &mut SessionSlot<F::Session>,
        tui: &mut Option<&mut CrawlTUI>,
    ) -> StopReason {
        let mut rng = rand::thread_rng();
        let mut page = 1;

        loop {
            if let Some(limit) = self.query.max_pages {
                if page > limit {
                    return StopReason::Limit;
                }
            }
            if self.cancel.load(Ordering::Relaxed) {
                self.note(page, "Cancellation requested, not starting page");
                return StopReason::Cancelled;
            }
            if page > 1 {
                std::thread::sleep(self.query.delay.sample(&mut rng));
            }

            self.state.page = page;
            self.state.pages_visited += 1;
            let Some(result) = self.fetch_page_with_retry(slot, page) else {
                return StopReason::SessionLoss;
            };

            let class = self.state.classify(&result.links);
            if let Some(tui) = tui.as_mut() {
                if let Err(e) = tui.update_page(
                    page,
                    class.into(),
                    result.links.len(),
                    self.state.unique_listings(),
                ) {
                    debug!("Progress display failed: {}", e);
                }
            }

            if let Some(stop) = self.handle_class(class, &result) {
                return stop;
            }

            page += 1;
        }
    }

    fn handle_class(&mut self, class: PageClass, result: &PageResult) -> Option<StopReason> {
        let page = result.page;
        match class {
            PageClass::Identical => {
                let count = self.state.consecutive_identical;
                warn!("Same links as previous page at page {} ({} in a row)", page, count);
                self.note(page, &format!("Same links as previous page ({} in a row)", count));

                if count >= self.settings.max_identical_pages {
                    self.note(
                        page,
                        &format!("Stopping: {} pages with identical links detected", count),
                    );
                    return Some(StopReason::Duplicate);
                }
            }
            PageClass::Empty => {
                let count = self.state.consecutive_empty;
                warn!("No property links found on page {} ({} in a row)", page, count);
                self.note(
                    page,
                    &format!("No property links found ({}, {} in a row)", result.outcome, count),
                );

                if count >= self.settings.max_empty_pages {
                    self.note(page, &format!("Stopping after {} consecutive empty pages", count));
                    return Some(StopReason::Empty);
                }
            }
            PageClass::Novel => {
                let added = self
                    .state
                    .admit(&self.query.locality, page, &result.links);
                info!(
                    "Found {} property links on page {} ({} new)",
                    result.links.len(),
                    page,
                    added
                );

                let records = result.records(&self.query.locality);
                if let Err(e) = self.recorder.record_page(result, &records) {
                    warn!("Failed to save page {} snapshot: {:#}", page, e);
                }
            }
        }
        None
    }

    /// One page, retried once on a fresh session if the session gave out.
    /// `None` means the session could not be recovered.
    fn fetch_page_with_retry(
        &mut self,
        slot: &mut SessionSlot<F::Session>,
        page: u32,
    ) -> Option<PageResult> {
        let url = self.query.page_url(page);
        info!("Visiting page {}: {}", page, url);
        if let Err(e) = self.recorder.record_visit(page, &url) {
            warn!("Failed to write run log: {:#}", e);
        }

        let first_error = match self.attempt_page(slot, page, &url) {
            Ok(result) => return Some(result),
            Err(e) => e,
        };

        warn!("Session lost on page {}: {}. Restarting session and retrying", page, first_error);
        self.note(page, &format!("Session lost ({}), retrying on a new session", first_error));
        slot.release();
        self.state.session_healthy = false;

        match self.attempt_page(slot, page, &url) {
            Ok(result) => Some(result),
            Err(e) => {
                error!("Retry of page {} failed, giving up: {}", page, e);
                self.note(page, &format!("Retry failed ({}), stopping crawl", e));
                None
            }
        }
    }

    /// Fetch, settle and extract one page. Transient failures come back as an
    /// empty `Timeout` result; an `Err` means the session is lost.
    fn attempt_page(
        &mut self,
        slot: &mut SessionSlot<F::Session>,
        page: u32,
        url: &str,
    ) -> Result<PageResult, FetchError> {
        let session = self.ensure_session(slot)?;

        session.clear_captured();
        if let Err(e) = session.navigate(url) {
            if e.is_transient() {
                warn!("Failed to load page {}: {}", page, e);
                return Ok(PageResult::new(page, Vec::new(), PageOutcome::Timeout));
            }
            return Err(e);
        }

        match session.dismiss_overlay(&self.profile.consent_selector, self.settings.consent_timeout) {
            Ok(true) => debug!("Cookie banner dismissed"),
            Ok(false) => debug!("No cookie banner found"),
            Err(e) => warn!("Unexpected error while handling cookie banner: {}", e),
        }

        match session.wait_for_selector(
            &self.profile.detail_link_selector,
            self.settings.link_wait_timeout,
        ) {
            Ok(true) => {}
            Ok(false) => {
                warn!("Timeout on page {}, page structure not recognized", page);
                return Ok(PageResult::new(page, Vec::new(), PageOutcome::Timeout));
            }
            Err(e) if e.is_transient() => {
                warn!("Timeout on page {}: {}", page, e);
                return Ok(PageResult::new(page, Vec::new(), PageOutcome::Timeout));
            }
            Err(e) => return Err(e),
        }

        let outcome = if session.supports_scrolling() {
            self.scroll_until_settled(session)?
        } else {
            PageOutcome::Ok
        };
        if outcome == PageOutcome::SessionLost {
            self.state.session_healthy = false;
        }

        let snapshot = session.snapshot()?;
        let links = self.extractor.extract(&snapshot).merged();

        if outcome == PageOutcome::SessionLost && links.is_empty() {
            return Err(FetchError::SessionInvalid(
                "session lost while scrolling and nothing was captured".to_string(),
            ));
        }

        Ok(PageResult::new(page, links, outcome))
    }

    /// Scroll until the page height stops growing. Losing the session
    /// mid-scroll ends scrolling but keeps what was already loaded.
    fn scroll_until_settled(&self, session: &mut F::Session) -> Result<PageOutcome, FetchError> {
        let mut rng = rand::thread_rng();
        let mut last_height = session.page_height()?;

        for _ in 0..self.settings.max_scroll_rounds {
            if let Err(e) = session.scroll_to_bottom() {
                warn!("Failed to scroll, session lost: {}", e);
                return Ok(PageOutcome::SessionLost);
            }
            std::thread::sleep(self.settings.scroll_delay.sample(&mut rng));

            match session.page_height() {
                Ok(height) if height <= last_height => return Ok(PageOutcome::Ok),
                Ok(height) => last_height = height,
                Err(e) => {
                    warn!("Failed to measure page height, session lost: {}", e);
                    return Ok(PageOutcome::SessionLost);
                }
            }
        }

        debug!("Page kept growing for {} scroll rounds", self.settings.max_scroll_rounds);
        Ok(PageOutcome::Ok)
    }

    fn ensure_session<'s>(
        &mut self,
        slot: &'s mut SessionSlot<F::Session>,
    ) -> Result<&'s mut F::Session, FetchError> {
        let usable = self.state.session_healthy && slot.get().map_or(false, |s| s.is_alive());

        if !usable {
            if slot.is_occupied() {
                warn!("Fetch session inactive, restarting");
            }
            slot.release();
            let session = self.factory.create()?;
            self.state.session_healthy = true;
            return Ok(slot.replace(session));
        }

        slot.get_mut()
            .ok_or_else(|| FetchError::SessionInvalid("no session".to_string()))
    }

    fn note(&mut self, page: u32, message: &str) {
        if let Err(e) = self.recorder.record_note(page, message) {
            warn!("Failed to write run log: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn links(urls: &[&str]) -> Vec<String> {
        let mut links: Vec<String> = urls.iter().map(|u| u.to_string()).collect();
        links.sort();
        links
    }

    #[test]
    fn test_classify_order_independent() {
        let mut state = CrawlState::default();
        let first = PageResult::new(1, links(&["b", "a", "c"]), PageOutcome::Ok);
        let second = PageResult::new(
            2,
            vec!["a".to_string(), "c".to_string(), "b".to_string()],
            PageOutcome::Ok,
        );

        assert_eq!(state.classify(&first.links), PageClass::Novel);
        assert_eq!(state.classify(&second.links), PageClass::Identical);
        assert_eq!(state.consecutive_identical, 1);
    }

    #[test]
    fn test_counters_are_exclusive_and_reset_on_novel() {
        let mut state = CrawlState::default();
        assert_eq!(state.classify(&[]), PageClass::Empty);
        assert_eq!(state.classify(&[]), PageClass::Empty);
        assert_eq!((state.consecutive_empty, state.consecutive_identical), (2, 0));

        assert_eq!(state.classify(&links(&["u1"])), PageClass::Novel);
        assert_eq!((state.consecutive_empty, state.consecutive_identical), (0, 0));

        assert_eq!(state.classify(&links(&["u1"])), PageClass::Identical);
        assert_eq!((state.consecutive_empty, state.consecutive_identical), (0, 1));
    }

    #[test]
    fn test_smaller_differing_page_is_novel() {
        let mut state = CrawlState::default();
        state.classify(&links(&["a", "b", "c"]));
        assert_eq!(state.classify(&links(&["a", "b"])), PageClass::Novel);
    }

    #[test]
    fn test_non_adjacent_repeat_is_novel() {
        let mut state = CrawlState::default();
        assert_eq!(state.classify(&links(&["u1", "u2"])), PageClass::Novel);
        assert_eq!(state.classify(&links(&["u3"])), PageClass::Novel);
        assert_eq!(state.classify(&links(&["u1", "u2"])), PageClass::Novel);
    }

    #[test]
    fn test_page_after_empty_is_novel_even_if_seen_before() {
        let mut state = CrawlState::default();
        state.classify(&links(&["u1"]));
        state.classify(&[]);
        assert_eq!(state.classify(&links(&["u1"])), PageClass::Novel);
    }

    #[test]
    fn test_admit_is_monotone_and_idempotent() {
        let mut state = CrawlState::default();
        let pages = [
            links(&["a", "b"]),
            links(&["b", "c"]),
            links(&["a", "b"]),
            links(&[]),
            links(&["d"]),
        ];

        let mut previous: Vec<String> = Vec::new();
        for (i, page) in pages.iter().enumerate() {
            state.admit("gent", i as u32 + 1, page);
            state.admit("gent", i as u32 + 1, page);
            assert!(state.unique_listings() >= previous.len());
            for url in &previous {
                assert!(state.contains(url));
            }
            previous = state.records().iter().map(|r| r.url.clone()).collect();
        }

        assert_eq!(state.unique_listings(), 4);
        let first_seen: Vec<u32> = state.records().iter().map(|r| r.page_number).collect();
        assert_eq!(first_seen, vec![1, 1, 2, 5]);
    }
}
