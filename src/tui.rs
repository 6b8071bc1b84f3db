use crate::models::{CrawlOutcome, StopReason};
use crossterm::{
    cursor::MoveToPreviousLine,
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use std::io;

/// How a page was judged, as shown on the status line.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum PageMark {
    Novel,
    Empty,
    Identical,
}

/// Single rewriting status line per crawl, for sequential runs.
pub struct CrawlTUI {
    locality: String,
    max_pages: Option<u32>,
    status_line_printed: bool,
}

impl CrawlTUI {
    pub fn new() -> Self {
        Self {
            locality: String::new(),
            max_pages: None,
            status_line_printed: false,
        }
    }

    pub fn start_crawl(&mut self, locality: &str, max_pages: Option<u32>) -> io::Result<()> {
        self.locality = locality.to_string();
        self.max_pages = max_pages;
        self.status_line_printed = false;

        execute!(
            io::stdout(),
            SetForegroundColor(Color::White),
            Print(format!("⏳ Gathering URLs for {} ({})\n", locality, Self::limit_label(max_pages))),
            ResetColor
        )?;
        self.status_line_printed = true;
        Ok(())
    }

    pub fn update_page(
        &mut self,
        page: u32,
        mark: PageMark,
        links_on_page: usize,
        total_unique: usize,
    ) -> io::Result<()> {
        if self.status_line_printed {
            execute!(io::stdout(), MoveToPreviousLine(1), Clear(ClearType::CurrentLine))?;
        }

        let spinner = match page % 4 {
            0 => "⠋",
            1 => "⠙",
            2 => "⠹",
            _ => "⠸",
        };
        let (color, note) = match mark {
            PageMark::Novel => (Color::White, String::new()),
            PageMark::Empty => (Color::Yellow, " - empty page".to_string()),
            PageMark::Identical => (Color::Yellow, " - same as previous page".to_string()),
        };
        let of = match self.max_pages {
            Some(max) => format!("{}/{}", page, max),
            None => page.to_string(),
        };

        execute!(
            io::stdout(),
            SetForegroundColor(color),
            Print(format!(
                "{} {}: page {} - {} links on page, {} unique{}\n",
                spinner, self.locality, of, links_on_page, total_unique, note
            )),
            ResetColor
        )?;
        self.status_line_printed = true;
        Ok(())
    }

    pub fn finish_crawl(&mut self, outcome: &CrawlOutcome) -> io::Result<()> {
        if self.status_line_printed {
            execute!(io::stdout(), MoveToPreviousLine(1), Clear(ClearType::CurrentLine))?;
        }

        let (color, icon) = match outcome.stop_reason {
            StopReason::SessionLoss => (Color::Red, "❌"),
            StopReason::Cancelled => (Color::Yellow, "⚠"),
            _ => (Color::Green, "✅"),
        };

        execute!(
            io::stdout(),
            SetForegroundColor(color),
            Print(format!(
                "{} {}: {} unique listings from {} pages ({})\n",
                icon, outcome.locality, outcome.unique_listings, outcome.pages_visited, outcome.stop_reason
            )),
            ResetColor
        )?;
        self.status_line_printed = false;
        Ok(())
    }

    fn limit_label(max_pages: Option<u32>) -> String {
        match max_pages {
            Some(max) => format!("up to {} pages", max),
            None => "until exhausted".to_string(),
        }
    }
}

impl Default for CrawlTUI {
    fn default() -> Self {
        Self::new()
    }
}
