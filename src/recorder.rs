//! Where a crawl leaves its traces: per-page CSVs, the run log, the final
//! aggregate and a short summary, all inside one run directory.

use crate::models::{CrawlOutcome, CrawlQuery, ListingRecord, PageResult};
use crate::utils;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub trait RunRecorder {
    /// Note that a page is about to be fetched.
    fn record_visit(&mut self, page: u32, url: &str) -> Result<()>;

    /// Free-form line for the run log (warnings, stop messages).
    fn record_note(&mut self, page: u32, message: &str) -> Result<()>;

    /// Persist the records of one novel page. Only that page's records are
    /// passed, never the accumulated set.
    fn record_page(&mut self, result: &PageResult, records: &[ListingRecord]) -> Result<()>;

    /// Persist the aggregate and the summary once the crawl has stopped.
    fn record_final(&mut self, outcome: &CrawlOutcome, records: &[ListingRecord]) -> Result<()>;
}

/// Line-oriented log file scoped to one run. Every line is flushed right away
/// so the log stays readable if the process dies.
pub struct RunLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl RunLog {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create run log: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn line(&mut self, message: &str) -> Result<()> {
        writeln!(self.writer, "[{}] {}", utils::timestamp(), message)?;
        self.writer.flush()?;
        Ok(())
    }
}

impl Drop for RunLog {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Writes everything as CSV and text files under `<output_dir>/<locality>_<run_id>/`.
pub struct CsvRunRecorder {
    run_dir: PathBuf,
    filename_base: String,
    log: RunLog,
}

impl CsvRunRecorder {
    pub fn create(output_dir: &Path, query: &CrawlQuery) -> Result<Self> {
        let filename_base = query.filename_base();
        let run_dir = output_dir.join(&filename_base);
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("Failed to create run directory: {}", run_dir.display()))?;

        let log = RunLog::create(&run_dir.join(format!("urls_by_page_{}.log", filename_base)))?;

        Ok(Self {
            run_dir,
            filename_base,
            log,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    pub fn page_csv_path(&self, page: u32) -> PathBuf {
        self.run_dir
            .join(format!("partial_urls_page_{}_{}.csv", page, self.filename_base))
    }

    pub fn final_csv_path(&self, record_count: usize) -> PathBuf {
        self.run_dir
            .join(format!("urls_{}_records_{}.csv", self.filename_base, record_count))
    }

    pub fn summary_path(&self) -> PathBuf {
        self.run_dir.join(format!("stats_{}.txt", self.filename_base))
    }

    fn write_summary(&self, outcome: &CrawlOutcome) -> Result<()> {
        let path = self.summary_path();
        let mut stats = File::create(&path)
            .with_context(|| format!("Failed to create summary: {}", path.display()))?;

        writeln!(stats, "Run ID         : {}", outcome.run_id)?;
        writeln!(stats, "Locality       : {}", outcome.locality)?;
        writeln!(stats, "Pages visited  : {}", outcome.pages_visited)?;
        writeln!(stats, "Total listings : {}", outcome.unique_listings)?;
        writeln!(stats, "Stop reason    : {}", outcome.stop_reason)?;
        writeln!(
            stats,
            "Timestamp      : {}",
            outcome.finished_at.format("%Y-%m-%d %H:%M:%S")
        )?;
        Ok(())
    }
}

impl RunRecorder for CsvRunRecorder {
    fn record_visit(&mut self, page: u32, url: &str) -> Result<()> {
        self.log.line(&format!("=== Page {} === Visiting: {}", page, url))
    }

    fn record_note(&mut self, page: u32, message: &str) -> Result<()> {
        self.log.line(&format!("[page {}] {}", page, message))
    }

    fn record_page(&mut self, result: &PageResult, records: &[ListingRecord]) -> Result<()> {
        self.log.line(&format!(
            "Found {} property links on page {}",
            records.len(),
            result.page
        ))?;
        for (i, record) in records.iter().enumerate() {
            self.log.line(&format!("[{:02}] {}", i + 1, record.url))?;
        }

        let path = self.page_csv_path(result.page);
        utils::save_records_to_csv(records, &path)?;
        tracing::debug!("Partial CSV saved: {}", path.display());
        Ok(())
    }

    fn record_final(&mut self, outcome: &CrawlOutcome, records: &[ListingRecord]) -> Result<()> {
        self.log.line(&format!(
            "Stopped: {} after {} pages with {} unique listings",
            outcome.stop_reason, outcome.pages_visited, outcome.unique_listings
        ))?;

        let path = self.final_csv_path(records.len());
        utils::save_records_to_csv(records, &path)?;
        tracing::info!("CSV saved with {} rows: {}", records.len(), path.display());

        self.write_summary(outcome)?;
        tracing::info!("Stats saved to {}", self.summary_path().display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DelayRange, PageOutcome, StopReason};
    use chrono::Local;
    use tempfile::TempDir;

    fn query() -> CrawlQuery {
        CrawlQuery {
            base_url: "https://immovlan.be/en/real-estate?municipals={locality}".to_string(),
            locality: "Gent".to_string(),
            max_pages: Some(2),
            delay: DelayRange::ZERO,
            run_id: "run1".to_string(),
        }
    }

    #[test]
    fn test_files_are_namespaced_by_run() {
        let dir = TempDir::new().unwrap();
        let recorder = CsvRunRecorder::create(dir.path(), &query()).unwrap();

        assert_eq!(recorder.run_dir(), dir.path().join("gent_run1"));
        assert!(recorder.log_path().ends_with("urls_by_page_gent_run1.log"));
        assert!(recorder.page_csv_path(4).ends_with("partial_urls_page_4_gent_run1.csv"));
        assert!(recorder.final_csv_path(12).ends_with("urls_gent_run1_records_12.csv"));
        assert!(recorder.summary_path().ends_with("stats_gent_run1.txt"));
    }

    #[test]
    fn test_page_final_and_summary_written() {
        let dir = TempDir::new().unwrap();
        let mut recorder = CsvRunRecorder::create(dir.path(), &query()).unwrap();

        let page = PageResult::new(
            1,
            vec!["https://s/en/detail/1".to_string(), "https://s/en/detail/2".to_string()],
            PageOutcome::Ok,
        );
        let records = page.records("Gent");
        recorder.record_visit(1, "https://immovlan.be/en/real-estate?page=1").unwrap();
        recorder.record_page(&page, &records).unwrap();

        let outcome = CrawlOutcome {
            run_id: "run1".to_string(),
            locality: "Gent".to_string(),
            pages_visited: 1,
            unique_listings: 2,
            stop_reason: StopReason::Limit,
            finished_at: Local::now(),
        };
        recorder.record_final(&outcome, &records).unwrap();

        assert_eq!(utils::load_records_from_csv(&recorder.page_csv_path(1)).unwrap(), records);
        assert_eq!(utils::load_records_from_csv(&recorder.final_csv_path(2)).unwrap(), records);

        let summary = fs::read_to_string(recorder.summary_path()).unwrap();
        assert!(summary.contains("Run ID         : run1"));
        assert!(summary.contains("Pages visited  : 1"));
        assert!(summary.contains("Total listings : 2"));
        assert!(summary.contains("Stop reason    : page limit reached"));

        let log = fs::read_to_string(recorder.log_path()).unwrap();
        assert!(log.contains("=== Page 1 ==="));
        assert!(log.contains("[02] https://s/en/detail/2"));
        assert!(log.contains("Stopped: page limit reached"));
    }
}
