//! Offline merging of finished runs.
//!
//! [`consolidate_all_results`] combines the final CSV of every run under an
//! output directory. [`merge_partial_pages`] rebuilds one run's aggregate from
//! its per-page CSVs, for runs that died before writing their final file.

use crate::models::ListingRecord;
use crate::utils;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ConsolidationReport {
    pub files_combined: usize,
    pub rows_before: usize,
    pub unique_listings: usize,
    pub csv_path: PathBuf,
    pub stats_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct MergeReport {
    pub files_scanned: usize,
    pub duplicate_pages: usize,
    pub rows_before: usize,
    pub unique_listings: usize,
    pub csv_path: PathBuf,
    pub stats_path: PathBuf,
}

/// Final per-run CSVs (`urls_*.csv`) anywhere below `root`, in path order.
pub fn find_run_outputs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    collect_run_outputs(root, &mut found)?;
    found.sort();
    Ok(found)
}

fn collect_run_outputs(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to read directory: {}", dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_run_outputs(&path, found)?;
            continue;
        }

        let is_run_output = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|name| name.starts_with("urls_") && name.ends_with(".csv"))
            .unwrap_or(false);
        if is_run_output {
            found.push(path);
        }
    }
    Ok(())
}

fn progress_bar(len: usize, show: bool) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}") {
        bar.set_style(style);
    }
    bar
}

/// Combine every run's final CSV under `base_output_dir` into
/// `<base>/<name>_<timestamp>/<name>_<timestamp>.csv`, one row per URL.
/// Returns `None` when there is nothing to combine.
pub fn consolidate_all_results(
    base_output_dir: &Path,
    consolidated_name: &str,
    show_progress: bool,
) -> Result<Option<ConsolidationReport>> {
    info!("Consolidating all scraped results in {}", base_output_dir.display());

    let files = find_run_outputs(base_output_dir)?;
    let bar = progress_bar(files.len(), show_progress);

    let mut combined: Vec<ListingRecord> = Vec::new();
    let mut files_combined = 0;
    for path in &files {
        bar.set_message(path.display().to_string());
        match utils::load_records_from_csv(path) {
            Ok(records) => {
                info!("Read {} rows from {}", records.len(), path.display());
                combined.extend(records);
                files_combined += 1;
            }
            Err(e) => warn!("Could not read {}: {:#}", path.display(), e),
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    if files_combined == 0 {
        warn!("No data files found to consolidate");
        return Ok(None);
    }

    let rows_before = combined.len();
    let unique = utils::dedup_by_url(combined);

    let timestamp = utils::compact_timestamp();
    let final_dir = base_output_dir.join(format!("{}_{}", consolidated_name, timestamp));
    fs::create_dir_all(&final_dir)
        .with_context(|| format!("Failed to create {}", final_dir.display()))?;

    let csv_path = final_dir.join(format!("{}_{}.csv", consolidated_name, timestamp));
    utils::save_records_to_csv(&unique, &csv_path)?;
    info!("Consolidated CSV written: {}", csv_path.display());

    let stats_path = final_dir.join(format!("stats_consolidation_{}.txt", timestamp));
    let mut stats = File::create(&stats_path)
        .with_context(|| format!("Failed to create {}", stats_path.display()))?;
    writeln!(stats, "Files combined  : {}", files_combined)?;
    writeln!(stats, "Unique listings : {}", unique.len())?;
    writeln!(stats, "Timestamp       : {}", utils::timestamp())?;
    info!("Consolidation stats written: {}", stats_path.display());

    Ok(Some(ConsolidationReport {
        files_combined,
        rows_before,
        unique_listings: unique.len(),
        csv_path,
        stats_path,
    }))
}

/// Page number of a `partial_urls_page_<N>_<base>.csv` file.
fn partial_page_number(name: &str) -> Option<u32> {
    let rest = name.strip_prefix("partial_urls_page_")?;
    if !name.ends_with(".csv") {
        return None;
    }
    rest.split('_').next()?.parse().ok()
}

/// Rebuild a run's aggregate from its per-page CSVs in page order.
pub fn merge_partial_pages(run_dir: &Path, merged_dir: &Path) -> Result<Option<MergeReport>> {
    info!("Scanning {} for partial page files", run_dir.display());

    let mut pages: Vec<(u32, PathBuf)> = Vec::new();
    for entry in fs::read_dir(run_dir)
        .with_context(|| format!("Failed to read directory: {}", run_dir.display()))?
    {
        let path = entry?.path();
        let number = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(partial_page_number);
        if let Some(number) = number {
            pages.push((number, path));
        }
    }
    pages.sort();
    info!("Found {} partial CSV files to process", pages.len());

    let mut all_records = Vec::new();
    let mut previous: Option<HashSet<String>> = None;
    let mut duplicate_pages = 0;
    let mut loaded = 0;

    for (_, path) in &pages {
        let records = match utils::load_records_from_csv(path) {
            Ok(records) => records,
            Err(e) => {
                warn!("Skipped {}: {:#}", path.display(), e);
                continue;
            }
        };

        let urls: HashSet<String> = records.iter().map(|r| r.url.clone()).collect();
        if previous.as_ref() == Some(&urls) {
            duplicate_pages += 1;
            warn!("Same URLs as the previous page in {}", path.display());
        }
        previous = Some(urls);
        all_records.extend(records);
        loaded += 1;
    }

    if loaded == 0 {
        warn!("No partial CSV files found to merge");
        return Ok(None);
    }

    let rows_before = all_records.len();
    let unique = utils::dedup_by_url(all_records);

    let run_name = run_dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("run")
        .to_string();
    fs::create_dir_all(merged_dir)
        .with_context(|| format!("Failed to create {}", merged_dir.display()))?;

    let merged_name = format!("merged_unique_urls_{}_{}.csv", run_name, unique.len());
    let csv_path = merged_dir.join(&merged_name);
    utils::save_records_to_csv(&unique, &csv_path)?;
    info!("Merged CSV saved: {}", csv_path.display());

    let stats_path = merged_dir.join(format!("merge_stats_{}.txt", run_name));
    let mut stats = File::create(&stats_path)
        .with_context(|| format!("Failed to create {}", stats_path.display()))?;
    writeln!(stats, "Merge summary - {}", run_name)?;
    writeln!(stats, "Total files scanned           : {}", pages.len())?;
    writeln!(stats, "Duplicate pages (same URLs)   : {}", duplicate_pages)?;
    writeln!(stats, "Rows before deduplication     : {}", rows_before)?;
    writeln!(stats, "Unique listings after merge   : {}", unique.len())?;
    writeln!(stats, "Merged file                   : {}", merged_name)?;

    Ok(Some(MergeReport {
        files_scanned: pages.len(),
        duplicate_pages,
        rows_before,
        unique_listings: unique.len(),
        csv_path,
        stats_path,
    }))
}
