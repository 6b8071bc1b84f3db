use crate::models::ListingRecord;
use anyhow::{Context, Result};
use chrono::Local;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

const HEADER: [&str; 3] = ["locality", "page", "url"];

/// Write records as `locality,page,url`, replacing any existing file.
/// The header is written even when there are no records.
pub fn save_records_to_csv(records: &[ListingRecord], output_path: &Path) -> Result<()> {
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create output file: {}", output_path.display()))?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);

    writer.write_record(HEADER)?;
    for record in records {
        writer.serialize(record)?;
    }

    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", output_path.display()))?;
    Ok(())
}

pub fn load_records_from_csv(input_path: &Path) -> Result<Vec<ListingRecord>> {
    let file = File::open(input_path)
        .with_context(|| format!("Failed to open input file: {}", input_path.display()))?;

    let mut reader = csv::Reader::from_reader(file);
    let mut records = Vec::new();

    for (line, result) in reader.deserialize::<ListingRecord>().enumerate() {
        let record = result.with_context(|| {
            format!("Invalid record {} in {}", line + 1, input_path.display())
        })?;
        records.push(record);
    }

    Ok(records)
}

/// Keep the first record seen for each URL, preserving order.
pub fn dedup_by_url(records: Vec<ListingRecord>) -> Vec<ListingRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.url.clone()))
        .collect()
}

/// Human-readable timestamp used inside log and summary files.
pub fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Compact timestamp used in run identifiers and directory names.
pub fn compact_timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M").to_string()
}
