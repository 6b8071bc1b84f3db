use anyhow::Result;
use clap::Parser;
use immofinder::consolidate::{consolidate_all_results, merge_partial_pages};
use immofinder::logging;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Merge collected listing URLs into one deduplicated CSV")]
struct Args {
    /// Directory holding the per-run output folders
    #[clap(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// Base name of the consolidated file
    #[clap(short, long, default_value = "consolidated_towns_urls")]
    name: String,

    /// Rebuild a single run from its per-page CSVs instead
    #[clap(long)]
    merge_partials: Option<PathBuf>,

    /// Where merged partial-page results are written
    #[clap(long, default_value = "output/merge")]
    merged_dir: PathBuf,

    /// Increase logging verbosity (-v, -vv)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[clap(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::setup_logging(args.verbose, args.quiet);

    if let Some(run_dir) = &args.merge_partials {
        match merge_partial_pages(run_dir, &args.merged_dir)? {
            Some(report) => {
                println!("Partial files scanned : {}", report.files_scanned);
                println!("Duplicate page files  : {}", report.duplicate_pages);
                println!("Rows before dedup     : {}", report.rows_before);
                println!("Unique listings       : {}", report.unique_listings);
                println!("Merged CSV            : {}", report.csv_path.display());
                println!("Stats                 : {}", report.stats_path.display());
            }
            None => println!("No partial page files found in {}", run_dir.display()),
        }
        return Ok(());
    }

    match consolidate_all_results(&args.output_dir, &args.name, !args.quiet)? {
        Some(report) => {
            println!("Files combined    : {}", report.files_combined);
            println!("Rows before dedup : {}", report.rows_before);
            println!("Unique listings   : {}", report.unique_listings);
            println!("Consolidated CSV  : {}", report.csv_path.display());
            println!("Stats             : {}", report.stats_path.display());
        }
        None => println!("No data files found in {}", args.output_dir.display()),
    }

    Ok(())
}
