use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use immofinder::config::{self, Config};
use immofinder::consolidate;
use immofinder::crawl::{CrawlController, CrawlSettings};
use immofinder::http_session::HttpSessionFactory;
use immofinder::logging;
use immofinder::models::{CrawlOutcome, CrawlQuery};
use immofinder::portal::PortalProfile;
use immofinder::recorder::CsvRunRecorder;
use immofinder::tui::CrawlTUI;
use immofinder::utils;
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Immofinder - listing URL collector for Belgian property portals")]
struct Args {
    /// Optional TOML file with queries and crawl settings
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Directory receiving one sub-directory per run
    #[clap(short, long)]
    output_dir: Option<PathBuf>,

    /// Search URL, may contain {locality} and {page} placeholders
    #[clap(short, long)]
    base_url: Option<String>,

    /// Locality to crawl (repeat for several)
    #[clap(short, long)]
    locality: Vec<String>,

    /// Maximum number of pages per locality, -1 crawls until the results run out
    #[clap(short, long, allow_negative_numbers = true)]
    max_pages: Option<i64>,

    /// Minimum pause between pages in seconds
    #[clap(long)]
    delay_min: Option<f64>,

    /// Maximum pause between pages in seconds
    #[clap(long)]
    delay_max: Option<f64>,

    /// Run identifier used to namespace output files (default: current time)
    #[clap(long)]
    run_id: Option<String>,

    /// Portal profile: immovlan or immoweb
    #[clap(short, long)]
    portal: Option<String>,

    /// Stop after this many empty pages in a row
    #[clap(long)]
    max_empty_pages: Option<u32>,

    /// Stop after this many pages repeating the previous one
    #[clap(long)]
    max_identical_pages: Option<u32>,

    /// Crawl every locality on its own thread
    #[clap(long)]
    parallel: bool,

    /// Merge all finished runs in the output directory afterwards
    #[clap(long)]
    consolidate: bool,

    /// Disable the live progress line
    #[clap(long)]
    no_tui: bool,

    /// Increase logging verbosity (-v, -vv)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[clap(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

struct RunPlan {
    output_dir: PathBuf,
    profile: PortalProfile,
    settings: CrawlSettings,
    queries: Vec<CrawlQuery>,
}

fn build_plan(args: &Args) -> Result<RunPlan> {
    let file = match &args.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };

    let profile = match &args.portal {
        Some(name) => config::resolve_portal(name)?,
        None => file.profile()?,
    };

    let mut settings = file.settings()?;
    if let Some(n) = args.max_empty_pages {
        settings.max_empty_pages = n;
    }
    if let Some(n) = args.max_identical_pages {
        settings.max_identical_pages = n;
    }
    config::validate_settings(&settings)?;

    let file_delay = file.delay()?;
    let delay = config::delay_range(
        args.delay_min.unwrap_or(file_delay.min.as_secs_f64()),
        args.delay_max.unwrap_or(file_delay.max.as_secs_f64()),
    )?;

    let run_id = args
        .run_id
        .clone()
        .or_else(|| file.run_id.clone())
        .unwrap_or_else(utils::compact_timestamp);

    // A limit given on the command line wins over the per-query ones
    let cli_limit = args.max_pages.map(config::parse_page_limit).transpose()?;

    let mut queries = Vec::new();
    for entry in &file.queries {
        let max_pages = match cli_limit {
            Some(limit) => limit,
            None => entry.max_pages.map(config::parse_page_limit).transpose()?.flatten(),
        };
        queries.push(CrawlQuery {
            base_url: entry.base_url.clone().unwrap_or_else(|| profile.search_url.clone()),
            locality: entry.locality.clone(),
            max_pages,
            delay,
            run_id: run_id.clone(),
        });
    }

    let base_url = args.base_url.clone().unwrap_or_else(|| profile.search_url.clone());
    for locality in &args.locality {
        config::validate_query(locality, &base_url)?;
        queries.push(CrawlQuery {
            base_url: base_url.clone(),
            locality: locality.clone(),
            max_pages: cli_limit.flatten(),
            delay,
            run_id: run_id.clone(),
        });
    }

    if queries.is_empty() {
        bail!("Nothing to crawl: pass --locality or a config file with [[query]] entries");
    }

    let mut namespaces = HashSet::new();
    for query in &queries {
        if !namespaces.insert(query.filename_base()) {
            bail!(
                "Locality {:?} appears twice in run {}, output files would collide",
                query.locality,
                run_id
            );
        }
    }

    Ok(RunPlan {
        output_dir: args
            .output_dir
            .clone()
            .or_else(|| file.output_dir.clone())
            .unwrap_or_else(|| PathBuf::from("output")),
        profile,
        settings,
        queries,
    })
}

fn run_query(plan: &RunPlan, query: CrawlQuery, tui: Option<&mut CrawlTUI>) -> Result<CrawlOutcome> {
    let recorder = CsvRunRecorder::create(&plan.output_dir, &query)?;
    let factory = HttpSessionFactory::new(plan.settings.link_wait_timeout);
    let mut controller = CrawlController::new(
        query,
        plan.settings.clone(),
        plan.profile.clone(),
        factory,
        recorder,
    )?;
    Ok(controller.run(tui))
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::setup_logging(args.verbose, args.quiet);

    let plan = build_plan(&args).context("Invalid configuration")?;
    let use_tui = !args.no_tui && !args.quiet && !args.parallel;

    println!("Immofinder - {} URL collector", plan.profile.name);
    println!("==============================");

    let results: Vec<(String, Result<CrawlOutcome>)> = if args.parallel {
        std::thread::scope(|scope| {
            let handles: Vec<_> = plan
                .queries
                .iter()
                .map(|query| {
                    let plan = &plan;
                    let handle = scope.spawn(move || run_query(plan, query.clone(), None));
                    (query.locality.clone(), handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(locality, handle)| {
                    let result = handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow!("crawl thread panicked")));
                    (locality, result)
                })
                .collect()
        })
    } else {
        let mut tui = CrawlTUI::new();
        plan.queries
            .iter()
            .map(|query| {
                let tui = if use_tui { Some(&mut tui) } else { None };
                (query.locality.clone(), run_query(&plan, query.clone(), tui))
            })
            .collect()
    };

    println!("\n=== Summary ===");
    let mut failures = 0;
    for (locality, result) in &results {
        match result {
            Ok(outcome) => println!(
                "{}: {} unique listings from {} pages ({})",
                locality, outcome.unique_listings, outcome.pages_visited, outcome.stop_reason
            ),
            Err(e) => {
                failures += 1;
                println!("{}: failed: {:#}", locality, e);
            }
        }
    }
    println!("Output directory: {}", plan.output_dir.display());

    if args.consolidate {
        match consolidate::consolidate_all_results(&plan.output_dir, "consolidated_towns_urls", !args.quiet)? {
            Some(report) => println!(
                "Consolidated {} files into {} unique listings: {}",
                report.files_combined,
                report.unique_listings,
                report.csv_path.display()
            ),
            None => println!("Nothing to consolidate."),
        }
    }

    if failures > 0 {
        bail!("{} of {} crawls failed", failures, results.len());
    }
    Ok(())
}
