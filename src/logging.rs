use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. Call once from a binary's `main`.
pub fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("immofinder=info,consolidate=info,warn"),
            1 => EnvFilter::new("immofinder=debug,consolidate=debug,info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();
}
