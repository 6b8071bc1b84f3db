pub mod config;
pub mod consolidate;
pub mod crawl;
pub mod fetcher;
pub mod http_session;
pub mod link_extractor;
pub mod logging;
pub mod models;
pub mod portal;
pub mod recorder;
pub mod tui;
pub mod utils;
