//! Crawl configuration from an optional TOML file.
//!
//! ```toml
//! output_dir = "output"
//! portal = "immovlan"
//!
//! [crawl]
//! max_empty_pages = 3
//! max_identical_pages = 10
//! delay_min = 1.0
//! delay_max = 2.5
//!
//! [[query]]
//! locality = "brussels"
//! base_url = "https://immovlan.be/en/real-estate?transactiontypes=for-sale&municipals={locality}"
//! max_pages = -1
//! ```

use crate::crawl::CrawlSettings;
use crate::http_session;
use crate::models::DelayRange;
use crate::portal::PortalProfile;
use reqwest::Url;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Unknown portal: {0}")]
    UnknownPortal(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrawlSection {
    pub max_empty_pages: Option<u32>,
    pub max_identical_pages: Option<u32>,
    pub consent_timeout_secs: Option<f64>,
    pub link_wait_timeout_secs: Option<f64>,
    pub scroll_delay_min: Option<f64>,
    pub scroll_delay_max: Option<f64>,
    pub max_scroll_rounds: Option<u32>,
    pub delay_min: Option<f64>,
    pub delay_max: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryEntry {
    pub locality: String,
    /// Falls back to the portal's search URL.
    pub base_url: Option<String>,
    pub max_pages: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub output_dir: Option<PathBuf>,
    pub portal: Option<String>,
    pub run_id: Option<String>,
    #[serde(default)]
    pub crawl: CrawlSection,
    #[serde(default, rename = "query")]
    pub queries: Vec<QueryEntry>,
}

pub const DEFAULT_DELAY_MIN: f64 = 1.0;
pub const DEFAULT_DELAY_MAX: f64 = 2.5;

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<(), ConfigError> {
    let profile = config.profile()?;
    config.settings()?;
    config.delay()?;
    for query in &config.queries {
        let base_url = query.base_url.as_deref().unwrap_or(&profile.search_url);
        validate_query(&query.locality, base_url)?;
        if let Some(max_pages) = query.max_pages {
            parse_page_limit(max_pages)?;
        }
    }
    Ok(())
}

impl Config {
    pub fn profile(&self) -> Result<PortalProfile, ConfigError> {
        match &self.portal {
            Some(name) => resolve_portal(name),
            None => Ok(PortalProfile::default()),
        }
    }

    pub fn settings(&self) -> Result<CrawlSettings, ConfigError> {
        let defaults = CrawlSettings::default();
        let crawl = &self.crawl;

        let settings = CrawlSettings {
            max_empty_pages: crawl.max_empty_pages.unwrap_or(defaults.max_empty_pages),
            max_identical_pages: crawl.max_identical_pages.unwrap_or(defaults.max_identical_pages),
            consent_timeout: match crawl.consent_timeout_secs {
                Some(secs) => seconds("consent_timeout_secs", secs)?,
                None => defaults.consent_timeout,
            },
            link_wait_timeout: match crawl.link_wait_timeout_secs {
                Some(secs) => seconds("link_wait_timeout_secs", secs)?,
                None => defaults.link_wait_timeout,
            },
            scroll_delay: match (crawl.scroll_delay_min, crawl.scroll_delay_max) {
                (None, None) => defaults.scroll_delay,
                (min, max) => delay_range(
                    min.unwrap_or(defaults.scroll_delay.min.as_secs_f64()),
                    max.unwrap_or(defaults.scroll_delay.max.as_secs_f64()),
                )?,
            },
            max_scroll_rounds: crawl.max_scroll_rounds.unwrap_or(defaults.max_scroll_rounds),
        };

        validate_settings(&settings)?;
        Ok(settings)
    }

    pub fn delay(&self) -> Result<DelayRange, ConfigError> {
        delay_range(
            self.crawl.delay_min.unwrap_or(DEFAULT_DELAY_MIN),
            self.crawl.delay_max.unwrap_or(DEFAULT_DELAY_MAX),
        )
    }
}

pub fn resolve_portal(name: &str) -> Result<PortalProfile, ConfigError> {
    PortalProfile::by_name(name).ok_or_else(|| ConfigError::UnknownPortal(name.to_string()))
}

pub fn validate_settings(settings: &CrawlSettings) -> Result<(), ConfigError> {
    if settings.max_empty_pages == 0 {
        return Err(ConfigError::Invalid("max_empty_pages must be at least 1".into()));
    }
    if settings.max_identical_pages == 0 {
        return Err(ConfigError::Invalid("max_identical_pages must be at least 1".into()));
    }
    Ok(())
}

/// `-1` means no limit; any other value must be positive.
pub fn parse_page_limit(max_pages: i64) -> Result<Option<u32>, ConfigError> {
    match max_pages {
        -1 => Ok(None),
        n if n >= 1 && n <= u32::MAX as i64 => Ok(Some(n as u32)),
        n => Err(ConfigError::Invalid(format!(
            "max_pages must be -1 or a positive number, got {}",
            n
        ))),
    }
}

pub fn delay_range(min: f64, max: f64) -> Result<DelayRange, ConfigError> {
    if !min.is_finite() || !max.is_finite() || min < 0.0 || max < 0.0 {
        return Err(ConfigError::Invalid(format!(
            "delays must be non-negative seconds, got {}..{}",
            min, max
        )));
    }
    if min > max {
        return Err(ConfigError::Invalid(format!(
            "minimum delay {} is larger than maximum delay {}",
            min, max
        )));
    }
    Ok(DelayRange::from_secs(min, max))
}

fn seconds(field: &str, secs: f64) -> Result<Duration, ConfigError> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(ConfigError::Invalid(format!("{} must be non-negative", field)));
    }
    Ok(Duration::from_secs_f64(secs))
}

/// The base URL must become an absolute http(s) URL once placeholders are filled.
pub fn validate_query(locality: &str, base_url: &str) -> Result<(), ConfigError> {
    if locality.trim().is_empty() {
        return Err(ConfigError::Invalid("query locality is empty".into()));
    }

    let filled = base_url
        .replace("{locality}", &urlencoding::encode(locality))
        .replace("{page}", "1");
    let url = Url::parse(&filled)
        .map_err(|e| ConfigError::Invalid(format!("invalid base URL {:?}: {}", base_url, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Invalid(format!("base URL must be http(s): {}", base_url)));
    }
    if http_session::is_blocked(&filled) {
        return Err(ConfigError::Invalid(format!("base URL is on a blocked domain: {}", base_url)));
    }
    Ok(())
}
