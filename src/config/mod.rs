//! Runtime configuration.
//!
//! Everything has a development default, so an empty environment is a valid
//! configuration. `Config::from_env` only fails on values that are present
//! but unparseable.

use std::env;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::jobs::{DEFAULT_SYNC_URL, PrefetchConfig, RetryPolicy};
use crate::orchestrator::OrchestratorSettings;
use crate::render::RenderSettings;
use crate::rules::BaseCatalog;

pub const ENV_DATA_DIR: &str = "FEEDBYPASS_DATA_DIR";
pub const ENV_BASE_CATALOG: &str = "FEEDBYPASS_BASE_CATALOG";
pub const ENV_SYNC_URL: &str = "FEEDBYPASS_SYNC_URL";
pub const ENV_SYNC_INTERVAL_SECS: &str = "FEEDBYPASS_SYNC_INTERVAL_SECS";
pub const ENV_ARCHIVE_BASE: &str = "FEEDBYPASS_ARCHIVE_BASE";
pub const ENV_MIN_TEXT_LEN: &str = "FEEDBYPASS_MIN_TEXT_LEN";
pub const ENV_RENDER_SETTLE_MS: &str = "FEEDBYPASS_RENDER_SETTLE_MS";
pub const ENV_RENDER_TIMEOUT_SECS: &str = "FEEDBYPASS_RENDER_TIMEOUT_SECS";
pub const ENV_PREFETCH_CONCURRENCY: &str = "FEEDBYPASS_PREFETCH_CONCURRENCY";

const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_ARCHIVE_BASE: &str = "https://archive.is";
const DEFAULT_MIN_TEXT_LEN: usize = 200;
const DEFAULT_RENDER_SETTLE_MS: u64 = 5_000;
const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 15;
const DEFAULT_PREFETCH_CONCURRENCY: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    data_dir: PathBuf,
    base_catalog: Option<PathBuf>,
    sync_url: Url,
    sync_interval: Duration,
    archive_base: String,
    min_text_len: usize,
    render_settle: Duration,
    render_timeout: Duration,
    prefetch_concurrency: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = env::var(ENV_DATA_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR));
        let base_catalog = env::var(ENV_BASE_CATALOG)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let sync_url = env::var(ENV_SYNC_URL).unwrap_or_else(|_| DEFAULT_SYNC_URL.to_string());
        let sync_url = Url::parse(&sync_url).map_err(|e| ConfigError::InvalidValue {
            field: ENV_SYNC_URL,
            reason: e.to_string(),
        })?;

        let archive_base =
            env::var(ENV_ARCHIVE_BASE).unwrap_or_else(|_| DEFAULT_ARCHIVE_BASE.to_string());
        if let Err(e) = Url::parse(&archive_base) {
            return Err(ConfigError::InvalidValue {
                field: ENV_ARCHIVE_BASE,
                reason: e.to_string(),
            });
        }

        let prefetch_concurrency =
            parse_var(ENV_PREFETCH_CONCURRENCY, DEFAULT_PREFETCH_CONCURRENCY)?;
        if prefetch_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: ENV_PREFETCH_CONCURRENCY,
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            data_dir,
            base_catalog,
            sync_url,
            sync_interval: Duration::from_secs(parse_var(
                ENV_SYNC_INTERVAL_SECS,
                DEFAULT_SYNC_INTERVAL_SECS,
            )?),
            archive_base,
            min_text_len: parse_var(ENV_MIN_TEXT_LEN, DEFAULT_MIN_TEXT_LEN)?,
            render_settle: Duration::from_millis(parse_var(
                ENV_RENDER_SETTLE_MS,
                DEFAULT_RENDER_SETTLE_MS,
            )?),
            render_timeout: Duration::from_secs(parse_var(
                ENV_RENDER_TIMEOUT_SECS,
                DEFAULT_RENDER_TIMEOUT_SECS,
            )?),
            prefetch_concurrency,
        })
    }

    /// Directory holding the override catalog and the sync version file.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn base_catalog(&self) -> BaseCatalog {
        match &self.base_catalog {
            Some(path) => BaseCatalog::File(path.clone()),
            None => BaseCatalog::Bundled,
        }
    }

    pub fn sync_url(&self) -> &Url {
        &self.sync_url
    }

    pub fn sync_interval(&self) -> Duration {
        self.sync_interval
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            min_text_len: self.min_text_len,
            archive_base: self.archive_base.clone(),
            ..OrchestratorSettings::default()
        }
    }

    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            timeout: self.render_timeout,
            settle_delay: self.render_settle,
            ..RenderSettings::default()
        }
    }

    pub fn prefetch_config(&self) -> PrefetchConfig {
        PrefetchConfig {
            concurrency: self.prefetch_concurrency,
            ..PrefetchConfig::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }
}

fn parse_var<T>(field: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(field) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                field,
                reason: format!("{raw:?}: {e}"),
            }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue { field: &'static str, reason: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl Error for ConfigError {}
