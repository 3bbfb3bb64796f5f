use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::limits::{MAX_DURATION_MINUTES, MAX_SLOT_MINUTES, MIN_SLOT_MINUTES};

pub const JOURNAL_FILE: &str = "vigil.journal";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Parse { var: &'static str, value: String },
    #[error("{var}: {value} is outside {min}..={max}")]
    OutOfRange {
        var: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub slot_minutes: u32,
    pub booking_minutes: u32,
    pub cache_ttl: Duration,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            slot_minutes: 30,
            booking_minutes: 120,
            cache_ttl: Duration::from_secs(300),
            compact_threshold: 1000,
            metrics_port: None,
            log_filter: "info".into(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        if let Some(dir) = lookup("VIGIL_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(v) = parsed(&lookup, "VIGIL_SLOT_MINUTES")? {
            config.slot_minutes = in_range("VIGIL_SLOT_MINUTES", v, MIN_SLOT_MINUTES, MAX_SLOT_MINUTES)?;
        }
        if let Some(v) = parsed(&lookup, "VIGIL_BOOKING_MINUTES")? {
            config.booking_minutes = in_range("VIGIL_BOOKING_MINUTES", v, 1, MAX_DURATION_MINUTES)?;
        }
        if let Some(secs) = parsed::<u64>(&lookup, "VIGIL_CACHE_TTL_SECS")? {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(v) = parsed(&lookup, "VIGIL_COMPACT_THRESHOLD")? {
            config.compact_threshold = v;
        }
        config.metrics_port = parsed(&lookup, "VIGIL_METRICS_PORT")?;
        if let Some(filter) = lookup("VIGIL_LOG") {
            config.log_filter = filter;
        }
        Ok(config)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join(JOURNAL_FILE)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Parse { var, value }),
    }
}

fn in_range(var: &'static str, value: u32, min: u32, max: u32) -> Result<u32, ConfigError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::OutOfRange {
            var,
            value: value.into(),
            min: min.into(),
            max: max.into(),
        })
    }
}
