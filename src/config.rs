use std::path::PathBuf;

use thiserror::Error;

use crate::limits::MAX_SUGGESTIONS;

pub const DEFAULT_MAX_SUGGESTIONS: usize = 4;
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Malformed { var: &'static str, value: String },
    #[error("MEDSCHED_MAX_SUGGESTIONS must be between 1 and {max}, got {0}", max = MAX_SUGGESTIONS)]
    SuggestionsOutOfRange(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub max_suggestions: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub seed_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            max_suggestions: DEFAULT_MAX_SUGGESTIONS,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            metrics_port: None,
            seed_file: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset variables fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_suggestions = parse_var(&lookup, "MEDSCHED_MAX_SUGGESTIONS")?
            .unwrap_or(defaults.max_suggestions);
        if max_suggestions == 0 || max_suggestions > MAX_SUGGESTIONS {
            return Err(ConfigError::SuggestionsOutOfRange(max_suggestions));
        }

        Ok(Self {
            data_dir: lookup("MEDSCHED_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            max_suggestions,
            compact_threshold: parse_var(&lookup, "MEDSCHED_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parse_var(&lookup, "MEDSCHED_METRICS_PORT")?,
            seed_file: lookup("MEDSCHED_SEED_FILE").map(PathBuf::from),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Malformed { var, value }),
    }
}
