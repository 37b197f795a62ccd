use crate::conversion::Rates;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const APP_DIR: &str = "keycalc";
const CONFIG_FILE: &str = "config.toml";

/// Eight hours, the lifetime of cached exchange rates.
const DEFAULT_CACHE_TTL_SECS: u64 = 8 * 60 * 60;
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_currency: String,
    pub cache_ttl_secs: u64,
    pub conversion_timeout_ms: u64,
    pub log_level: String,
    /// Rates relative to `base_currency`.
    pub rates: Rates,
}

impl Default for Config {
    fn default() -> Self {
        let rates = [
            ("EUR", 1.0),
            ("USD", 1.08),
            ("GBP", 0.85),
            ("JPY", 161.5),
            ("TRY", 35.2),
            ("CHF", 0.95),
        ]
        .into_iter()
        .map(|(code, rate)| (code.into(), rate))
        .collect();

        Self {
            base_currency: "EUR".to_string(),
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            conversion_timeout_ms: DEFAULT_TIMEOUT_MS,
            log_level: "warn".to_string(),
            rates,
        }
    }
}

impl Config {
    /// Loads `path` if given, otherwise the per-user config file when it
    /// exists, otherwise the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match default_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(&path),
                None => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        if config.base_currency.is_empty() {
            return Err(ConfigError::Invalid("base_currency is empty".to_string()));
        }
        if config.conversion_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "conversion_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_millis(self.conversion_timeout_ms)
    }
}

fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}
