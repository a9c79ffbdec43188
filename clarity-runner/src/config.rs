//! Application configuration.
//!
//! Loaded once at startup from a TOML file, then overridden by the
//! `EOD_URL` / `EOD_API_KEY` environment variables (a `.env` file is honored),
//! then validated. Every section has defaults, so a file only needs the
//! instrument list and, unless it comes from the environment, the API key.

use clarity_core::data::{CircuitBreaker, EodClientConfig, Format};
use clarity_core::domain::{cross_product, CollectionTask, DomainError, Granularity, Instrument};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const ENV_URL: &str = "EOD_URL";
pub const ENV_API_KEY: &str = "EOD_API_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub instruments: InstrumentsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// EOD provider connection.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub breaker_cooldown_secs: u64,
    pub breaker_failure_threshold: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://eodhd.com/api".to_string(),
            api_key: String::new(),
            timeout_secs: 30,
            max_retries: 2,
            retry_base_delay_ms: 500,
            breaker_cooldown_secs: 30 * 60,
            breaker_failure_threshold: 3,
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = if self.api_key.is_empty() { "<unset>" } else { "<redacted>" };
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &key)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("breaker_cooldown_secs", &self.breaker_cooldown_secs)
            .field("breaker_failure_threshold", &self.breaker_failure_threshold)
            .finish()
    }
}

/// Collection loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub interval_secs: u64,
    pub max_concurrent_requests: usize,
    pub data_dir: PathBuf,
    pub format: Format,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            max_concurrent_requests: 10,
            data_dir: PathBuf::from("data/EOD"),
            format: Format::Json,
        }
    }
}

/// Instrument universe: every ticker is collected at every granularity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentsConfig {
    /// Exchange / asset-class code shared by all tickers.
    pub exchange: String,
    pub tickers: Vec<String>,
    pub granularities: Vec<String>,
}

impl Default for InstrumentsConfig {
    fn default() -> Self {
        Self {
            exchange: "FOREX".to_string(),
            tickers: Vec::new(),
            granularities: vec!["d".to_string(), "w".to_string(), "m".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("database/clarity"),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human-readable
    #[default]
    Pretty,
    /// One line per event
    Compact,
    /// Newline-delimited JSON
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
    /// Also write plain-text logs to this file.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

impl AppConfig {
    /// Read, apply environment overrides, and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let mut config = Self::from_file(path)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without overrides or validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Override provider settings from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Override provider settings from `lookup` (non-empty values only).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v: &String| !v.trim().is_empty());
        if let Some(url) = non_empty(ENV_URL) {
            self.provider.base_url = url;
        }
        if let Some(key) = non_empty(ENV_API_KEY) {
            self.provider.api_key = key;
        }
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "provider.base_url is empty (set it or {ENV_URL})"
            )));
        }
        if self.provider.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "provider.api_key is missing (set it or {ENV_API_KEY})"
            )));
        }
        if self.provider.timeout_secs == 0 {
            return Err(ConfigError::Invalid("provider.timeout_secs must be > 0".into()));
        }
        if self.collector.interval_secs == 0 {
            return Err(ConfigError::Invalid("collector.interval_secs must be > 0".into()));
        }
        if self.collector.max_concurrent_requests == 0 {
            return Err(ConfigError::Invalid(
                "collector.max_concurrent_requests must be > 0".into(),
            ));
        }
        if self.instruments.tickers.is_empty() {
            return Err(ConfigError::Invalid("instruments.tickers is empty".into()));
        }
        if self.instruments.granularities.is_empty() {
            return Err(ConfigError::Invalid("instruments.granularities is empty".into()));
        }
        if let Some(dup) = first_duplicate(&self.instruments.tickers) {
            return Err(ConfigError::Invalid(format!("duplicate ticker '{dup}'")));
        }
        if let Some(dup) = first_duplicate(&self.instruments.granularities) {
            return Err(ConfigError::Invalid(format!("duplicate granularity '{dup}'")));
        }

        self.instruments()?;
        self.granularities()?;
        Ok(())
    }

    pub fn instruments(&self) -> Result<Vec<Instrument>, ConfigError> {
        self.instruments
            .tickers
            .iter()
            .map(|t| {
                Instrument::new(t.as_str(), self.instruments.exchange.as_str())
                    .map_err(Into::into)
            })
            .collect()
    }

    pub fn granularities(&self) -> Result<Vec<Granularity>, ConfigError> {
        self.instruments
            .granularities
            .iter()
            .map(|g| Granularity::new(g.as_str()).map_err(Into::into))
            .collect()
    }

    /// Every (instrument, granularity) pair, instrument-major.
    pub fn tasks(&self) -> Result<Vec<CollectionTask>, ConfigError> {
        Ok(cross_product(&self.instruments()?, &self.granularities()?))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.collector.interval_secs)
    }

    pub fn eod_client_config(&self) -> EodClientConfig {
        EodClientConfig {
            base_url: self.provider.base_url.clone(),
            api_key: self.provider.api_key.clone(),
            timeout: Duration::from_secs(self.provider.timeout_secs),
            max_retries: self.provider.max_retries,
            base_delay: Duration::from_millis(self.provider.retry_base_delay_ms),
        }
    }

    pub fn circuit_breaker(&self) -> CircuitBreaker {
        CircuitBreaker::new(
            Duration::from_secs(self.provider.breaker_cooldown_secs),
            self.provider.breaker_failure_threshold,
        )
    }
}

fn first_duplicate(items: &[String]) -> Option<&str> {
    let mut seen = HashSet::new();
    items
        .iter()
        .find(|item| !seen.insert(item.as_str()))
        .map(String::as_str)
}
