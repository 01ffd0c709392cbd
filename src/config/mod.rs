//! Configuration management for catalog-sync
//!
//! This module handles loading, parsing, and validating configuration
//! from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Retry queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Catalog fetch loop configuration
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Progress tracking configuration
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// File-backed catalog sources keyed by scope
    #[serde(default)]
    pub sources: HashMap<String, SourceConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(yaml);
        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables with prefix CATALOG_SYNC_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(value) = env_parse("CATALOG_SYNC_QUEUE_CONCURRENCY")? {
            config.queue.concurrency = value;
        }
        if let Some(value) = env_parse("CATALOG_SYNC_QUEUE_MAX_RETRIES")? {
            config.queue.max_retries = value;
        }
        if let Some(value) = env_parse("CATALOG_SYNC_FETCH_PAGE_SIZE")? {
            config.fetch.page_size = value;
        }
        if let Some(value) = env_parse("CATALOG_SYNC_FETCH_MAX_ITERATIONS")? {
            config.fetch.max_iterations = value;
        }
        if let Some(value) = env_parse("CATALOG_SYNC_TRACKER_STALL_TIMEOUT_SECS")? {
            config.tracker.stall_timeout_secs = value;
        }
        if let Ok(level) = std::env::var("CATALOG_SYNC_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("CATALOG_SYNC_LOG_FORMAT") {
            config.logging.format = format;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the queue and fetch loop cannot operate with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "queue.concurrency must be at least 1".to_string(),
            ));
        }
        if !self.queue.backoff_multiplier.is_finite() || self.queue.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue(
                "queue.backoff_multiplier must be a finite number >= 1.0".to_string(),
            ));
        }
        if self.fetch.page_size == 0 {
            return Err(ConfigError::InvalidValue(
                "fetch.page_size must be at least 1".to_string(),
            ));
        }
        if self.fetch.max_iterations == 0 {
            return Err(ConfigError::InvalidValue(
                "fetch.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.fetch.max_consecutive_errors == 0 {
            return Err(ConfigError::InvalidValue(
                "fetch.max_consecutive_errors must be at least 1".to_string(),
            ));
        }
        for (scope, source) in &self.sources {
            if source.catalog_path.is_empty() {
                return Err(ConfigError::MissingRequired(format!(
                    "sources.{}.catalog_path",
                    scope
                )));
            }
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Parse(format!("Invalid value for {}: {}", name, raw))),
        Err(_) => Ok(None),
    }
}

/// How the retry queue schedules work
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DrainMode {
    /// Start up to `concurrency` tasks, wait for the whole batch (including
    /// any backoff) and pause before the next batch
    #[default]
    Batched,
    /// Keep up to `concurrency` attempts in flight; a backing-off task frees
    /// its slot and only delays itself
    Continuous,
}

/// Retry queue configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    /// Maximum number of tasks attempted at the same time
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Pause between batches in milliseconds
    #[serde(default = "default_batch_delay")]
    pub batch_delay_ms: u64,

    /// Default per-task retry ceiling
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff before the first retry in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound for a single backoff in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Whether to add jitter to backoff
    #[serde(default)]
    pub jitter: bool,

    /// Scheduling discipline
    #[serde(default)]
    pub mode: DrainMode,
}

impl QueueConfig {
    /// Pause between batches
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            batch_delay_ms: default_batch_delay(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff(),
            jitter: false,
            mode: DrainMode::default(),
        }
    }
}

fn default_concurrency() -> usize {
    5
}

fn default_batch_delay() -> u64 {
    200
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_backoff() -> u64 {
    300_000 // 5 minutes
}

/// Catalog fetch loop configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchConfig {
    /// Items requested per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Maximum successful page fetches per run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Back-to-back failed page fetches allowed before aborting
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    /// Delay between successful page fetches in milliseconds
    #[serde(default = "default_page_delay")]
    pub page_delay_ms: u64,

    /// Wait after a rate-limited request in milliseconds
    #[serde(default = "default_rate_limit_wait")]
    pub rate_limit_wait_ms: u64,

    /// Wait after any other failed request in milliseconds
    #[serde(default = "default_error_wait")]
    pub error_wait_ms: u64,

    /// Limit used for single-request cached reads
    #[serde(default = "default_bulk_limit")]
    pub bulk_limit: usize,
}

impl FetchConfig {
    /// Delay between successful page fetches
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    /// Wait after a rate-limited request
    pub fn rate_limit_wait(&self) -> Duration {
        Duration::from_millis(self.rate_limit_wait_ms)
    }

    /// Wait after any other failed request
    pub fn error_wait(&self) -> Duration {
        Duration::from_millis(self.error_wait_ms)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_iterations: default_max_iterations(),
            max_consecutive_errors: default_max_consecutive_errors(),
            page_delay_ms: default_page_delay(),
            rate_limit_wait_ms: default_rate_limit_wait(),
            error_wait_ms: default_error_wait(),
            bulk_limit: default_bulk_limit(),
        }
    }
}

fn default_page_size() -> usize {
    100
}

fn default_max_iterations() -> u32 {
    200
}

fn default_max_consecutive_errors() -> u32 {
    3
}

fn default_page_delay() -> u64 {
    300
}

fn default_rate_limit_wait() -> u64 {
    2000
}

fn default_error_wait() -> u64 {
    1000
}

fn default_bulk_limit() -> usize {
    50_000
}

/// Progress tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackerConfig {
    /// A processing job without progress for this long is declared stalled
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout_secs: u64,

    /// How often pollers read progress
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl TrackerConfig {
    /// Maximum time a processing job may go without progress
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    /// Poll interval for progress readers
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            stall_timeout_secs: default_stall_timeout(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

fn default_stall_timeout() -> u64 {
    1800 // 30 minutes
}

fn default_poll_interval() -> u64 {
    2
}

/// File-backed catalog source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    /// Path to a JSON array of catalog items
    pub catalog_path: String,

    /// Whether this source is enabled
    #[serde(default = "default_source_enabled")]
    pub enabled: bool,
}

fn default_source_enabled() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax
fn expand_env_vars(input: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .expect("Invalid regex pattern for environment variable expansion");

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
