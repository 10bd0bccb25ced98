//! Feed Configuration
//!
//! Centralized configuration for the transcript feed, with a TOML file at
//! `~/.config/halatrans/feed.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Environment Variables
//!
//! - `FEED_URL`: Streaming endpoint
//! - `FEED_FLUSH_INTERVAL_MS`: Minimum time between flushes of one channel
//! - `FEED_CAPACITY`: Visible transcripts and notes kept
//! - `FEED_ERROR_BACKOFF_MS`: Delay before reconnecting after a failure
//! - `FEED_GRACEFUL_BACKOFF_MS`: Delay before reconnecting after a clean close
//! - `FEED_CONNECT_TIMEOUT_MS`: Connection timeout
//! - `FEED_LOCAL_TICK`: "0" or "false" to disable the local flush tick
//!
//! # Example Configuration
//!
//! ```toml
//! [feed]
//! url = "http://localhost:8000/api/streaming"
//! flush_interval_ms = 200
//! capacity = 50
//! local_tick = true
//!
//! [reconnect]
//! error_backoff_ms = 5000
//! graceful_backoff_ms = 10000
//! connect_timeout_ms = 5000
//!
//! [decoder]
//! prefix_len = 6
//! max_frame_size = 1048576
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decoder::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_PREFIX_LEN};
use crate::scheduler::DEFAULT_FLUSH_INTERVAL;
use crate::store::DEFAULT_CAPACITY;

/// Default streaming endpoint
pub const DEFAULT_URL: &str = "http://localhost:8000/api/streaming";

/// Default delay before reconnecting after a transport failure
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Default delay before reconnecting after the server closed the stream
pub const DEFAULT_GRACEFUL_BACKOFF: Duration = Duration::from_secs(10);

/// Default connection timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Feed section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedToml {
    /// Streaming endpoint
    pub url: Option<String>,

    /// Minimum time between flushes of one channel, in milliseconds
    pub flush_interval_ms: Option<u64>,

    /// Visible transcripts and notes kept
    pub capacity: Option<usize>,

    /// Whether to flush on a local tick while streaming
    pub local_tick: Option<bool>,
}

/// Reconnect section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectToml {
    /// Delay after a transport failure, in milliseconds
    pub error_backoff_ms: Option<u64>,

    /// Delay after a clean close, in milliseconds
    pub graceful_backoff_ms: Option<u64>,

    /// Connection timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,
}

/// Decoder section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderToml {
    /// Width of the per-frame prefix
    pub prefix_len: Option<usize>,

    /// Largest frame accepted, in bytes
    pub max_frame_size: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfigToml {
    /// Feed section
    pub feed: FeedToml,

    /// Reconnect section
    pub reconnect: ReconnectToml,

    /// Decoder section
    pub decoder: DecoderToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved feed configuration
#[derive(Clone, Debug)]
pub struct FeedConfig {
    /// Streaming endpoint
    pub url: String,

    /// Minimum time between flushes of one channel
    pub flush_interval: Duration,

    /// Visible transcripts and notes kept
    pub capacity: usize,

    /// Delay before reconnecting after a transport failure
    pub error_backoff: Duration,

    /// Delay before reconnecting after a clean close
    pub graceful_backoff: Duration,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Width of the per-frame prefix
    pub frame_prefix_len: usize,

    /// Largest frame accepted, in bytes
    pub max_frame_size: usize,

    /// Flush on a local tick while streaming
    pub local_tick: bool,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Where the URL came from
    source: ConfigSource,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            capacity: DEFAULT_CAPACITY,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            graceful_backoff: DEFAULT_GRACEFUL_BACKOFF,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            frame_prefix_len: DEFAULT_PREFIX_LEN,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            local_tick: true,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl FeedConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a default configuration pointing at `url`
    #[must_use]
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Where the URL came from
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Period of the local flush tick, if enabled
    #[must_use]
    pub fn local_tick_period(&self) -> Option<Duration> {
        self.local_tick.then(|| self.flush_interval * 2)
    }

    /// Check the configuration for values the feed cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first invalid
    /// value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "url must start with http:// or https://, got {:?}",
                self.url
            )));
        }
        if self.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "capacity must be at least 1".to_string(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "flush interval must be greater than zero".to_string(),
            ));
        }
        if self.max_frame_size <= self.frame_prefix_len {
            return Err(ConfigError::ValidationError(format!(
                "max frame size {} must exceed the prefix length {}",
                self.max_frame_size, self.frame_prefix_len
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/halatrans/feed.toml` or
/// `~/.config/halatrans/feed.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("halatrans").join("feed.toml"))
}

/// Load configuration from the default file, then the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<FeedConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then the environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<FeedConfig, ConfigError> {
    let mut config = load_file(path)?;
    apply_env_config(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn load_file(path: Option<PathBuf>) -> Result<FeedConfig, ConfigError> {
    let mut config = FeedConfig::default();

    if let Some(config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(&config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: FeedConfigToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
            config.config_file_path = Some(config_path);
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut FeedConfig, toml: &FeedConfigToml) {
    if let Some(ref url) = toml.feed.url {
        config.url.clone_from(url);
        config.source = ConfigSource::File;
    }
    if let Some(ms) = toml.feed.flush_interval_ms {
        config.flush_interval = Duration::from_millis(ms);
    }
    if let Some(capacity) = toml.feed.capacity {
        config.capacity = capacity;
    }
    if let Some(enabled) = toml.feed.local_tick {
        config.local_tick = enabled;
    }

    if let Some(ms) = toml.reconnect.error_backoff_ms {
        config.error_backoff = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.reconnect.graceful_backoff_ms {
        config.graceful_backoff = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.reconnect.connect_timeout_ms {
        config.connect_timeout = Duration::from_millis(ms);
    }

    if let Some(len) = toml.decoder.prefix_len {
        config.frame_prefix_len = len;
    }
    if let Some(size) = toml.decoder.max_frame_size {
        config.max_frame_size = size;
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut FeedConfig, var: impl Fn(&str) -> Option<String>) {
    let millis = |key: &str| {
        var(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
    };

    if let Some(url) = var("FEED_URL") {
        config.url = url;
        config.source = ConfigSource::Env;
    }
    if let Some(interval) = millis("FEED_FLUSH_INTERVAL_MS") {
        config.flush_interval = interval;
    }
    if let Some(capacity) = var("FEED_CAPACITY").and_then(|v| v.parse::<usize>().ok()) {
        config.capacity = capacity;
    }
    if let Some(backoff) = millis("FEED_ERROR_BACKOFF_MS") {
        config.error_backoff = backoff;
    }
    if let Some(backoff) = millis("FEED_GRACEFUL_BACKOFF_MS") {
        config.graceful_backoff = backoff;
    }
    if let Some(timeout) = millis("FEED_CONNECT_TIMEOUT_MS") {
        config.connect_timeout = timeout;
    }
    if let Some(enabled) = var("FEED_LOCAL_TICK") {
        config.local_tick = enabled != "0" && enabled.to_lowercase() != "false";
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// URL override
    pub url: Option<String>,

    /// Flush interval override (milliseconds)
    pub flush_interval_ms: Option<u64>,

    /// Capacity override
    pub capacity: Option<usize>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set URL override
    #[must_use]
    pub fn with_url(mut self, url: String) -> Self {
        self.url = Some(url);
        self
    }

    /// Set flush interval override
    #[must_use]
    pub fn with_flush_interval_ms(mut self, ms: u64) -> Self {
        self.flush_interval_ms = Some(ms);
        self
    }

    /// Set capacity override
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut FeedConfig) {
        if let Some(ref url) = self.url {
            config.url.clone_from(url);
            config.source = ConfigSource::Cli;
        }
        if let Some(ms) = self.flush_interval_ms {
            config.flush_interval = Duration::from_millis(ms);
        }
        if let Some(capacity) = self.capacity {
            config.capacity = capacity;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
