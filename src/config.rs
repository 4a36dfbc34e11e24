//! Configuration management for thorload
//!
//! Two layers:
//! - [`ClientOptions`], the per-client object handed over by the host runtime
//!   (unknown fields are rejected, empty fields fall back to solo-network defaults)
//! - [`Config`], the process-level TOML file tuning funding, polling,
//!   deduplication and the metric sink

use crate::error::{LoadError, Result};
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

/// Mnemonic of the pre-funded accounts on a thor solo node.
pub const DEFAULT_MNEMONIC: &str =
    "denial kitchen pet squirrel other broom bar gas better priority spoil cross";
pub const DEFAULT_URL: &str = "http://localhost:8669";
pub const DEFAULT_ACCOUNTS: usize = 10;

pub const DEFAULT_CONFIG_FILE: &str = "thorload.toml";

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ClientOptions {
    pub url: String,
    pub mnemonic: String,
    pub accounts: usize,
}

impl ClientOptions {
    /// Decode options from the host's object form and fill in defaults.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let options: ClientOptions = serde_json::from_value(value)
            .map_err(|e| LoadError::InvalidOptions(format!("unable to decode options: {}", e)))?;
        Ok(options.with_defaults())
    }

    pub fn with_defaults(mut self) -> Self {
        if self.url.is_empty() {
            self.url = DEFAULT_URL.to_string();
        }
        if self.mnemonic.is_empty() {
            self.mnemonic = DEFAULT_MNEMONIC.to_string();
        }
        if self.accounts == 0 {
            self.accounts = DEFAULT_ACCOUNTS;
        }
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub client: ClientOptions,
    #[serde(default)]
    pub funding: FundingConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub sink: SinkConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FundingConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for FundingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    /// Most recent block numbers remembered per endpoint.
    #[serde(default = "default_window")]
    pub window: usize,
    /// Windows kept for endpoints no poller is watching any more.
    #[serde(default = "default_max_endpoints")]
    pub max_endpoints: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            max_endpoints: default_max_endpoints(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    #[serde(default = "default_sink_capacity")]
    pub capacity: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            capacity: default_sink_capacity(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.funding.batch_size == 0 {
            return Err(LoadError::Config("funding.batch_size must be > 0".into()));
        }
        if self.poller.interval_ms == 0 {
            return Err(LoadError::Config("poller.interval_ms must be > 0".into()));
        }
        if self.dedup.window == 0 {
            return Err(LoadError::Config("dedup.window must be > 0".into()));
        }
        if self.dedup.max_endpoints == 0 {
            return Err(LoadError::Config("dedup.max_endpoints must be > 0".into()));
        }
        if self.sink.capacity == 0 {
            return Err(LoadError::Config("sink.capacity must be > 0".into()));
        }
        Ok(())
    }
}

/// Load `thorload.toml` from the working directory.
pub fn load_config() -> Result<Config> {
    load_config_or_default(DEFAULT_CONFIG_FILE)
}

/// Like [`load_config_from`], but a missing file gives the defaults.
pub fn load_config_or_default(path: impl AsRef<Path>) -> Result<Config> {
    match fs::read_to_string(path.as_ref()) {
        Ok(config_str) => parse_config(&config_str),
        Err(e) if e.kind() == ErrorKind::NotFound => parse_config(""),
        Err(e) => Err(e.into()),
    }
}

/// Load a config file. An empty file gives the defaults.
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Config> {
    let config_str = fs::read_to_string(path.as_ref())?;
    parse_config(&config_str)
}

fn parse_config(config_str: &str) -> Result<Config> {
    let mut config: Config = if config_str.trim().is_empty() {
        Config::default()
    } else {
        toml::from_str(config_str)?
    };

    config.client = config.client.with_defaults();
    config.validate()?;
    Ok(config)
}

fn default_batch_size() -> usize {
    100
}

fn default_interval_ms() -> u64 {
    500
}

fn default_window() -> usize {
    256
}

fn default_max_endpoints() -> usize {
    64
}

fn default_sink_capacity() -> usize {
    1024
}
