//! Layered configuration: an optional TOML file overridden by `DROPFLOW__*`
//! environment variables.
//!
//! ```toml
//! [upstream]
//! base_url = "https://admin.example.com/api/"
//! access_token = "..."
//! request_timeout_secs = 30
//!
//! [events]
//! forward_url = "https://marketing.example.com/events"
//!
//! [store]
//! path = "/var/lib/dropflow/state.json"
//!
//! [telemetry]
//! json_logs = true
//! otlp_endpoint = "http://localhost:4317"
//!
//! [timers]
//! channel_capacity = 256
//! redelivery_delay_secs = 30
//!
//! [intake]
//! path = "notifications.jsonl"
//! ```
//!
//! `DROPFLOW__UPSTREAM__ACCESS_TOKEN=...` overrides `upstream.access_token`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

/// File read when `--config` is not given. Optional.
pub const DEFAULT_CONFIG_FILE: &str = "dropflow.toml";

const ENV_PREFIX: &str = "DROPFLOW";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub upstream: UpstreamSection,
    #[serde(default)]
    pub events: EventsSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
    #[serde(default)]
    pub timers: TimersSection,
    #[serde(default)]
    pub intake: IntakeSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSection {
    pub base_url: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl UpstreamSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Where domain events go. Without a URL they are only logged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventsSection {
    #[serde(default)]
    pub forward_url: Option<String>,
}

/// Without a path the store is in-memory and lost on exit.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreSection {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetrySection {
    #[serde(default)]
    pub json_logs: bool,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimersSection {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Wait before a delivery whose event could not be published fires again.
    #[serde(default = "default_redelivery_delay_secs")]
    pub redelivery_delay_secs: u64,
}

impl TimersSection {
    pub fn redelivery_delay(&self) -> Duration {
        Duration::from_secs(self.redelivery_delay_secs)
    }
}

impl Default for TimersSection {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            redelivery_delay_secs: default_redelivery_delay_secs(),
        }
    }
}

fn default_redelivery_delay_secs() -> u64 {
    30
}

fn default_channel_capacity() -> usize {
    256
}

/// Without a path notifications are read from stdin.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntakeSection {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Settings {
    /// Loads settings from `path` (required) or [`DEFAULT_CONFIG_FILE`]
    /// (optional), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).format(FileFormat::Toml).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE)
                .format(FileFormat::Toml)
                .required(false),
        };
        let config = Config::builder()
            .add_source(file)
            .add_source(environment())
            .build()?;
        Self::from_config(config)
    }

    fn from_config(config: Config) -> Result<Self, ConfigError> {
        let settings: Self = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.base_url.trim().is_empty() {
            return Err(invalid("upstream.base_url must not be empty"));
        }
        if self.upstream.request_timeout_secs == 0 {
            return Err(invalid("upstream.request_timeout_secs must be positive"));
        }
        if self.timers.channel_capacity == 0 {
            return Err(invalid("timers.channel_capacity must be positive"));
        }
        if self.timers.redelivery_delay_secs == 0 {
            return Err(invalid("timers.redelivery_delay_secs must be positive"));
        }
        if let Some(url) = &self.events.forward_url {
            if url.trim().is_empty() {
                return Err(invalid("events.forward_url must not be empty when set"));
            }
        }
        Ok(())
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Message(message.to_string())
}
