use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ingest: IngestConfig,
    pub fanout: FanoutConfig,
    pub chat: ChatConfig,
    pub viewers: ViewersConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Seconds without a frame heartbeat before a session is force-ended
    pub heartbeat_grace_seconds: u64,
    /// Interval between stale-session sweeps
    pub sweep_interval_seconds: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            heartbeat_grace_seconds: 15,
            sweep_interval_seconds: 5,
        }
    }
}

impl IngestConfig {
    #[must_use]
    pub const fn heartbeat_grace(&self) -> Duration {
        Duration::from_secs(self.heartbeat_grace_seconds)
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Per-subscriber outbound buffer; oldest events are dropped on overflow
    pub outbox_capacity: usize,
    /// Capacity of the subscribe/unsubscribe notification channel
    pub subscription_events_capacity: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: 256,
            subscription_events_capacity: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Messages allowed per author per session within the rate window
    pub rate_limit_max_messages: u32,
    /// Rate window size in seconds
    pub rate_limit_window_seconds: u64,
    /// Maximum chat message length in characters
    pub max_message_length: usize,
    /// Maximum number of messages returned by a history query
    pub history_limit: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            rate_limit_max_messages: 5,
            rate_limit_window_seconds: 10,
            max_message_length: 500,
            history_limit: 100,
        }
    }
}

impl ChatConfig {
    #[must_use]
    pub const fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewersConfig {
    /// Interval between viewer-count commits to the session store
    pub commit_interval_seconds: u64,
}

impl Default for ViewersConfig {
    fn default() -> Self {
        Self {
            commit_interval_seconds: 5,
        }
    }
}

impl ViewersConfig {
    #[must_use]
    pub const fn commit_interval(&self) -> Duration {
        Duration::from_secs(self.commit_interval_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (LIVECAST_INGEST_HEARTBEAT_GRACE_SECONDS, etc.)
        builder = builder.add_source(
            Environment::with_prefix("LIVECAST")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Validate configuration values, returning all problems found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.ingest.heartbeat_grace_seconds == 0 {
            errors.push("ingest.heartbeat_grace_seconds must be greater than 0".to_string());
        }
        if self.ingest.sweep_interval_seconds == 0 {
            errors.push("ingest.sweep_interval_seconds must be greater than 0".to_string());
        }
        if self.fanout.outbox_capacity == 0 {
            errors.push("fanout.outbox_capacity must be greater than 0".to_string());
        }
        if self.fanout.subscription_events_capacity == 0 {
            errors.push("fanout.subscription_events_capacity must be greater than 0".to_string());
        }
        if self.chat.rate_limit_max_messages == 0 {
            errors.push("chat.rate_limit_max_messages must be greater than 0".to_string());
        }
        if self.chat.rate_limit_window_seconds == 0 {
            errors.push("chat.rate_limit_window_seconds must be greater than 0".to_string());
        }
        if self.chat.max_message_length == 0 {
            errors.push("chat.max_message_length must be greater than 0".to_string());
        }
        if self.viewers.commit_interval_seconds == 0 {
            errors.push("viewers.commit_interval_seconds must be greater than 0".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got \"{}\"",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
