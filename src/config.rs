//! Configuration types for media-dl-client

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Remote service connection settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the download service (default: "http://127.0.0.1:8000")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout (default: 30 s)
    #[serde(default = "default_request_timeout", with = "duration_ms_serde")]
    pub request_timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Progress polling intervals
///
/// The single-download flow and the batch flow poll at different rates; each
/// flow uses one fixed interval for its whole lifetime.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Interval for the single-download controller (default: 2000 ms)
    #[serde(default = "default_single_interval", with = "duration_ms_serde")]
    pub single_interval: Duration,

    /// Interval for each batch queue entry (default: 1500 ms)
    #[serde(default = "default_multi_interval", with = "duration_ms_serde")]
    pub multi_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            single_interval: default_single_interval(),
            multi_interval: default_multi_interval(),
        }
    }
}

/// How batch entries are started
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartMode {
    /// One entry at a time, in submitted order (info and start awaited before the next)
    #[default]
    Sequential,
    /// All entries fetch info and start at once
    Concurrent,
}

/// Batch queue settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Sequential or concurrent entry start (default: sequential)
    #[serde(default)]
    pub start_mode: StartMode,

    /// Format code requested for every batch entry (default: "best")
    #[serde(default = "default_batch_format_code")]
    pub format_code: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            start_mode: StartMode::default(),
            format_code: default_batch_format_code(),
        }
    }
}

/// Media preview settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PreviewConfig {
    /// Hosts whose media URLs refuse cross-origin playback and are never previewed
    #[serde(default = "default_blocked_hosts")]
    pub blocked_hosts: Vec<String>,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            blocked_hosts: default_blocked_hosts(),
        }
    }
}

/// File collision handling for retrieved files
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCollisionAction {
    /// Append (1), (2), etc. to the filename
    #[default]
    Rename,
    /// Overwrite the existing file
    Overwrite,
    /// Refuse to retrieve
    Skip,
}

/// Completed-file retrieval settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Directory the completion side effect downloads into (None = emit the event only)
    #[serde(default)]
    pub auto_retrieve_dir: Option<PathBuf>,

    /// What to do when the target file already exists
    #[serde(default)]
    pub file_collision: FileCollisionAction,
}

/// Main configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Remote service connection
    #[serde(default)]
    pub service: ServiceConfig,

    /// Poll intervals
    #[serde(default)]
    pub polling: PollingConfig,

    /// Batch queue behavior
    #[serde(default)]
    pub queue: QueueConfig,

    /// Preview filtering
    #[serde(default)]
    pub preview: PreviewConfig,

    /// Completed-file retrieval
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Capacity of the event broadcast channel (default: 1000)
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            polling: PollingConfig::default(),
            queue: QueueConfig::default(),
            preview: PreviewConfig::default(),
            retrieval: RetrievalConfig::default(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl Config {
    /// Config pointing at the given service base URL, everything else default
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            service: ServiceConfig {
                base_url: base_url.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Check the settings that would otherwise fail late
    pub fn validate(&self) -> Result<()> {
        let base = url::Url::parse(&self.service.base_url).map_err(|e| Error::Config {
            message: format!("invalid base_url '{}': {}", self.service.base_url, e),
            key: Some("base_url".to_string()),
        })?;
        if base.cannot_be_a_base() {
            return Err(Error::Config {
                message: format!("base_url '{}' cannot be a base URL", self.service.base_url),
                key: Some("base_url".to_string()),
            });
        }

        if self.polling.single_interval.is_zero() {
            return Err(Error::Config {
                message: "single_interval must be greater than zero".to_string(),
                key: Some("single_interval".to_string()),
            });
        }
        if self.polling.multi_interval.is_zero() {
            return Err(Error::Config {
                message: "multi_interval must be greater than zero".to_string(),
                key: Some("multi_interval".to_string()),
            });
        }

        if self.event_channel_capacity == 0 {
            return Err(Error::Config {
                message: "event_channel_capacity must be greater than zero".to_string(),
                key: Some("event_channel_capacity".to_string()),
            });
        }

        if self.queue.format_code.trim().is_empty() {
            return Err(Error::Config {
                message: "queue format_code must not be empty".to_string(),
                key: Some("format_code".to_string()),
            });
        }

        Ok(())
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    concat!("media-dl-client/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_single_interval() -> Duration {
    Duration::from_millis(2000)
}

fn default_multi_interval() -> Duration {
    Duration::from_millis(1500)
}

fn default_batch_format_code() -> String {
    "best".to_string()
}

fn default_blocked_hosts() -> Vec<String> {
    vec![
        "tiktok.com".to_string(),
        "facebook.com".to_string(),
        "instagram.com".to_string(),
    ]
}

fn default_event_channel_capacity() -> usize {
    1000
}

// Duration serialization helper (milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_two_poll_rates() {
        let config = Config::default();
        assert_eq!(config.polling.single_interval, Duration::from_millis(2000));
        assert_eq!(config.polling.multi_interval, Duration::from_millis(1500));
        assert_eq!(config.queue.format_code, "best");
        assert_eq!(config.queue.start_mode, StartMode::Sequential);
        assert!(config.retrieval.auto_retrieve_dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_json_deserializes_to_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.service.base_url, "http://127.0.0.1:8000");
        assert_eq!(config.event_channel_capacity, 1000);
        assert_eq!(config.preview.blocked_hosts.len(), 3);
    }

    #[test]
    fn durations_round_trip_as_milliseconds() {
        let json = r#"{"polling": {"single_interval": 250, "multi_interval": 100}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.polling.single_interval, Duration::from_millis(250));
        assert_eq!(config.polling.multi_interval, Duration::from_millis(100));

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["polling"]["single_interval"], 250);
    }

    #[test]
    fn start_mode_parses_lowercase() {
        let json = r#"{"queue": {"start_mode": "concurrent"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.queue.start_mode, StartMode::Concurrent);
    }

    #[test]
    fn validate_rejects_bad_base_url() {
        let config = Config::with_base_url("not a url");
        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("base_url")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let mut config = Config::default();
        config.polling.multi_interval = Duration::ZERO;
        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("multi_interval")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn validate_rejects_zero_channel_capacity() {
        let mut config = Config::default();
        config.event_channel_capacity = 0;
        assert!(config.validate().is_err());
    }
}
