//! Configuration management for laptimer.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lap_clock::LapPolicy;
use crate::source::TokenMode;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "laptimer";

/// Default CSV record file name.
const CSV_STORE_FILE_NAME: &str = "lap_times.csv";

/// Default SQLite record file name.
const SQLITE_STORE_FILE_NAME: &str = "lap_times.db";

/// Default driver roster file name.
const ROSTER_FILE_NAME: &str = "roster.csv";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `LAPTIMER_`, sections split on `__`)
/// 2. TOML config file at `~/.config/laptimer/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Signal listener configuration.
    pub listener: ListenerConfig,
    /// Lap record storage configuration.
    pub storage: StorageConfig,
    /// Race session configuration.
    pub session: SessionConfig,
    /// Driver roster configuration.
    pub roster: RosterConfig,
}

/// Where detections come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A serial device (TTL adapter or RFID reader).
    #[default]
    Serial,
    /// A simulated RFID reader.
    Simulated,
    /// Lines replayed from a file.
    Replay,
}

/// Signal listener configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Which kind of source to open.
    pub source: SourceKind,
    /// Serial device address (e.g. `/dev/ttyUSB0` or `COM3`).
    pub device: String,
    /// Serial baud rate.
    pub baud_rate: u32,
    /// Interval between polls of the source, in milliseconds.
    pub poll_interval_ms: u64,
    /// Serial read timeout in milliseconds. Must not exceed the poll interval.
    pub read_timeout_ms: u64,
    /// How long `stop` waits for the worker to exit, in milliseconds.
    pub stop_timeout_ms: u64,
    /// How lines map to tokens.
    pub token_mode: TokenMode,
    /// Token used for every pulse in channel mode.
    pub channel_token: String,
    /// Optional regex a tag must match in tag mode.
    pub token_pattern: Option<String>,
    /// Interval between simulated reads or replayed lines, in milliseconds.
    pub emit_interval_ms: u64,
    /// Tags the simulator draws from. Empty means random 10-digit codes.
    pub simulated_tags: Vec<String>,
    /// File replayed by the replay source.
    pub replay_path: Option<PathBuf>,
}

/// Which record backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// A flat CSV table.
    #[default]
    Csv,
    /// A `SQLite` database.
    Sqlite,
}

/// Lap record storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Record backend.
    pub backend: StorageBackend,
    /// Path to the record file.
    /// Defaults to `~/.local/share/laptimer/lap_times.csv` (or `.db`).
    pub path: Option<PathBuf>,
}

/// Race session configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Treatment of zero or negative laps.
    pub lap_policy: LapPolicy,
    /// Repeated reads of a token within this many milliseconds are dropped.
    /// Set to 0 to keep every read.
    pub dedup_window_ms: u64,
}

/// Driver roster configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterConfig {
    /// Path to the roster CSV.
    /// Defaults to `~/.local/share/laptimer/roster.csv`
    pub path: Option<PathBuf>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Serial,
            device: default_device(),
            baud_rate: 9600,
            poll_interval_ms: 100,
            read_timeout_ms: 50,
            stop_timeout_ms: 2_000,
            token_mode: TokenMode::Tag,
            channel_token: crate::detection::DEFAULT_CHANNEL_TOKEN.to_string(),
            token_pattern: None,
            emit_interval_ms: 3_000,
            simulated_tags: Vec::new(),
            replay_path: None,
        }
    }
}

fn default_device() -> String {
    if cfg!(windows) {
        "COM3".to_string()
    } else {
        "/dev/ttyUSB0".to_string()
    }
}

impl ListenerConfig {
    /// Poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Stop timeout as a Duration.
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `LAPTIMER_`)
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("LAPTIMER_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let listener = &self.listener;

        if listener.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms must be greater than 0"));
        }

        if listener.stop_timeout_ms == 0 {
            return Err(invalid("stop_timeout_ms must be greater than 0"));
        }

        if listener.read_timeout_ms == 0 || listener.read_timeout_ms > listener.poll_interval_ms {
            return Err(invalid(format!(
                "read_timeout_ms ({}) must be between 1 and poll_interval_ms ({})",
                listener.read_timeout_ms, listener.poll_interval_ms
            )));
        }

        if listener.source == SourceKind::Serial {
            if listener.device.trim().is_empty() {
                return Err(invalid("device must be set for a serial source"));
            }
            if listener.baud_rate == 0 {
                return Err(invalid("baud_rate must be greater than 0"));
            }
        }

        if listener.source != SourceKind::Serial && listener.emit_interval_ms == 0 {
            return Err(invalid("emit_interval_ms must be greater than 0"));
        }

        if listener.source == SourceKind::Replay && listener.replay_path.is_none() {
            return Err(invalid("replay_path must be set for a replay source"));
        }

        if listener.channel_token.trim().is_empty() {
            return Err(invalid("channel_token cannot be empty"));
        }

        if let Some(pattern) = &listener.token_pattern {
            if regex::Regex::new(pattern).is_err() {
                return Err(invalid(format!("invalid regex pattern: {pattern}")));
            }
        }

        Ok(())
    }

    /// Get the record store path, resolving defaults if not set.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.storage.path.clone().unwrap_or_else(|| {
            let file_name = match self.storage.backend {
                StorageBackend::Csv => CSV_STORE_FILE_NAME,
                StorageBackend::Sqlite => SQLITE_STORE_FILE_NAME,
            };
            Self::default_data_dir().join(file_name)
        })
    }

    /// Get the roster path, resolving defaults if not set.
    #[must_use]
    pub fn roster_path(&self) -> PathBuf {
        self.roster
            .path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(ROSTER_FILE_NAME))
    }

    /// Get the dedup window, or `None` when disabled.
    #[must_use]
    pub fn dedup_window(&self) -> Option<Duration> {
        if self.session.dedup_window_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.session.dedup_window_ms))
        }
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.listener.source, SourceKind::Serial);
        assert_eq!(config.listener.baud_rate, 9600);
        assert_eq!(config.storage.backend, StorageBackend::Csv);
        assert_eq!(config.session.lap_policy, LapPolicy::PassThrough);
        assert_eq!(config.session.dedup_window_ms, 0);
    }

    #[test]
    fn test_default_listener_config() {
        let listener = ListenerConfig::default();

        assert_eq!(listener.poll_interval(), Duration::from_millis(100));
        assert_eq!(listener.stop_timeout(), Duration::from_secs(2));
        assert!(listener.read_timeout_ms <= listener.poll_interval_ms);
        assert_eq!(listener.token_mode, TokenMode::Tag);
        assert_eq!(listener.channel_token, "TTL");
        assert!(listener.simulated_tags.is_empty());
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_poll_interval() {
        let mut config = Config::default();
        config.listener.poll_interval_ms = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("poll_interval_ms"));
    }

    #[test]
    fn test_validate_read_timeout_longer_than_poll() {
        let mut config = Config::default();
        config.listener.read_timeout_ms = 500;
        config.listener.poll_interval_ms = 100;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("read_timeout_ms"));
    }

    #[test]
    fn test_validate_empty_device() {
        let mut config = Config::default();
        config.listener.device = "  ".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("device"));
    }

    #[test]
    fn test_validate_empty_device_ok_for_simulated() {
        let mut config = Config::default();
        config.listener.source = SourceKind::Simulated;
        config.listener.device = String::new();

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_replay_requires_path() {
        let mut config = Config::default();
        config.listener.source = SourceKind::Replay;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("replay_path"));
    }

    #[test]
    fn test_validate_invalid_regex() {
        let mut config = Config::default();
        config.listener.token_pattern = Some("[invalid".to_string());

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("invalid regex"));
    }

    #[test]
    fn test_validate_empty_channel_token() {
        let mut config = Config::default();
        config.listener.channel_token = String::new();

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_store_path_default_follows_backend() {
        let mut config = Config::default();
        assert!(config.store_path().to_string_lossy().ends_with("lap_times.csv"));

        config.storage.backend = StorageBackend::Sqlite;
        assert!(config.store_path().to_string_lossy().ends_with("lap_times.db"));
    }

    #[test]
    fn test_store_path_custom() {
        let mut config = Config::default();
        config.storage.path = Some(PathBuf::from("/custom/laps.csv"));

        assert_eq!(config.store_path(), PathBuf::from("/custom/laps.csv"));
    }

    #[test]
    fn test_roster_path_default() {
        let config = Config::default();
        assert!(config.roster_path().to_string_lossy().contains("roster.csv"));
    }

    #[test]
    fn test_dedup_window() {
        let mut config = Config::default();
        assert!(config.dedup_window().is_none());

        config.session.dedup_window_ms = 1_500;
        assert_eq!(config.dedup_window(), Some(Duration::from_millis(1_500)));
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("laptimer"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let result = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")));
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), Config::default());
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[listener]
source = "simulated"
poll_interval_ms = 200
simulated_tags = ["A1", "B2"]

[session]
lap_policy = "reject"
dedup_window_ms = 2000

[storage]
backend = "sqlite"
"#,
        )
        .unwrap();

        let config = Config::load_from(Some(path)).unwrap();
        assert_eq!(config.listener.source, SourceKind::Simulated);
        assert_eq!(config.listener.poll_interval_ms, 200);
        assert_eq!(config.listener.simulated_tags, vec!["A1", "B2"]);
        assert_eq!(config.session.lap_policy, LapPolicy::Reject);
        assert_eq!(config.session.dedup_window_ms, 2_000);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        // Untouched fields keep their defaults.
        assert_eq!(config.listener.baud_rate, 9600);
    }

    #[test]
    fn test_load_invalid_file_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[listener]\npoll_interval_ms = 0\n").unwrap();

        let err = Config::load_from(Some(path)).unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));
    }

    #[test]
    fn test_listener_config_deserialize() {
        let json = r#"{"device": "COM7", "baud_rate": 115200, "token_mode": "channel"}"#;
        let listener: ListenerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(listener.device, "COM7");
        assert_eq!(listener.baud_rate, 115_200);
        assert_eq!(listener.token_mode, TokenMode::Channel);
        assert_eq!(listener.poll_interval_ms, 100);
    }
}
