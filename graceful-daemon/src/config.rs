//! Daemon configuration.
//!
//! Loads configuration from a TOML file, then applies `GRACEFUL_*` environment
//! overrides to the `[shutdown]` table. Command-line flags are applied last by
//! the binary.
//!
//! # Example Configuration
//!
//! ```toml
//! workers = 4
//! tick_ms = 1000
//! cleanup_ms = 200
//! log_format = "json"
//!
//! [shutdown]
//! timeout_ms = 10000
//! signals = ["SIGINT", "SIGTERM"]
//! late_registration = "accept"
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` — Path to configuration file (default: `graceful.toml`)
//! - `GRACEFUL_TIMEOUT_MS`, `GRACEFUL_SIGNALS`, `GRACEFUL_REJECT_LATE` — see [`graceful::config`]

use std::path::Path;
use std::str::FromStr;

use graceful::ShutdownConfig;
use serde::{Deserialize, Serialize};

use crate::error::DaemonError;

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "graceful.toml";

/// Top-level daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Number of worker observers to spawn (default: `2`).
    pub workers: usize,

    /// Interval between worker ticks in milliseconds (default: `1000`).
    pub tick_ms: u64,

    /// Simulated cleanup time per worker in milliseconds (default: `100`).
    pub cleanup_ms: u64,

    /// Log output format (default: `plaintext`).
    pub log_format: LogFormat,

    /// Shutdown coordinator settings.
    pub shutdown: ShutdownConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            tick_ms: 1000,
            cleanup_ms: 100,
            log_format: LogFormat::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Loads configuration from `path`, falling back to defaults when the file
    /// does not exist, and applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError`] if the file cannot be read or parsed, or an
    /// environment override is invalid.
    pub fn load_from(path: &Path) -> Result<Self, DaemonError> {
        let content = if path.exists() {
            std::fs::read_to_string(path)?
        } else {
            String::new()
        };
        let config = Self::parse(&content)?;
        let shutdown = config
            .shutdown
            .clone()
            .merge_env(|name| std::env::var(name).ok())?;
        Ok(Self { shutdown, ..config })
    }

    /// Parses configuration from TOML text without consulting the environment.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::Toml`] if the text is not valid configuration.
    pub fn parse(content: &str) -> Result<Self, DaemonError> {
        Ok(toml::from_str(content)?)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text without colours, with timestamps.
    #[default]
    Plaintext,
    /// Coloured text without timestamps, for interactive use.
    Console,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "plaintext" | "plain" | "text" => Ok(Self::Plaintext),
            "console" => Ok(Self::Console),
            "json" => Ok(Self::Json),
            other => Err(DaemonError::UnknownLogFormat(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graceful::{LateRegistration, Signal};
    use std::time::Duration;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = DaemonConfig::parse("").unwrap();
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn test_parse_nested_shutdown_table() {
        let config = DaemonConfig::parse(
            r#"
            workers = 5
            log_format = "json"

            [shutdown]
            timeout_ms = 750
            signals = ["SIGHUP"]
            late_registration = "reject"
            "#,
        )
        .unwrap();
        assert_eq!(config.workers, 5);
        assert_eq!(config.tick_ms, 1000);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.shutdown.timeout, Duration::from_millis(750));
        assert_eq!(config.shutdown.signals, vec![Signal::Hangup]);
        assert_eq!(
            config.shutdown.late_registration,
            LateRegistration::Reject
        );
    }

    #[test]
    fn test_parse_rejects_unknown_signal() {
        let result = DaemonConfig::parse("[shutdown]\nsignals = [\"SIGKILL\"]\n");
        assert!(matches!(result, Err(DaemonError::Toml(_))));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config =
            DaemonConfig::load_from(Path::new("/nonexistent/graceful-daemon.toml")).unwrap();
        assert_eq!(config.workers, 2);
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("".parse::<LogFormat>().unwrap(), LogFormat::Plaintext);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
