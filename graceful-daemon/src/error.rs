//! Error types for the daemon binary.

use graceful::{ConfigError, ShutdownError};

/// Errors that can stop the daemon.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// The configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML for [`DaemonConfig`](crate::config::DaemonConfig).
    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// An environment override for the shutdown settings was invalid.
    #[error("invalid shutdown configuration: {0}")]
    ShutdownConfig(#[from] ConfigError),

    /// The requested log format is not supported.
    #[error("unknown log format: {0:?}")]
    UnknownLogFormat(String),

    /// The shutdown sequence reported a failure.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

impl DaemonError {
    /// Process exit code for this error.
    ///
    /// A shutdown that originated from the run deadline exits with `3`; every
    /// other failure exits with `1`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Shutdown(ShutdownError::ContextCancelled(_)) => 3,
            _ => 1,
        }
    }
}
