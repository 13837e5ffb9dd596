//! Error types for the shutdown coordinator.

use std::time::Duration;

use crate::signal::Signal;

/// Cause reported when a [`ParentContext`](crate::ParentContext) completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// The parent context was cancelled explicitly.
    #[error("context canceled")]
    Canceled,

    /// The parent context reached its deadline.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Errors returned by [`ShutdownCoordinator::run_until_shutdown`](crate::ShutdownCoordinator::run_until_shutdown).
///
/// None of these terminate the process. Whether to exit, retry or log and
/// continue is left to the caller.
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    /// Shutdown was triggered by the parent context rather than an OS signal.
    ///
    /// Reported even when every observer drained in time.
    #[error("graceful shutdown: {0}")]
    ContextCancelled(#[source] ContextError),

    /// The drain timeout elapsed while observers were still pending.
    #[error("graceful shutdown: {outstanding} observers not closed after {timeout:?}: timeout waiting for shutdown")]
    DrainTimeout {
        /// Number of observers that had not invoked their closer.
        outstanding: usize,
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// Installing the OS signal listener failed.
    #[error("failed to subscribe to {signal}: {source}")]
    SignalSubscription {
        /// The signal whose listener could not be installed.
        signal: Signal,
        /// Underlying I/O error from the runtime.
        #[source]
        source: std::io::Error,
    },

    /// The shutdown sequence already ran on this coordinator.
    #[error("shutdown sequence already ran for this coordinator")]
    AlreadyRun,
}

impl ShutdownError {
    /// Returns `true` if the drain timed out.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::DrainTimeout { .. })
    }

    /// Returns `true` if the parent context triggered the shutdown.
    #[must_use]
    pub const fn is_context_cancelled(&self) -> bool {
        matches!(self, Self::ContextCancelled(_))
    }

    /// Number of observers still outstanding, for [`Self::DrainTimeout`].
    #[must_use]
    pub const fn outstanding(&self) -> Option<usize> {
        match self {
            Self::DrainTimeout { outstanding, .. } => Some(*outstanding),
            _ => None,
        }
    }

    /// The context cause, for [`Self::ContextCancelled`].
    #[must_use]
    pub const fn context_cause(&self) -> Option<ContextError> {
        match self {
            Self::ContextCancelled(cause) => Some(*cause),
            _ => None,
        }
    }
}

/// Errors produced while loading a [`ShutdownConfig`](crate::ShutdownConfig).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed.
    #[error("invalid value for {var}: {value:?} ({reason})")]
    InvalidEnv {
        /// Name of the environment variable.
        var: &'static str,
        /// The raw value that was rejected.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A signal name was not recognised.
    #[error("unknown signal name: {0:?}")]
    UnknownSignal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_context_cancelled_exposes_cause_as_source() {
        let err = ShutdownError::ContextCancelled(ContextError::Canceled);
        assert_eq!(err.to_string(), "graceful shutdown: context canceled");
        let source = err.source().unwrap();
        assert_eq!(
            source.downcast_ref::<ContextError>(),
            Some(&ContextError::Canceled)
        );
        assert!(err.is_context_cancelled());
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_drain_timeout_reports_outstanding() {
        let err = ShutdownError::DrainTimeout {
            outstanding: 3,
            timeout: Duration::from_millis(50),
        };
        assert!(err.is_timeout());
        assert_eq!(err.outstanding(), Some(3));
        assert!(err.to_string().contains("3 observers not closed"));
        assert_eq!(err.context_cause(), None);
    }
}
