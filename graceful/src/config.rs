//! Shutdown configuration.
//!
//! Defaults match [`DEFAULT_TIMEOUT`] and [`DEFAULT_SIGNALS`]. Values can be
//! overridden from the environment or embedded in a TOML file.
//!
//! # Environment Variables
//!
//! - `GRACEFUL_TIMEOUT_MS` — Drain timeout in milliseconds (`0` means default)
//! - `GRACEFUL_SIGNALS` — Comma separated signal names, e.g. `SIGINT,term,hup`
//! - `GRACEFUL_REJECT_LATE` — `true` to detach observers registered after shutdown began
//!
//! # Example Configuration
//!
//! ```toml
//! timeout_ms = 10000
//! signals = ["SIGINT", "SIGTERM", "SIGHUP"]
//! late_registration = "reject"
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coordinator::DEFAULT_TIMEOUT;
use crate::error::ConfigError;
use crate::observer::LateRegistration;
use crate::signal::{DEFAULT_SIGNALS, Signal, parse_signal_list};

const ENV_TIMEOUT_MS: &str = "GRACEFUL_TIMEOUT_MS";
const ENV_SIGNALS: &str = "GRACEFUL_SIGNALS";
const ENV_REJECT_LATE: &str = "GRACEFUL_REJECT_LATE";

/// Timeout, signal set and late-registration policy for a shutdown run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long to wait for observers after the broadcast.
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,

    /// Signals treated as termination requests.
    pub signals: Vec<Signal>,

    /// Whether observers registered after the broadcast are waited on.
    pub late_registration: LateRegistration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            signals: DEFAULT_SIGNALS.to_vec(),
            late_registration: LateRegistration::Accept,
        }
    }
}

impl ShutdownConfig {
    /// Loads the defaults and applies overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an unparsable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().merge_env(|name| std::env::var(name).ok())
    }

    /// Applies overrides read through `lookup` on top of `self`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an unparsable value.
    pub fn merge_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            let millis: u64 = raw.trim().parse().map_err(|e| ConfigError::InvalidEnv {
                var: ENV_TIMEOUT_MS,
                value: raw.clone(),
                reason: format!("{e}"),
            })?;
            self.timeout = if millis == 0 {
                DEFAULT_TIMEOUT
            } else {
                Duration::from_millis(millis)
            };
        }

        if let Some(raw) = lookup(ENV_SIGNALS) {
            let signals = parse_signal_list(&raw)?;
            if !signals.is_empty() {
                self.signals = signals;
            }
        }

        if let Some(raw) = lookup(ENV_REJECT_LATE) {
            let reject: bool = raw
                .trim()
                .to_ascii_lowercase()
                .parse()
                .map_err(|e| ConfigError::InvalidEnv {
                    var: ENV_REJECT_LATE,
                    value: raw.clone(),
                    reason: format!("{e}"),
                })?;
            self.late_registration = if reject {
                LateRegistration::Reject
            } else {
                LateRegistration::Accept
            };
        }

        Ok(self)
    }

    /// Sets the drain timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the signal set.
    #[must_use]
    pub fn with_signals(mut self, signals: impl Into<Vec<Signal>>) -> Self {
        self.signals = signals.into();
        self
    }

    /// Sets the late-registration policy.
    #[must_use]
    pub const fn with_late_registration(mut self, policy: LateRegistration) -> Self {
        self.late_registration = policy;
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)] // u64 millis covers ~584 million years
    pub(super) fn serialize<S: Serializer>(
        value: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
