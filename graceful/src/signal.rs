//! OS signal selection and subscription.
//!
//! [`Signal`] names the process signals a coordinator can treat as a
//! termination request. [`SignalListener`] installs the runtime listeners for a
//! set of signals up front and then resolves with whichever one arrives first.
//!
//! On Unix every variant is supported. On other platforms only
//! [`Signal::Interrupt`] (Ctrl+C) can be observed; the rest are ignored.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ShutdownError};

/// Signals used when the caller does not provide any: `SIGINT` and `SIGTERM`.
pub const DEFAULT_SIGNALS: &[Signal] = &[Signal::Interrupt, Signal::Terminate];

/// A process signal that can request termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Signal {
    /// `SIGINT`, sent by Ctrl+C or `kill -2`.
    Interrupt,
    /// `SIGTERM`, the default of `kill`.
    Terminate,
    /// `SIGHUP`.
    Hangup,
    /// `SIGQUIT`.
    Quit,
    /// `SIGUSR1`.
    User1,
    /// `SIGUSR2`.
    User2,
}

impl Signal {
    /// Conventional `SIG*` name of the signal.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Hangup => "SIGHUP",
            Self::Quit => "SIGQUIT",
            Self::User1 => "SIGUSR1",
            Self::User2 => "SIGUSR2",
        }
    }

    #[cfg(unix)]
    fn kind(self) -> tokio::signal::unix::SignalKind {
        use tokio::signal::unix::SignalKind;
        match self {
            Self::Interrupt => SignalKind::interrupt(),
            Self::Terminate => SignalKind::terminate(),
            Self::Hangup => SignalKind::hangup(),
            Self::Quit => SignalKind::quit(),
            Self::User1 => SignalKind::user_defined1(),
            Self::User2 => SignalKind::user_defined2(),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Signal {
    type Err = ConfigError;

    /// Accepts `SIGINT`, `INT` or `interrupt` style names, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
        match bare {
            "INT" | "INTERRUPT" => Ok(Self::Interrupt),
            "TERM" | "TERMINATE" => Ok(Self::Terminate),
            "HUP" | "HANGUP" => Ok(Self::Hangup),
            "QUIT" => Ok(Self::Quit),
            "USR1" | "USER1" => Ok(Self::User1),
            "USR2" | "USER2" => Ok(Self::User2),
            _ => Err(ConfigError::UnknownSignal(s.to_owned())),
        }
    }
}

impl TryFrom<String> for Signal {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Signal> for String {
    fn from(signal: Signal) -> Self {
        signal.name().to_owned()
    }
}

/// Parses a comma separated list of signal names, skipping empty entries.
///
/// # Errors
///
/// Returns [`ConfigError::UnknownSignal`] for the first unrecognised name.
pub fn parse_signal_list(list: &str) -> Result<Vec<Signal>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

/// Listeners for a set of OS signals, installed eagerly.
///
/// Dropping the listener tears down every subscription it holds.
#[allow(missing_debug_implementations)] // tokio's unix::Signal doesn't impl Debug
pub struct SignalListener {
    #[cfg(unix)]
    streams: Vec<(Signal, tokio::signal::unix::Signal)>,
    #[cfg(not(unix))]
    interrupt: bool,
}

impl SignalListener {
    /// Installs a listener for every signal in `signals`. Duplicates are ignored.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::SignalSubscription`] if any listener cannot be
    /// installed. Listeners installed before the failure are dropped.
    #[allow(clippy::unnecessary_wraps)] // Result needed on Unix for signal registration
    pub fn subscribe(signals: &[Signal]) -> Result<Self, ShutdownError> {
        #[cfg(unix)]
        {
            let mut streams: Vec<(Signal, tokio::signal::unix::Signal)> =
                Vec::with_capacity(signals.len());
            for &signal in signals {
                if streams.iter().any(|(s, _)| *s == signal) {
                    continue;
                }
                let stream = tokio::signal::unix::signal(signal.kind())
                    .map_err(|source| ShutdownError::SignalSubscription { signal, source })?;
                streams.push((signal, stream));
            }
            Ok(Self { streams })
        }

        #[cfg(not(unix))]
        {
            Ok(Self {
                interrupt: signals.contains(&Signal::Interrupt),
            })
        }
    }

    /// Waits for the first subscribed signal to arrive.
    ///
    /// Never resolves if the listener holds no subscriptions.
    pub async fn recv(&mut self) -> Signal {
        #[cfg(unix)]
        {
            if self.streams.is_empty() {
                return std::future::pending().await;
            }
            let waits = self.streams.iter_mut().map(|(signal, stream)| {
                Box::pin(async move { stream.recv().await.map(|()| *signal) })
            });
            let (fired, _, _) = futures_util::future::select_all(waits).await;
            match fired {
                Some(signal) => signal,
                // The runtime dropped the driver; no further signals will arrive.
                None => std::future::pending().await,
            }
        }

        #[cfg(not(unix))]
        {
            if self.interrupt && tokio::signal::ctrl_c().await.is_ok() {
                return Signal::Interrupt;
            }
            std::future::pending().await
        }
    }
}
