#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Coordinated graceful shutdown for long-running Tokio services.
//!
//! Independently running units of work ("observers") register with a
//! [`ShutdownCoordinator`] and receive a [`ShutdownSignal`] plus a [`Closer`].
//! The top-level task awaits [`ShutdownCoordinator::run_until_shutdown`], which
//! waits for an OS signal, an explicit trigger or cancellation of a
//! [`ParentContext`], broadcasts shutdown to every observer, and then waits for
//! all closers to be invoked or for a timeout to elapse.
//!
//! # Modules
//!
//! - [`observer`] - Observer counting and idempotent closers
//! - [`coordinator`] - Trigger race, broadcast and timeout-bounded drain
//! - [`context`] - Cancellable parent context with optional deadline
//! - [`signal`] - Signal names and OS signal subscription
//! - [`config`] - Timeout, signal set and late-registration policy
//! - [`error`] - Error types
//!
//! # Feature Flags
//!
//! - `telemetry` - Emits `tracing` events at each shutdown phase (on by default)

pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod observer;
pub mod signal;

pub use config::ShutdownConfig;
pub use context::ParentContext;
pub use coordinator::{
    DEFAULT_TIMEOUT, ShutdownCoordinator, ShutdownReport, ShutdownSignal, ShutdownState,
    ShutdownTrigger,
};
pub use error::{ConfigError, ContextError, ShutdownError};
pub use observer::{Closer, LateRegistration, ObserverPool};
pub use signal::{DEFAULT_SIGNALS, Signal};
