//! Example long-running service built on the [`graceful`] shutdown coordinator.
//!
//! # Modules
//!
//! - [`config`] — TOML configuration with environment overrides
//! - [`error`] — Daemon error types and exit codes
//! - [`telemetry`] — `tracing` subscriber setup
//! - [`worker`] — Worker observers driven by the shutdown broadcast

pub mod config;
pub mod error;
pub mod telemetry;
pub mod worker;

pub use config::{DaemonConfig, LogFormat};
pub use error::DaemonError;
