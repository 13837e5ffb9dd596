//! Long-running demo service with coordinated graceful shutdown.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (graceful.toml in current directory)
//! cargo run -p graceful-daemon --release
//!
//! # Stop on its own after five seconds
//! cargo run -p graceful-daemon -- --run-for-ms 5000
//!
//! # Configure logging level and format
//! RUST_LOG=debug cargo run -p graceful-daemon -- --log-format console
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` — Path to TOML configuration file (default: `graceful.toml`)
//! - `GRACEFUL_LOG_FORMAT` — `plaintext`, `console` or `json`
//! - `GRACEFUL_TIMEOUT_MS`, `GRACEFUL_SIGNALS`, `GRACEFUL_REJECT_LATE` — shutdown overrides
//! - `RUST_LOG` — Log level filter (default: `info`)

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use graceful::{ParentContext, ShutdownCoordinator, signal::parse_signal_list};

use graceful_daemon::config::{DEFAULT_CONFIG_PATH, DaemonConfig, LogFormat};
use graceful_daemon::error::DaemonError;
use graceful_daemon::telemetry;
use graceful_daemon::worker::{WorkerSettings, spawn_workers};

/// Command-line flags. Each one overrides the matching configuration value.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Number of worker observers.
    #[arg(long)]
    workers: Option<usize>,

    /// Drain timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Comma separated signals that trigger shutdown.
    #[arg(long)]
    signals: Option<String>,

    /// Log output format.
    #[arg(long, env = "GRACEFUL_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Shut down on our own after this many milliseconds.
    #[arg(long)]
    run_for_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            telemetry::init(LogFormat::default());
            tracing::error!("Daemon failed to start: {e}");
            return ExitCode::from(e.exit_code());
        }
    };
    telemetry::init(config.log_format);
    telemetry::log_startup();

    match run(config, cli.run_for_ms).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Daemon failed: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn load_config(cli: &Cli) -> Result<DaemonConfig, DaemonError> {
    let mut config = DaemonConfig::load_from(&cli.config)?;
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.shutdown.timeout = Duration::from_millis(timeout_ms);
    }
    if let Some(signals) = &cli.signals {
        config.shutdown.signals = parse_signal_list(signals)?;
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }
    Ok(config)
}

async fn run(config: DaemonConfig, run_for_ms: Option<u64>) -> Result<(), DaemonError> {
    tracing::info!(
        workers = config.workers,
        timeout = ?config.shutdown.timeout,
        signals = ?config.shutdown.signals,
        "Loaded configuration"
    );

    let coordinator = ShutdownCoordinator::from_config(&config.shutdown);
    let workers = spawn_workers(
        &coordinator,
        config.workers,
        WorkerSettings {
            tick: Duration::from_millis(config.tick_ms),
            cleanup: Duration::from_millis(config.cleanup_ms),
        },
    );

    let mut parent = ParentContext::background();
    if let Some(ms) = run_for_ms {
        parent = parent.with_timeout(Duration::from_millis(ms));
    }

    let report = coordinator.run_with_config(&parent, &config.shutdown).await?;
    workers.wait().await;
    tracing::info!(
        signal = %report.signal,
        drained_in = ?report.drained_in,
        "Daemon shut down gracefully"
    );
    Ok(())
}
