//! Worker observers.
//!
//! Each worker registers with the [`ShutdownCoordinator`], does periodic work
//! until shutdown is broadcast, spends a short time cleaning up and then
//! releases its closer.

use std::time::Duration;

use graceful::ShutdownCoordinator;
use tokio_util::task::TaskTracker;

/// Timing for a group of workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Interval between ticks.
    pub tick: Duration,
    /// Time spent cleaning up after shutdown is broadcast.
    pub cleanup: Duration,
}

/// Spawns `count` workers registered with `coordinator`.
///
/// The returned tracker is closed and can be awaited to join every worker.
#[must_use]
pub fn spawn_workers(
    coordinator: &ShutdownCoordinator,
    count: usize,
    settings: WorkerSettings,
) -> TaskTracker {
    let tracker = TaskTracker::new();
    for id in 0..count {
        let (signal, closer) = coordinator.register_observer();
        tracker.spawn(async move {
            let mut ticker = tokio::time::interval(settings.tick.max(Duration::from_millis(1)));
            let mut ticks: u64 = 0;
            loop {
                tokio::select! {
                    biased;
                    () = signal.wait() => break,
                    _ = ticker.tick() => {
                        ticks += 1;
                        tracing::debug!(worker = id, ticks, "tick");
                    }
                }
            }
            tracing::info!(worker = id, ticks, "shutdown requested, cleaning up");
            tokio::time::sleep(settings.cleanup).await;
            closer.close();
            tracing::info!(worker = id, "worker stopped");
        });
    }
    tracker.close();
    tracker
}
