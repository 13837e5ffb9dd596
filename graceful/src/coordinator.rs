//! Process-wide shutdown coordination.
//!
//! A [`ShutdownCoordinator`] hands out observer registrations, races OS signals
//! against a [`ParentContext`], broadcasts shutdown to every observer and then
//! waits, bounded by a timeout, for the observers to finish.
//!
//! ```ignore
//! use std::time::Duration;
//! use graceful::{ParentContext, ShutdownCoordinator};
//!
//! let coordinator = ShutdownCoordinator::new();
//! let (signal, closer) = coordinator.register_observer();
//! tokio::spawn(async move {
//!     signal.wait().await;
//!     // flush buffers, close connections...
//!     closer.close();
//! });
//!
//! coordinator
//!     .run_until_shutdown(&ParentContext::background(), Duration::from_secs(10), &[])
//!     .await?;
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::config::ShutdownConfig;
use crate::context::ParentContext;
use crate::error::{ContextError, ShutdownError};
use crate::observer::{Closer, LateRegistration, ObserverPool};
use crate::signal::{DEFAULT_SIGNALS, Signal, SignalListener};

/// Drain timeout used when the caller passes [`Duration::ZERO`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle of a [`ShutdownCoordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownState {
    /// No shutdown run has started.
    Idle,
    /// Listening for a signal or parent cancellation.
    SignalArmed,
    /// A trigger fired and shutdown is being broadcast.
    Triggered,
    /// Waiting for observers to close.
    Draining,
    /// Every observer closed within the timeout.
    Done,
    /// The timeout elapsed with observers still pending.
    TimedOut,
}

impl ShutdownState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::SignalArmed,
            2 => Self::Triggered,
            3 => Self::Draining,
            4 => Self::Done,
            _ => Self::TimedOut,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::SignalArmed => 1,
            Self::Triggered => 2,
            Self::Draining => 3,
            Self::Done => 4,
            Self::TimedOut => 5,
        }
    }
}

/// The event that started shutdown. Exactly one is recorded per coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// An OS signal arrived, or [`ShutdownCoordinator::trigger_external_shutdown`] was called.
    Signal(Signal),
    /// The parent context completed first.
    ContextCancelled(ContextError),
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(signal) => write!(f, "signal {signal}"),
            Self::ContextCancelled(cause) => write!(f, "parent context: {cause}"),
        }
    }
}

/// Outcome of a clean, signal-triggered shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// The signal that started shutdown.
    pub signal: Signal,
    /// Observers pending when the broadcast went out.
    pub observers: usize,
    /// Time spent waiting for observers to close.
    pub drained_in: Duration,
}

/// Read-only view of a broadcast-once flag.
///
/// Observers hold one to learn when shutdown was requested. Waiting on a handle
/// whose flag is already set returns immediately.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    /// Returns `true` once the flag was set.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Waits until the flag is set.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }

    /// Consumes the handle into a `'static` future that resolves once the flag is set.
    pub async fn wait_owned(self) {
        self.token.cancelled_owned().await;
    }
}

/// Owns the shutdown broadcast and the observer pool for one process.
///
/// Cloning is cheap; clones drive the same shutdown sequence.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    /// Set once when shutdown is broadcast.
    shutdown: CancellationToken,
    /// Set once every observer closed.
    drained: CancellationToken,
    /// Programmatic trigger, equivalent to receiving `SIGINT`.
    external: CancellationToken,
    observers: ObserverPool,
    /// Runs the broadcast-then-wait task.
    tasks: TaskTracker,
    state: AtomicU8,
    started: AtomicBool,
    trigger: OnceLock<ShutdownTrigger>,
}

impl ShutdownCoordinator {
    /// Creates a coordinator that accepts late observer registrations.
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(LateRegistration::default())
    }

    /// Creates a coordinator with an explicit late-registration policy.
    #[must_use]
    pub fn with_policy(policy: LateRegistration) -> Self {
        Self {
            inner: Arc::new(Inner {
                shutdown: CancellationToken::new(),
                drained: CancellationToken::new(),
                external: CancellationToken::new(),
                observers: ObserverPool::with_policy(policy),
                tasks: TaskTracker::new(),
                state: AtomicU8::new(ShutdownState::Idle.as_u8()),
                started: AtomicBool::new(false),
                trigger: OnceLock::new(),
            }),
        }
    }

    /// Creates a coordinator using the policy from `config`.
    #[must_use]
    pub fn from_config(config: &ShutdownConfig) -> Self {
        Self::with_policy(config.late_registration)
    }

    /// Registers an observer.
    ///
    /// Returns the handle that fires when shutdown is broadcast and the closer
    /// the observer must invoke once its cleanup is done. Observers registered
    /// after the broadcast see the handle already fired. The observer stays
    /// pending until the closer is closed; dropping it does not release it.
    #[must_use = "the observer stays pending until its closer is closed"]
    pub fn register_observer(&self) -> (ShutdownSignal, Closer) {
        let closer = self.inner.observers.register();
        (self.shutdown_signal(), closer)
    }

    /// A handle on the shutdown broadcast that does not count as an observer.
    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            token: self.inner.shutdown.clone(),
        }
    }

    /// A handle that fires once every observer closed after shutdown.
    #[must_use]
    pub fn drained(&self) -> ShutdownSignal {
        ShutdownSignal {
            token: self.inner.drained.clone(),
        }
    }

    /// Requests shutdown as if `SIGINT` had been received.
    ///
    /// Safe to call from any task; calls after the first have no effect. The
    /// request is picked up by [`run_until_shutdown`](Self::run_until_shutdown),
    /// including one that starts later.
    pub fn trigger_external_shutdown(&self) {
        if self.inner.external.is_cancelled() {
            return;
        }
        #[cfg(feature = "telemetry")]
        tracing::info!("graceful.shutdown.external_trigger");
        self.inner.external.cancel();
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ShutdownState {
        ShutdownState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// The event that started shutdown, once one has fired.
    #[must_use]
    pub fn trigger(&self) -> Option<ShutdownTrigger> {
        self.inner.trigger.get().copied()
    }

    /// Returns `true` once shutdown was broadcast.
    #[must_use]
    pub fn is_shutdown_triggered(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Number of observers that have not closed yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.observers.pending()
    }

    /// Runs the shutdown sequence with a parent context that never completes.
    ///
    /// # Errors
    ///
    /// See [`run_until_shutdown`](Self::run_until_shutdown).
    pub async fn run_until_signal(
        &self,
        timeout: Duration,
        signals: &[Signal],
    ) -> Result<ShutdownReport, ShutdownError> {
        self.run_until_shutdown(&ParentContext::background(), timeout, signals)
            .await
    }

    /// Runs the shutdown sequence with the timeout and signals from `config`.
    ///
    /// # Errors
    ///
    /// See [`run_until_shutdown`](Self::run_until_shutdown).
    pub async fn run_with_config(
        &self,
        parent: &ParentContext,
        config: &ShutdownConfig,
    ) -> Result<ShutdownReport, ShutdownError> {
        self.run_until_shutdown(parent, config.timeout, &config.signals)
            .await
    }

    /// Waits for a termination trigger, broadcasts shutdown and waits for
    /// observers to drain.
    ///
    /// The trigger is the first of: a signal in `signals` (default `SIGINT` and
    /// `SIGTERM` when empty), [`trigger_external_shutdown`](Self::trigger_external_shutdown),
    /// or completion of `parent`. A zero `timeout` means [`DEFAULT_TIMEOUT`].
    ///
    /// Meant to be awaited once from the top-level task. Straggling observers
    /// are not cancelled when the timeout elapses.
    ///
    /// Dropping the future before a trigger fires, or a failed signal
    /// subscription, returns the coordinator to [`ShutdownState::Idle`] so it
    /// can be run again. Once shutdown was broadcast the run counts as done.
    ///
    /// # Errors
    ///
    /// - [`ShutdownError::SignalSubscription`] if a signal listener cannot be installed.
    /// - [`ShutdownError::ContextCancelled`] if `parent` triggered shutdown, even
    ///   when observers drained in time.
    /// - [`ShutdownError::DrainTimeout`] if observers were still pending at the timeout.
    /// - [`ShutdownError::AlreadyRun`] if this coordinator already ran.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "graceful.run_until_shutdown", skip_all, fields(timeout = ?timeout))
    )]
    pub async fn run_until_shutdown(
        &self,
        parent: &ParentContext,
        timeout: Duration,
        signals: &[Signal],
    ) -> Result<ShutdownReport, ShutdownError> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(ShutdownError::AlreadyRun);
        }
        let signals = if signals.is_empty() {
            DEFAULT_SIGNALS
        } else {
            signals
        };
        let timeout = if timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            timeout
        };

        let mut armed = ArmedRun::new(&self.inner);
        let trigger = self.race(parent, signals).await?;
        armed.disarm();
        let observers = self.broadcast(trigger);

        self.set_state(ShutdownState::Draining);
        #[cfg(feature = "telemetry")]
        tracing::info!(pending = observers, "waiting for observers to finish");

        let started = Instant::now();
        let drained = tokio::select! {
            biased;
            () = self.inner.drained.cancelled() => true,
            () = tokio::time::sleep(timeout) => self.inner.observers.pending() == 0,
        };

        if !drained {
            let outstanding = self.inner.observers.pending();
            self.set_state(ShutdownState::TimedOut);
            #[cfg(feature = "telemetry")]
            tracing::warn!(outstanding, ?timeout, "graceful shutdown: observers not closed in time");
            return Err(ShutdownError::DrainTimeout {
                outstanding,
                timeout,
            });
        }

        self.set_state(ShutdownState::Done);
        let drained_in = started.elapsed();
        #[cfg(feature = "telemetry")]
        tracing::info!(?drained_in, "all observers closed");

        match trigger {
            ShutdownTrigger::Signal(signal) => Ok(ShutdownReport {
                signal,
                observers,
                drained_in,
            }),
            ShutdownTrigger::ContextCancelled(cause) => {
                Err(ShutdownError::ContextCancelled(cause))
            }
        }
    }

    /// Subscribes to `signals` and waits for the first trigger. The signal
    /// listener is dropped before returning.
    async fn race(
        &self,
        parent: &ParentContext,
        signals: &[Signal],
    ) -> Result<ShutdownTrigger, ShutdownError> {
        let mut listener = SignalListener::subscribe(signals)?;
        self.set_state(ShutdownState::SignalArmed);

        let trigger = tokio::select! {
            biased;
            () = self.inner.external.cancelled() => ShutdownTrigger::Signal(Signal::Interrupt),
            signal = listener.recv() => ShutdownTrigger::Signal(signal),
            cause = parent.done() => ShutdownTrigger::ContextCancelled(cause),
        };
        drop(listener);

        #[cfg(feature = "telemetry")]
        match trigger {
            ShutdownTrigger::Signal(signal) => {
                tracing::info!(%signal, "received {signal}, shutting down");
            }
            ShutdownTrigger::ContextCancelled(cause) => {
                tracing::info!(%cause, "parent context done, shutting down");
            }
        }
        Ok(trigger)
    }

    /// Fires the shutdown broadcast and starts the task that sets the drained
    /// flag once the pool is empty. Returns the pending count at broadcast time.
    fn broadcast(&self, trigger: ShutdownTrigger) -> usize {
        // `started` guarantees a single run, so this is the only writer.
        let _ = self.inner.trigger.set(trigger);
        self.set_state(ShutdownState::Triggered);

        self.inner.observers.begin_shutdown();
        self.inner.shutdown.cancel();
        let pending = self.inner.observers.pending();

        let observers = self.inner.observers.clone();
        let drained = self.inner.drained.clone();
        self.inner.tasks.spawn(async move {
            observers.wait().await;
            drained.cancel();
        });
        self.inner.tasks.close();
        pending
    }

    fn set_state(&self, state: ShutdownState) {
        self.inner.state.store(state.as_u8(), Ordering::Release);
    }
}

/// Rolls an abandoned run back to [`ShutdownState::Idle`] unless disarmed.
struct ArmedRun<'a> {
    inner: &'a Inner,
    armed: bool,
}

impl<'a> ArmedRun<'a> {
    const fn new(inner: &'a Inner) -> Self {
        Self { inner, armed: true }
    }

    const fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ArmedRun<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner
                .state
                .store(ShutdownState::Idle.as_u8(), Ordering::Release);
            self.inner.started.store(false, Ordering::Release);
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("state", &self.state())
            .field("trigger", &self.trigger())
            .field("observers", &self.inner.observers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    fn spawn_run(
        coordinator: &ShutdownCoordinator,
        parent: ParentContext,
        drain_timeout: Duration,
    ) -> JoinHandle<Result<ShutdownReport, ShutdownError>> {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .run_until_shutdown(&parent, drain_timeout, &[])
                .await
        })
    }

    async fn join(
        handle: JoinHandle<Result<ShutdownReport, ShutdownError>>,
    ) -> Result<ShutdownReport, ShutdownError> {
        timeout(Duration::from_secs(5), handle)
            .await
            .expect("run_until_shutdown should return")
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_signal_trigger_with_prompt_close_succeeds() {
        let coordinator = ShutdownCoordinator::new();
        let (signal, closer) = coordinator.register_observer();
        let observer = tokio::spawn(async move {
            signal.wait().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            closer.close();
        });

        let run = spawn_run(
            &coordinator,
            ParentContext::background(),
            Duration::from_secs(30),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(coordinator.state(), ShutdownState::SignalArmed);
        coordinator.trigger_external_shutdown();

        let report = join(run).await.unwrap();
        assert_eq!(report.signal, Signal::Interrupt);
        assert_eq!(report.observers, 1);
        observer.await.unwrap();
        assert_eq!(coordinator.state(), ShutdownState::Done);
        assert_eq!(
            coordinator.trigger(),
            Some(ShutdownTrigger::Signal(Signal::Interrupt))
        );
        assert!(coordinator.drained().is_triggered());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_context_cancel_reports_cause_after_clean_drain() {
        let coordinator = ShutdownCoordinator::new();
        let (signal, closer) = coordinator.register_observer();
        tokio::spawn(async move {
            signal.wait().await;
            closer.close();
        });

        let parent = ParentContext::background();
        let run = spawn_run(&coordinator, parent.clone(), Duration::from_secs(30));
        tokio::time::sleep(Duration::from_millis(50)).await;
        parent.cancel();

        let err = join(run).await.unwrap_err();
        assert!(matches!(
            err,
            ShutdownError::ContextCancelled(ContextError::Canceled)
        ));
        assert_eq!(coordinator.state(), ShutdownState::Done);
        assert_eq!(coordinator.pending(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unclosed_observer_times_out() {
        let coordinator = ShutdownCoordinator::new();
        let (_signal, _closer) = coordinator.register_observer();

        let run = spawn_run(
            &coordinator,
            ParentContext::background(),
            Duration::from_millis(50),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.trigger_external_shutdown();

        let err = join(run).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.outstanding(), Some(1));
        assert_eq!(coordinator.state(), ShutdownState::TimedOut);
        assert!(!coordinator.drained().is_triggered());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_closer_keeps_observer_pending() {
        let coordinator = ShutdownCoordinator::new();
        let _ = coordinator.register_observer();
        assert_eq!(coordinator.pending(), 1);

        let (signal, closer) = coordinator.register_observer();
        tokio::spawn(async move {
            signal.wait().await;
            drop(closer);
        });

        coordinator.trigger_external_shutdown();
        let err = coordinator
            .run_until_signal(Duration::from_millis(50), &[])
            .await
            .unwrap_err();
        assert_eq!(err.outstanding(), Some(2));
        assert_eq!(coordinator.state(), ShutdownState::TimedOut);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_os_signal_triggers_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        let run = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .run_until_signal(Duration::from_secs(5), &[Signal::User2])
                    .await
            })
        };
        while coordinator.state() != ShutdownState::SignalArmed {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let status = std::process::Command::new("kill")
            .args(["-USR2", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let report = join(run).await.unwrap();
        assert_eq!(report.signal, Signal::User2);
        assert_eq!(
            coordinator.trigger(),
            Some(ShutdownTrigger::Signal(Signal::User2))
        );
    }

    #[tokio::test]
    async fn test_abandoned_race_can_run_again() {
        let coordinator = ShutdownCoordinator::new();
        let abandoned = timeout(
            Duration::from_millis(20),
            coordinator.run_until_signal(Duration::from_secs(1), &[]),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(coordinator.state(), ShutdownState::Idle);

        coordinator.trigger_external_shutdown();
        let report = coordinator
            .run_until_signal(Duration::from_secs(1), &[])
            .await
            .unwrap();
        assert_eq!(report.signal, Signal::Interrupt);
        assert_eq!(coordinator.state(), ShutdownState::Done);
    }

    #[tokio::test]
    async fn test_no_observers_returns_immediately() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.trigger_external_shutdown();

        let report = timeout(
            Duration::from_secs(1),
            coordinator.run_until_signal(Duration::from_secs(30), &[]),
        )
        .await
        .expect("empty pool should drain at once")
        .unwrap();
        assert_eq!(report.observers, 0);
        assert!(coordinator.is_shutdown_triggered());
    }

    #[tokio::test]
    async fn test_external_trigger_is_idempotent() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.trigger_external_shutdown();
        coordinator.trigger_external_shutdown();

        let report = coordinator
            .run_until_signal(Duration::from_secs(1), &[Signal::User1])
            .await
            .unwrap();
        assert_eq!(report.signal, Signal::Interrupt);

        coordinator.trigger_external_shutdown();
        assert_eq!(coordinator.state(), ShutdownState::Done);
        let again = coordinator
            .run_until_signal(Duration::from_secs(1), &[])
            .await
            .unwrap_err();
        assert!(matches!(again, ShutdownError::AlreadyRun));
    }

    #[tokio::test]
    async fn test_parent_deadline_reports_deadline_exceeded() {
        let coordinator = ShutdownCoordinator::new();
        let parent = ParentContext::background().with_timeout(Duration::from_millis(20));

        let err = timeout(
            Duration::from_secs(1),
            coordinator.run_until_shutdown(&parent, Duration::ZERO, &[]),
        )
        .await
        .expect("deadline should trigger shutdown")
        .unwrap_err();
        assert_eq!(err.context_cause(), Some(ContextError::DeadlineExceeded));
        assert_eq!(
            coordinator.trigger(),
            Some(ShutdownTrigger::ContextCancelled(
                ContextError::DeadlineExceeded
            ))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_every_observer_sees_broadcast() {
        let coordinator = ShutdownCoordinator::new();
        let observers: Vec<_> = (0..8)
            .map(|_| {
                let (signal, closer) = coordinator.register_observer();
                tokio::spawn(async move {
                    signal.wait().await;
                    closer.close();
                })
            })
            .collect();

        let run = spawn_run(
            &coordinator,
            ParentContext::background(),
            Duration::from_secs(5),
        );
        coordinator.trigger_external_shutdown();
        join(run).await.unwrap();
        for observer in observers {
            observer.await.unwrap();
        }

        let (late, late_closer) = coordinator.register_observer();
        assert!(late.is_triggered());
        late_closer.close();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_late_observer_is_waited_on_when_accepted() {
        let coordinator = ShutdownCoordinator::new();
        let (signal, closer) = coordinator.register_observer();

        let late_coordinator = coordinator.clone();
        tokio::spawn(async move {
            signal.wait().await;
            let (_, late) = late_coordinator.register_observer();
            closer.close();
            tokio::time::sleep(Duration::from_millis(30)).await;
            late.close();
        });

        let run = spawn_run(
            &coordinator,
            ParentContext::background(),
            Duration::from_secs(5),
        );
        coordinator.trigger_external_shutdown();
        let report = join(run).await.unwrap();
        assert!(report.drained_in >= Duration::from_millis(20));
        assert_eq!(coordinator.pending(), 0);
    }

    #[tokio::test]
    async fn test_late_observer_is_ignored_when_rejected() {
        let coordinator = ShutdownCoordinator::with_policy(LateRegistration::Reject);
        coordinator.trigger_external_shutdown();
        coordinator
            .run_until_signal(Duration::from_secs(1), &[])
            .await
            .unwrap();

        let (signal, closer) = coordinator.register_observer();
        assert!(signal.is_triggered());
        assert!(closer.is_detached());
        assert_eq!(coordinator.pending(), 0);
    }
}
