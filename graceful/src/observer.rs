//! Observer bookkeeping.
//!
//! An [`ObserverPool`] counts units of work that must finish before the process
//! terminates. Each [`register`](ObserverPool::register) call hands out a
//! [`Closer`]; [`wait`](ObserverPool::wait) suspends until every closer handed
//! out so far has been released.
//!
//! Counting is backed by a [`TaskTracker`], so a registration that lands while
//! a `wait` is in flight is honoured as long as it happens before the count
//! first reaches zero. The pool keeps the tracker token of every registration;
//! only [`Closer::close`] gives it back. A closer that is dropped unclosed
//! leaves its observer pending.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TaskTrackerToken;

/// What [`ObserverPool::register`] does once terminal shutdown has begun.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LateRegistration {
    /// Late observers are counted and waited on like any other.
    #[default]
    Accept,
    /// Late observers receive a detached closer and are not waited on.
    ///
    /// A registration that reads the shutdown flag just before
    /// [`ObserverPool::begin_shutdown`] stores it is still counted.
    Reject,
}

/// Counts registered observers and waits for all of them to finish.
///
/// Cloning is cheap; clones share the same count.
#[derive(Clone)]
pub struct ObserverPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    tracker: TaskTracker,
    /// Token per open registration, keyed by closer id.
    tokens: Mutex<HashMap<u64, TaskTrackerToken>>,
    next_id: AtomicU64,
    shutting_down: AtomicBool,
    policy: LateRegistration,
}

impl ObserverPool {
    /// Creates an empty pool that accepts late registrations.
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(LateRegistration::default())
    }

    /// Creates an empty pool with an explicit late-registration policy.
    #[must_use]
    pub fn with_policy(policy: LateRegistration) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                tracker: TaskTracker::new(),
                tokens: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                shutting_down: AtomicBool::new(false),
                policy,
            }),
        }
    }

    /// Registers one observer and returns the closer that releases it.
    ///
    /// Under [`LateRegistration::Reject`], registrations made after
    /// [`begin_shutdown`](Self::begin_shutdown) return a detached closer that
    /// leaves the count untouched.
    pub fn register(&self) -> Closer {
        if self.inner.policy == LateRegistration::Reject
            && self.inner.shutting_down.load(Ordering::Acquire)
        {
            #[cfg(feature = "telemetry")]
            tracing::debug!("graceful.observer.rejected_late_registration");
            return Closer::detached();
        }
        let token = self.inner.tracker.token();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock_tokens().insert(id, token);
        Closer {
            guard: Some(Arc::new(CloseGuard {
                closed: AtomicBool::new(false),
                id,
                pool: Arc::clone(&self.inner),
            })),
        }
    }

    /// Number of observers registered and not yet closed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Marks the start of terminal shutdown.
    pub fn begin_shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::Release);
    }

    /// Returns `true` once [`begin_shutdown`](Self::begin_shutdown) was called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    /// The late-registration policy of this pool.
    #[must_use]
    pub fn policy(&self) -> LateRegistration {
        self.inner.policy
    }

    /// Waits until the pending count reaches zero.
    ///
    /// Returns immediately if nothing is pending. Registrations keep being
    /// counted while a wait is in flight.
    pub async fn wait(&self) {
        // The tracker only reports empty once closed; closing does not stop
        // tokens from being issued.
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}

impl PoolInner {
    fn lock_tokens(&self) -> MutexGuard<'_, HashMap<u64, TaskTrackerToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ObserverPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObserverPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverPool")
            .field("pending", &self.pending())
            .field("shutting_down", &self.is_shutting_down())
            .field("policy", &self.inner.policy)
            .finish()
    }
}

/// One-shot capability that releases a single observer from its pool.
///
/// All clones share one guard: the first [`close`](Self::close) across any of
/// them releases the observer, later calls do nothing. Dropping every clone
/// without closing leaves the observer pending.
#[derive(Clone)]
#[must_use = "the observer stays pending until its closer is closed"]
pub struct Closer {
    guard: Option<Arc<CloseGuard>>,
}

struct CloseGuard {
    closed: AtomicBool,
    id: u64,
    pool: Arc<PoolInner>,
}

impl Closer {
    /// A closer that is not tied to any pool. Closing it has no effect.
    pub const fn detached() -> Self {
        Self { guard: None }
    }

    /// Releases the observer. Idempotent and safe to call concurrently.
    pub fn close(&self) {
        let Some(guard) = &self.guard else {
            return;
        };
        if guard.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let token = guard.pool.lock_tokens().remove(&guard.id);
        drop(token);
    }

    /// Returns `true` if the observer was released, or the closer is detached.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.guard
            .as_ref()
            .is_none_or(|guard| guard.closed.load(Ordering::Acquire))
    }

    /// Returns `true` if this closer does not count towards any pool.
    #[must_use]
    pub const fn is_detached(&self) -> bool {
        self.guard.is_none()
    }
}

impl fmt::Debug for Closer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closer")
            .field("detached", &self.is_detached())
            .field("closed", &self.is_closed())
            .finish()
    }
}
