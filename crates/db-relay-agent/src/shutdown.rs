// crates/db-relay-agent/src/shutdown.rs
// ============================================================================
// Module: Shutdown Coordinator
// Description: Monotonic shutdown flag and in-flight operation tracking.
// Purpose: Let the process stop intake and drain work before exit.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! [`ShutdownCoordinator`] is a cloneable handle shared by the connection
//! owner, dispatch tasks, and the signal handler. Each dispatched operation
//! holds an [`InflightGuard`]; dropping the last guard wakes any task
//! blocked in [`ShutdownCoordinator::wait_for_in_flight`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::sync::watch;

// ============================================================================
// SECTION: Coordinator
// ============================================================================

/// Shared shutdown state.
struct ShutdownState {
    /// Set once by [`ShutdownCoordinator::begin_shutdown`]; never cleared.
    shutting_down: AtomicBool,
    /// Broadcasts the shutdown flag to waiting tasks.
    signal: watch::Sender<bool>,
    /// Number of operations currently executing.
    in_flight: AtomicUsize,
    /// Notified when `in_flight` drops to zero.
    idle: Notify,
}

/// Cloneable shutdown handle.
///
/// # Invariants
/// - `is_shutting_down` is monotonic.
/// - No guard is issued after shutdown begins.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    /// Shared state.
    inner: Arc<ShutdownState>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    /// Creates a coordinator with no in-flight work.
    #[must_use]
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            inner: Arc::new(ShutdownState {
                shutting_down: AtomicBool::new(false),
                signal,
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Sets the shutdown flag and wakes every subscriber.
    ///
    /// Returns true on the first call only.
    pub fn begin_shutdown(&self) -> bool {
        let first = !self.inner.shutting_down.swap(true, Ordering::SeqCst);
        self.inner.signal.send_replace(true);
        first
    }

    /// Returns true once shutdown has begun.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Returns a receiver that observes the shutdown flag.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.signal.subscribe()
    }

    /// Starts tracking one operation, unless shutdown has begun.
    #[must_use]
    pub fn try_track(&self) -> Option<InflightGuard> {
        if self.is_shutting_down() {
            return None;
        }
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.is_shutting_down() {
            release(&self.inner);
            return None;
        }
        Some(InflightGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Returns the number of operations currently executing.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Waits until no operation is in flight or `timeout` elapses.
    ///
    /// Returns true when the in-flight count reached zero in time.
    pub async fn wait_for_in_flight(&self, timeout: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.inner.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }
}

/// Decrements the in-flight count and wakes waiters at zero.
fn release(state: &ShutdownState) {
    if state.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
        state.idle.notify_waiters();
    }
}

/// RAII marker for one in-flight operation.
pub struct InflightGuard {
    /// Shared state to release on drop.
    inner: Arc<ShutdownState>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        release(&self.inner);
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
