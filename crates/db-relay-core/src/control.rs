// crates/db-relay-core/src/control.rs
// ============================================================================
// Module: Operation Control
// Description: Per-operation cancellation and commit arbitration.
// Purpose: Keep the reported outcome of a timed-out operation truthful.
// Dependencies: std
// ============================================================================

//! ## Overview
//! An [`OperationControl`] is shared between the caller that enforces the
//! request deadline and the engine executing the operation. Exactly one of
//! two transitions wins:
//!
//! - [`OperationControl::cancel`]: the caller gives up. The engine must not
//!   make any side effect durable afterwards, and the registered interrupt
//!   hook is fired to abort work in progress.
//! - [`OperationControl::begin_commit`]: the engine reaches the point where a
//!   side effect becomes durable. A later `cancel` fails, so the caller waits
//!   for the real outcome instead of reporting a timeout for work that was
//!   committed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;

use crate::engine::EngineError;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Operation is executing and may still be cancelled.
const RUNNING: u8 = 0;
/// Caller gave up; nothing may be committed.
const CANCELLED: u8 = 1;
/// Engine is committing; cancellation is no longer possible.
const COMMITTING: u8 = 2;

/// Hook that aborts backend work in progress.
type InterruptHook = Box<dyn Fn() + Send + Sync>;

/// Cancellation and commit arbiter for one operation.
///
/// # Invariants
/// - The state leaves `RUNNING` at most once.
/// - The interrupt hook only runs while it is registered, so it never reaches
///   work belonging to a later operation.
pub struct OperationControl {
    /// Current state: running, cancelled, or committing.
    state: AtomicU8,
    /// Interrupt hook for the backend resource currently in use.
    interrupt: Mutex<Option<InterruptHook>>,
}

impl Default for OperationControl {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OperationControl {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("OperationControl").field("state", &self.state.load(Ordering::SeqCst)).finish()
    }
}

impl OperationControl {
    /// Creates a control in the running state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(RUNNING),
            interrupt: Mutex::new(None),
        }
    }

    /// Returns true once the caller has cancelled the operation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::SeqCst) == CANCELLED
    }

    /// Fails with [`EngineError::Cancelled`] once the operation is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Cancelled`] after [`Self::cancel`] succeeded.
    pub fn check(&self) -> Result<(), EngineError> {
        if self.is_cancelled() { Err(EngineError::Cancelled) } else { Ok(()) }
    }

    /// Cancels the operation and fires the interrupt hook.
    ///
    /// Returns false when the engine already started committing; the caller
    /// must then wait for the real outcome.
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .state
            .compare_exchange(RUNNING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if cancelled && let Ok(hook) = self.interrupt.lock() && let Some(interrupt) = hook.as_ref() {
            interrupt();
        }
        cancelled || self.is_cancelled()
    }

    /// Claims the right to make the operation's side effects durable.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Cancelled`] when the caller already gave up;
    /// the engine must then roll back.
    pub fn begin_commit(&self) -> Result<(), EngineError> {
        match self.state.compare_exchange(RUNNING, COMMITTING, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) | Err(COMMITTING) => Ok(()),
            Err(_) => Err(EngineError::Cancelled),
        }
    }

    /// Registers the hook fired by [`Self::cancel`] while work is running.
    pub fn set_interrupt(&self, hook: impl Fn() + Send + Sync + 'static) {
        if let Ok(mut slot) = self.interrupt.lock() {
            *slot = Some(Box::new(hook));
        }
    }

    /// Unregisters the interrupt hook before the resource is released.
    pub fn clear_interrupt(&self) {
        if let Ok(mut slot) = self.interrupt.lock() {
            *slot = None;
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
