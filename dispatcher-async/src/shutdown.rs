//! Shutdown utilities for graceful termination of an async dispatcher handle.

#[cfg(debug_assertions)]
use crate::invariants::{debug_assert_consumers_woken, debug_assert_shutdown_signaled};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Notify};

/// Shared shutdown state between the dispatcher handle and every open
/// subscription stream.
#[derive(Debug)]
pub(crate) struct ShutdownState {
    /// The underlying `Dispatcher` has been closed for new offers/claims.
    closed: AtomicBool,
    /// Graceful shutdown has been requested; streams should drain and stop.
    shutdown_initiated: AtomicBool,
}

impl ShutdownState {
    pub(crate) fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            shutdown_initiated: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn initiate_shutdown(&self) {
        self.shutdown_initiated.store(true, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }
}

/// Handle for triggering shutdown from the dispatcher side.
pub(crate) struct ShutdownHandle {
    pub(crate) shutdown_tx: Option<oneshot::Sender<()>>,
    pub(crate) state: Arc<ShutdownState>,
    pub(crate) backpressure_notify: Arc<Notify>,
}

impl ShutdownHandle {
    /// Marks the handle closed, wakes the drain signal, and wakes any producer
    /// currently awaiting backpressure relief so it observes the closed state.
    pub(crate) fn trigger(&mut self) {
        self.state.initiate_shutdown();
        self.state.close();
        tracing::info!("graceful shutdown triggered");

        let signal_sent = self.shutdown_tx.take().map(|tx| tx.send(()).is_ok()).unwrap_or(false);
        #[cfg(debug_assertions)]
        debug_assert_shutdown_signaled!(true, signal_sent || self.shutdown_tx.is_none());

        self.backpressure_notify.notify_waiters();
        #[cfg(debug_assertions)]
        debug_assert_consumers_woken!(true, true);
    }
}

/// A cloneable signal for triggering shutdown from outside the owning task.
///
/// Idempotent: the first call wins, later calls are no-ops.
#[derive(Clone)]
pub struct ShutdownSignal {
    state: Arc<ShutdownState>,
    backpressure_notify: Arc<Notify>,
}

impl ShutdownSignal {
    pub(crate) fn new(state: Arc<ShutdownState>, backpressure_notify: Arc<Notify>) -> Self {
        Self { state, backpressure_notify }
    }

    pub fn shutdown(&self) {
        if !self.state.is_shutdown_initiated() {
            self.state.initiate_shutdown();
            self.state.close();
            self.backpressure_notify.notify_waiters();
        }
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.state.is_shutdown_initiated()
    }
}
