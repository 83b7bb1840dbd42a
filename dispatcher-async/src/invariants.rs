//! Debug assertion macros for the async wrapper's invariants.
//!
//! Only active in debug builds (`#[cfg(debug_assertions)]`).

// =============================================================================
// INV-ASTREAM-01: Backpressure Relief Signaling
// =============================================================================

/// Asserts that draining fragments also signaled backpressure relief.
macro_rules! debug_assert_backpressure_signaled {
    ($drained:expr, $signaled:expr) => {
        debug_assert!(
            $drained == 0 || $signaled,
            "INV-ASTREAM-01 violated: drained {} fragments but did not signal backpressure relief",
            $drained
        )
    };
}

// =============================================================================
// INV-ASTREAM-02: Graceful Shutdown Drain
// =============================================================================

/// Asserts that a shutdown drain was performed before the stream ends.
macro_rules! debug_assert_shutdown_drained {
    ($shutdown_initiated:expr, $drain_complete:expr) => {
        debug_assert!(
            !$shutdown_initiated || $drain_complete,
            "INV-ASTREAM-02 violated: shutdown initiated but drain not complete"
        )
    };
}

// =============================================================================
// INV-ASINK-01: Commit Notifies Consumers
// =============================================================================

/// Asserts that a successful commit through the sink notified waiting consumers.
macro_rules! debug_assert_data_notified {
    ($commit_succeeded:expr, $notified:expr) => {
        debug_assert!(
            !$commit_succeeded || $notified,
            "INV-ASINK-01 violated: commit succeeded but data_notify was not called"
        )
    };
}

// =============================================================================
// INV-ASHUT-01: Shutdown Signaled
// =============================================================================

macro_rules! debug_assert_shutdown_signaled {
    ($shutdown_called:expr, $signal_sent:expr) => {
        debug_assert!(
            !$shutdown_called || $signal_sent,
            "INV-ASHUT-01 violated: shutdown called but signal was not sent"
        )
    };
}

// =============================================================================
// INV-ASHUT-02: Wake Blocked Producers
// =============================================================================

macro_rules! debug_assert_consumers_woken {
    ($shutdown:expr, $woken:expr) => {
        debug_assert!(
            !$shutdown || $woken,
            "INV-ASHUT-02 violated: shutdown but blocked producers were not woken"
        )
    };
}

pub(crate) use debug_assert_backpressure_signaled;
pub(crate) use debug_assert_consumers_woken;
pub(crate) use debug_assert_data_notified;
pub(crate) use debug_assert_shutdown_drained;
pub(crate) use debug_assert_shutdown_signaled;
