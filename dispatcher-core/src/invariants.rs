//! Debug assertion macros for the invariants documented in `SPEC_FULL.md`.
//!
//! Only active in debug builds (`#[cfg(debug_assertions)]`), so there is zero
//! overhead in release builds.

// =============================================================================
// INV-POS-01: Monotonic Position
// =============================================================================

/// Asserts that a subscription's position never regresses.
///
/// **Invariant**: `new_position >= old_position`
macro_rules! debug_assert_position_monotonic {
    ($old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "INV-POS-01 violated: position went from {:?} to {:?}",
            $old,
            $new
        )
    };
}

// =============================================================================
// INV-PART-01: Single Active Partition
// =============================================================================

/// Asserts that the partition being rotated into was `CLEAN` immediately before
/// the rotator claims it.
macro_rules! debug_assert_rotated_into_clean {
    ($status:expr) => {
        debug_assert!(
            matches!($status, crate::partition::PartitionStatus::Clean),
            "INV-PART-01 violated: rotated into a partition that was not CLEAN"
        )
    };
}

// =============================================================================
// INV-FRAME-01: Alignment
// =============================================================================

/// Asserts that a frame offset is a multiple of `FRAME_ALIGNMENT`.
macro_rules! debug_assert_frame_aligned {
    ($offset:expr) => {
        debug_assert!(
            $offset % crate::byte_value::FRAME_ALIGNMENT == 0,
            "INV-FRAME-01 violated: offset {} is not frame-aligned",
            $offset
        )
    };
}

// =============================================================================
// INV-RECLAIM-01: Reclaim Requires Every Subscription
// =============================================================================

/// Asserts that a partition is only flipped to `CLEAN` once every subscription
/// has voted it reclaimable.
macro_rules! debug_assert_reclaim_unanimous {
    ($votes:expr, $subscriber_count:expr) => {
        debug_assert!(
            $votes >= $subscriber_count,
            "INV-RECLAIM-01 violated: reclaimed with {} of {} votes",
            $votes,
            $subscriber_count
        )
    };
}

pub(crate) use debug_assert_frame_aligned;
pub(crate) use debug_assert_position_monotonic;
pub(crate) use debug_assert_reclaim_unanimous;
pub(crate) use debug_assert_rotated_into_clean;
