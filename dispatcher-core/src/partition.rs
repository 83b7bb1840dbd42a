//! Partition metadata (component C1, out-of-band half).
//!
//! The data region itself lives in [`crate::log_buffer::LogBuffer`]; this module only
//! holds the atomics that track a partition's write cursor and reclamation state.

use crate::invariants::{debug_assert_reclaim_unanimous, debug_assert_rotated_into_clean};
use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};

/// Lifecycle state of a single partition, see invariant 6 in the design spec:
/// `CLEAN -> ACTIVE -> DIRTY -> CLEAN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PartitionStatus {
    Clean = 0,
    Active = 1,
    Dirty = 2,
}

impl PartitionStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Clean,
            1 => Self::Active,
            _ => Self::Dirty,
        }
    }
}

/// Out-of-band metadata for one of the three physical partitions a `LogBuffer` rotates
/// through. The partition's own index in the `[Partition; PARTITION_COUNT]` array never
/// changes; what changes is which *generation* currently occupies it.
#[derive(Debug)]
pub struct Partition {
    status: AtomicU8,
    /// Next writable byte offset within this partition.
    tail: AtomicU32,
    /// Number of subscriptions that have voted this generation's occupant reclaimable.
    reclaim_votes: AtomicUsize,
}

impl Partition {
    pub(crate) fn new(initially_clean: bool) -> Self {
        Self {
            status: AtomicU8::new(if initially_clean { PartitionStatus::Clean as u8 } else { PartitionStatus::Active as u8 }),
            tail: AtomicU32::new(0),
            reclaim_votes: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn status(&self) -> PartitionStatus {
        PartitionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_status(&self, status: PartitionStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    #[inline]
    pub fn tail(&self) -> u32 {
        self.tail.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn compare_exchange_tail(&self, current: u32, new: u32) -> Result<u32, u32> {
        self.tail.compare_exchange(current, new, Ordering::AcqRel, Ordering::Relaxed)
    }

    /// Atomically claims the right to reset and reactivate this partition: only
    /// succeeds if it is currently `CLEAN`, and only one caller ever wins per
    /// CLEAN->ACTIVE transition. Callers that win must follow up with
    /// [`Partition::reset_for_reuse`]; callers that lose must not touch the
    /// partition's tail/votes (someone else owns that generation's occupancy).
    pub(crate) fn try_activate(&self) -> bool {
        let won = self
            .status
            .compare_exchange(
                PartitionStatus::Clean as u8,
                PartitionStatus::Active as u8,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok();
        if won {
            debug_assert_rotated_into_clean!(PartitionStatus::Clean);
        }
        won
    }

    /// Resets the partition for reuse by the next generation that will occupy it:
    /// tail back to zero, reclaim votes cleared. Only call after winning
    /// [`Partition::try_activate`].
    pub(crate) fn reset_for_reuse(&self) {
        self.tail.store(0, Ordering::Relaxed);
        self.reclaim_votes.store(0, Ordering::Relaxed);
    }

    /// Casts this subscription's reclaim vote. Returns `true` if this vote made the
    /// partition eligible for reclamation (`votes == subscriber_count`), in which
    /// case the caller (the dispatcher) flips it to `CLEAN`.
    pub(crate) fn cast_reclaim_vote(&self, subscriber_count: usize) -> bool {
        if subscriber_count == 0 {
            return false;
        }
        let votes = self.reclaim_votes.fetch_add(1, Ordering::AcqRel) + 1;
        let unanimous = votes >= subscriber_count;
        if unanimous {
            debug_assert_reclaim_unanimous!(votes, subscriber_count);
        }
        unanimous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reclaim_votes_trip_at_subscriber_count() {
        let partition = Partition::new(false);
        assert!(!partition.cast_reclaim_vote(3));
        assert!(!partition.cast_reclaim_vote(3));
        assert!(partition.cast_reclaim_vote(3));
    }

    #[test]
    fn reset_for_reuse_clears_state() {
        let partition = Partition::new(false);
        partition.compare_exchange_tail(0, 512).unwrap();
        partition.cast_reclaim_vote(1);
        partition.set_status(PartitionStatus::Dirty);
        partition.set_status(PartitionStatus::Clean);

        assert!(partition.try_activate());
        partition.reset_for_reuse();

        assert_eq!(partition.tail(), 0);
        assert_eq!(partition.status(), PartitionStatus::Active);
        assert!(!partition.cast_reclaim_vote(2));
    }

    #[test]
    fn try_activate_only_succeeds_once() {
        let partition = Partition::new(true);
        assert!(partition.try_activate());
        assert!(!partition.try_activate());
    }
}
