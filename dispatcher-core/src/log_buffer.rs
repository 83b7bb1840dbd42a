//! The fixed-size, partitioned byte region (component C1).

use crate::partition::Partition;
use crate::position::{PositionCodec, PARTITION_COUNT};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI64, Ordering};

/// A contiguous byte region split into [`PARTITION_COUNT`] equal partitions, plus the
/// out-of-band metadata ([`Partition`]) tracking each one's write cursor and status.
///
/// The data region is a raw `UnsafeCell<Box<[u8]>>`: access is mediated entirely by
/// the atomic frame-header protocol in [`crate::frame`], never by Rust references that
/// outlive a single claim/read.
pub struct LogBuffer {
    data: UnsafeCell<Box<[u8]>>,
    partitions: [Partition; PARTITION_COUNT],
    partition_size: usize,
    /// Monotonically increasing occupant generation; the physical partition is
    /// `active_generation % PARTITION_COUNT`.
    active_generation: AtomicI64,
}

// SAFETY: all access to `data` goes through the atomic frame-header protocol, which
// synchronizes producers and consumers the same way the header length field does.
unsafe impl Send for LogBuffer {}
unsafe impl Sync for LogBuffer {}

impl LogBuffer {
    /// Allocates a new log buffer with the given per-partition size (must be a power
    /// of two; validated by the builder before this is called).
    pub(crate) fn new(partition_size: usize) -> Self {
        let total = partition_size * PARTITION_COUNT;
        let data = vec![0u8; total].into_boxed_slice();
        Self {
            data: UnsafeCell::new(data),
            partitions: [Partition::new(false), Partition::new(true), Partition::new(true)],
            partition_size,
            active_generation: AtomicI64::new(0),
        }
    }

    #[inline]
    pub fn partition_size(&self) -> usize {
        self.partition_size
    }

    #[inline]
    pub fn position_codec(&self) -> PositionCodec {
        PositionCodec::new(self.partition_size)
    }

    #[inline]
    pub fn active_generation(&self) -> i64 {
        self.active_generation.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn compare_exchange_active_generation(&self, current: i64, new: i64) -> Result<i64, i64> {
        self.active_generation.compare_exchange(current, new, Ordering::AcqRel, Ordering::Relaxed)
    }

    #[inline]
    pub fn partition(&self, index: usize) -> &Partition {
        &self.partitions[index]
    }

    /// Base pointer of partition `index`'s data region, for use by the atomic
    /// frame-header helpers in [`crate::frame`].
    ///
    /// # Safety
    ///
    /// The caller must only dereference within `[0, partition_size)` of the
    /// returned pointer, and must respect the claim/commit protocol for any writes.
    #[inline]
    pub(crate) unsafe fn partition_base_ptr(&self, index: usize) -> *mut u8 {
        // SAFETY: `data` is never reallocated after construction; `index < PARTITION_COUNT`
        // is upheld by every caller (positions are decoded through `PositionCodec`).
        unsafe {
            let base = (*self.data.get()).as_mut_ptr();
            base.add(index * self.partition_size)
        }
    }

    /// A read-only byte slice over partition `index`'s full data region.
    ///
    /// Safe to call at any time; the *contents* within the slice are only meaningful
    /// where the frame-header protocol says a frame has been committed.
    #[inline]
    pub fn partition_bytes(&self, index: usize) -> &[u8] {
        // SAFETY: bounds match the allocation made in `new`.
        unsafe {
            let base = self.partition_base_ptr(index);
            std::slice::from_raw_parts(base, self.partition_size)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_are_disjoint_regions() {
        let log = LogBuffer::new(1024);
        let p0 = log.partition_bytes(0).as_ptr();
        let p1 = log.partition_bytes(1).as_ptr();
        let p2 = log.partition_bytes(2).as_ptr();
        assert_eq!(p1 as usize - p0 as usize, 1024);
        assert_eq!(p2 as usize - p1 as usize, 1024);
    }

    #[test]
    fn initial_partition_statuses_match_spec() {
        let log = LogBuffer::new(1024);
        use crate::partition::PartitionStatus;
        assert_eq!(log.partition(0).status(), PartitionStatus::Active);
        assert_eq!(log.partition(1).status(), PartitionStatus::Clean);
        assert_eq!(log.partition(2).status(), PartitionStatus::Clean);
    }
}
