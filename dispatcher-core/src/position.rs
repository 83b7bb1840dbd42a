//! Position codec (component C2): packs `(partition generation, offset)` into a
//! monotonic 64-bit coordinate.
//!
//! The physical partition backing generation `g` is always `g % PARTITION_COUNT`
//! (see [`crate::partition`]), so the generation keeps climbing forever while the
//! underlying storage cycles through exactly three regions. This is what keeps
//! [`Position`] monotonic across unbounded rotations.

use std::sync::atomic::{AtomicI64, Ordering};

/// Number of partitions a `LogBuffer` rotates through.
pub const PARTITION_COUNT: usize = 3;

/// A monotonically non-decreasing coordinate into a partitioned log.
///
/// The high bits encode the partition generation, the low `partition_bits` bits
/// encode the byte offset within that partition. Two positions compare correctly
/// with plain integer ordering: `partition_bits` is fixed for the lifetime of a
/// given `LogBuffer`, so generation always dominates offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position(i64);

impl Position {
    /// The zero position: generation 0, offset 0.
    pub const ZERO: Position = Position(0);

    #[must_use]
    pub(crate) const fn raw(self) -> i64 {
        self.0
    }

    #[must_use]
    pub(crate) const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// The raw packed coordinate, as the `i64` position the external
    /// `offer`/`claim` interface reports.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

/// Packs and unpacks [`Position`] values for a `LogBuffer` with a fixed partition size.
///
/// `partition_bits` is `log2(partition_size)`; a `PositionCodec` is only valid for
/// the `partition_size` it was built from.
#[derive(Debug, Clone, Copy)]
pub struct PositionCodec {
    partition_bits: u32,
}

impl PositionCodec {
    /// Builds a codec for a partition size.
    ///
    /// # Panics
    ///
    /// Panics if `partition_size` is not a power of two.
    #[must_use]
    pub fn new(partition_size: usize) -> Self {
        assert!(partition_size.is_power_of_two(), "partition_size must be a power of two");
        Self {
            partition_bits: partition_size.trailing_zeros(),
        }
    }

    /// The partition size (in bytes) this codec was built for.
    #[must_use]
    pub fn partition_size(&self) -> usize {
        1usize << self.partition_bits
    }

    /// Packs a `(generation, offset)` pair into a [`Position`].
    ///
    /// `offset` must be `< partition_size`.
    #[must_use]
    pub fn pack(&self, generation: i64, offset: u32) -> Position {
        debug_assert!((offset as u64) < (1u64 << self.partition_bits), "offset out of partition bounds");
        Position(generation << self.partition_bits | i64::from(offset))
    }

    /// Splits a [`Position`] back into `(generation, offset)`.
    #[must_use]
    pub fn unpack(&self, position: Position) -> (i64, u32) {
        let generation = position.0 >> self.partition_bits;
        let mask = (1i64 << self.partition_bits) - 1;
        let offset = (position.0 & mask) as u32;
        (generation, offset)
    }

    /// The generation component of a position (which physical partition is
    /// `generation % PARTITION_COUNT`).
    #[must_use]
    pub fn generation(&self, position: Position) -> i64 {
        position.0 >> self.partition_bits
    }

    /// The physical partition index (`0..PARTITION_COUNT`) a position falls in.
    #[must_use]
    pub fn partition_index(&self, position: Position) -> usize {
        (self.generation(position).rem_euclid(PARTITION_COUNT as i64)) as usize
    }

    /// The byte offset component of a position.
    #[must_use]
    pub fn offset(&self, position: Position) -> u32 {
        self.unpack(position).1
    }

    /// Advances `position` by `bytes`, rolling over into the next generation
    /// (offset reset to 0) if the result would exceed the partition size.
    ///
    /// This mirrors the appender's rotation behaviour: crossing a partition
    /// boundary always lands exactly on the next generation's offset 0.
    #[must_use]
    pub fn advance(&self, position: Position, bytes: u32) -> Position {
        let (generation, offset) = self.unpack(position);
        let partition_size = self.partition_size() as u64;
        let new_offset = u64::from(offset) + u64::from(bytes);
        if new_offset >= partition_size {
            self.pack(generation + 1, 0)
        } else {
            self.pack(generation, new_offset as u32)
        }
    }

    /// The position one past the last byte of the partition containing `position`.
    #[must_use]
    pub fn partition_end(&self, position: Position) -> Position {
        let generation = self.generation(position);
        self.pack(generation + 1, 0)
    }

    /// Adds `bytes` to `position`, correctly spanning any number of partition
    /// boundaries. Unlike [`PositionCodec::advance`] (which only ever has to cross
    /// at most one boundary, since a frame never exceeds a partition), this is used
    /// for publisher-limit arithmetic where the offset can be multiple partitions
    /// wide.
    #[must_use]
    pub fn add_bytes(&self, position: Position, bytes: i64) -> Position {
        let (generation, offset) = self.unpack(position);
        let partition_size = self.partition_size() as i64;
        let total = i64::from(offset) + bytes;
        let extra_generations = total.div_euclid(partition_size);
        let new_offset = total.rem_euclid(partition_size) as u32;
        self.pack(generation + extra_generations, new_offset)
    }
}

/// A [`Position`] that can be shared and read across threads: subscription
/// position, read by the dispatcher's publisher-limit calculation and (in
/// pipeline mode) by the next subscription in the chain.
#[derive(Debug)]
pub struct AtomicPosition(AtomicI64);

impl AtomicPosition {
    #[must_use]
    pub fn new(initial: Position) -> Self {
        Self(AtomicI64::new(initial.raw()))
    }

    #[must_use]
    pub fn load(&self) -> Position {
        Position::from_raw(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, position: Position) {
        self.0.store(position.raw(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trips() {
        let codec = PositionCodec::new(1024);
        for generation in [0i64, 1, 2, 3, 100, 1_000_000] {
            for offset in [0u32, 8, 512, 1016] {
                let position = codec.pack(generation, offset);
                assert_eq!(codec.unpack(position), (generation, offset));
            }
        }
    }

    #[test]
    fn partition_index_cycles_through_three_partitions() {
        let codec = PositionCodec::new(1024);
        assert_eq!(codec.partition_index(codec.pack(0, 0)), 0);
        assert_eq!(codec.partition_index(codec.pack(1, 0)), 1);
        assert_eq!(codec.partition_index(codec.pack(2, 0)), 2);
        assert_eq!(codec.partition_index(codec.pack(3, 0)), 0);
    }

    #[test]
    fn advance_stays_within_partition() {
        let codec = PositionCodec::new(1024);
        let p = codec.pack(0, 1000);
        let advanced = codec.advance(p, 16);
        assert_eq!(codec.unpack(advanced), (0, 1016));
    }

    #[test]
    fn advance_rolls_over_to_next_generation() {
        let codec = PositionCodec::new(1024);
        let p = codec.pack(0, 1016);
        let advanced = codec.advance(p, 16);
        assert_eq!(codec.unpack(advanced), (1, 0));
    }

    #[test]
    fn positions_order_monotonically_across_generations() {
        let codec = PositionCodec::new(1024);
        let a = codec.pack(5, 1000);
        let b = codec.pack(6, 0);
        assert!(a < b);
    }

    #[test]
    fn partition_end_is_next_generation_offset_zero() {
        let codec = PositionCodec::new(1024);
        let p = codec.pack(2, 500);
        assert_eq!(codec.unpack(codec.partition_end(p)), (3, 0));
    }

    #[test]
    fn add_bytes_spans_multiple_partitions() {
        let codec = PositionCodec::new(1024);
        let p = codec.pack(0, 500);
        let moved = codec.add_bytes(p, 2048);
        // 500 + 2048 = 2548 = 2*1024 + 500, so generation advances by 2.
        assert_eq!(codec.unpack(moved), (2, 500));
    }

    #[test]
    fn add_bytes_zero_is_identity() {
        let codec = PositionCodec::new(1024);
        let p = codec.pack(7, 300);
        assert_eq!(codec.add_bytes(p, 0), p);
    }
}
