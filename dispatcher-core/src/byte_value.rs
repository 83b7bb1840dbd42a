//! Byte-size parsing and frame alignment arithmetic (component C8).

use std::fmt;
use std::str::FromStr;

/// Alignment, in bytes, that every frame (header + payload + padding) is rounded up to.
///
/// Frame headers place `length` at offset 0, which must stay 4-byte aligned for the
/// atomic loads/stores in [`crate::frame`] to be valid; 8-byte alignment gives headroom
/// for future header growth without breaking that invariant.
pub const FRAME_ALIGNMENT: usize = 8;

/// Size, in bytes, of a frame header (see [`crate::frame`]).
pub const HEADER_LENGTH: usize = 16;

/// Smallest partition size the builder will accept.
///
/// Chosen so a partition can hold a reasonable number of minimum-size frames
/// (`HEADER_LENGTH` rounded to `FRAME_ALIGNMENT`) without rotating on every claim.
pub const MINIMUM_PARTITION_SIZE: usize = 1024;

/// Rounds `n` up to the next multiple of `alignment`.
///
/// # Panics
///
/// Panics if `alignment` is not a power of two.
#[inline]
#[must_use]
pub const fn align_up(n: usize, alignment: usize) -> usize {
    assert!(alignment.is_power_of_two(), "alignment must be a power of two");
    (n + alignment - 1) & !(alignment - 1)
}

/// Rounds `n` up to the next power of two, never below `floor`.
#[inline]
#[must_use]
pub fn pow2_at_least(n: usize, floor: usize) -> usize {
    n.max(floor).next_power_of_two()
}

/// A byte quantity parsed from a human-friendly size string.
///
/// Accepts a plain integer (bytes) or an integer suffixed with `K`, `M`, or `G`
/// (case-insensitive), using base-1024 (KiB/MiB/GiB) semantics.
///
/// # Examples
///
/// ```
/// use dispatcher_core::ByteValue;
/// assert_eq!("10M".parse::<ByteValue>().unwrap().as_u64(), 10 * 1024 * 1024);
/// assert_eq!("512".parse::<ByteValue>().unwrap().as_u64(), 512);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteValue(u64);

impl ByteValue {
    /// Constructs a `ByteValue` directly from a byte count.
    #[must_use]
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Returns the value in bytes.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the value as a `usize`, saturating at `usize::MAX` on 32-bit targets.
    #[must_use]
    pub fn as_usize(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

/// Error returned when a byte-size string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid byte size {0:?}: expected an integer optionally suffixed with K, M, or G")]
pub struct ParseByteValueError(String);

impl FromStr for ByteValue {
    type Err = ParseByteValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || ParseByteValueError(s.to_string());

        if trimmed.is_empty() {
            return Err(invalid());
        }

        let (digits, multiplier) = match trimmed.as_bytes()[trimmed.len() - 1] {
            b'K' | b'k' => (&trimmed[..trimmed.len() - 1], 1024u64),
            b'M' | b'm' => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
            b'G' | b'g' => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024),
            _ => (trimmed, 1),
        };

        let value: u64 = digits.trim().parse().map_err(|_| invalid())?;
        value.checked_mul(multiplier).map(ByteValue).ok_or_else(invalid)
    }
}

impl fmt::Display for ByteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ByteValue {
    fn from(bytes: u64) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_integer() {
        assert_eq!("4096".parse::<ByteValue>().unwrap().as_u64(), 4096);
    }

    #[test]
    fn parses_kilobytes() {
        assert_eq!("4K".parse::<ByteValue>().unwrap().as_u64(), 4096);
        assert_eq!("4k".parse::<ByteValue>().unwrap().as_u64(), 4096);
    }

    #[test]
    fn parses_megabytes_and_gigabytes() {
        assert_eq!("10M".parse::<ByteValue>().unwrap().as_u64(), 10 * 1024 * 1024);
        assert_eq!("2G".parse::<ByteValue>().unwrap().as_u64(), 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<ByteValue>().is_err());
        assert!("10X".parse::<ByteValue>().is_err());
        assert!("M".parse::<ByteValue>().is_err());
    }

    #[test]
    fn align_up_rounds_to_next_multiple() {
        assert_eq!(align_up(0, FRAME_ALIGNMENT), 0);
        assert_eq!(align_up(1, FRAME_ALIGNMENT), 8);
        assert_eq!(align_up(8, FRAME_ALIGNMENT), 8);
        assert_eq!(align_up(9, FRAME_ALIGNMENT), 16);
    }

    #[test]
    fn pow2_at_least_respects_floor() {
        assert_eq!(pow2_at_least(10, 1024), 1024);
        assert_eq!(pow2_at_least(5000, 1024), 8192);
    }
}
