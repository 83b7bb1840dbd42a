//! Frame header layout and raw atomic access into the log buffer's byte region.
//!
//! A frame is laid out as:
//!
//! ```text
//! offset  0: length     i32  (atomic; negative = claimed, positive = committed)
//! offset  4: frame_type i16
//! offset  6: flags      i8
//! offset  7: _reserved  i8
//! offset  8: stream_id  i32
//! offset 12: _reserved  [u8; 4]
//! offset 16: payload...
//! ```
//!
//! All reads/writes of `length` use explicit acquire/release atomics directly on the
//! raw byte region; there is no intermediate heap object in the data path.

use crate::byte_value::HEADER_LENGTH;
use std::sync::atomic::{AtomicI32, Ordering};

/// Ordinary user fragment.
pub const FRAME_TYPE_DATA: i16 = 0;
/// Synthetic frame filling the remainder of a partition during rotation.
pub const FRAME_TYPE_PADDING: i16 = 1;

/// Set on a frame whose producer aborted the claim, or whose consumer reported failure.
pub const FLAG_FAILED: i8 = 0b0000_0001;

/// Sentinel meaning "nothing has been written here yet".
pub const LENGTH_UNREAD: i32 = 0;

#[inline]
unsafe fn length_atomic(base: *mut u8, offset: usize) -> &'static AtomicI32 {
    // SAFETY: callers guarantee `offset` is within the partition's data region and
    // 8-byte (hence 4-byte) aligned, which is an invariant of every claim.
    unsafe { &*(base.add(offset).cast::<AtomicI32>()) }
}

/// Reads the `length` field at `offset` with acquire ordering.
///
/// # Safety
///
/// `base` must point at a byte region at least `offset + HEADER_LENGTH` bytes long,
/// and `offset` must be `FRAME_ALIGNMENT`-aligned.
#[inline]
pub unsafe fn load_length(base: *mut u8, offset: usize) -> i32 {
    unsafe { length_atomic(base, offset).load(Ordering::Acquire) }
}

/// Writes the `length` field at `offset` with release ordering.
///
/// # Safety
///
/// Same preconditions as [`load_length`].
#[inline]
pub unsafe fn store_length(base: *mut u8, offset: usize, length: i32) {
    unsafe { length_atomic(base, offset).store(length, Ordering::Release) };
}

/// Writes the full header for a freshly claimed (uncommitted) frame.
///
/// `frame_len` is the aligned, total on-wire size (header + payload + pad); it is
/// stored negated to mark the frame as claimed-but-not-committed.
///
/// # Safety
///
/// `base` must point at a region at least `offset + HEADER_LENGTH` bytes long.
#[inline]
pub unsafe fn write_claimed_header(
    base: *mut u8,
    offset: usize,
    frame_len: i32,
    frame_type: i16,
    stream_id: i32,
) {
    unsafe {
        let type_ptr = base.add(offset + 4).cast::<i16>();
        type_ptr.write_unaligned(frame_type);
        let flags_ptr = base.add(offset + 6);
        flags_ptr.write(0);
        let stream_ptr = base.add(offset + 8).cast::<i32>();
        stream_ptr.write_unaligned(stream_id);
        // length is written last, with Release ordering, so a subscriber that
        // observes a positive length (after commit) also observes type/stream_id.
        length_atomic(base, offset).store(-frame_len, Ordering::Relaxed);
    }
}

/// Flips a claimed frame's length from negative (claimed) to positive (committed),
/// with release ordering so the payload write happens-before the commit is observed.
///
/// # Safety
///
/// Same preconditions as [`load_length`]; `frame_len` must match the magnitude
/// originally passed to [`write_claimed_header`].
#[inline]
pub unsafe fn commit_header(base: *mut u8, offset: usize, frame_len: i32) {
    unsafe { length_atomic(base, offset).store(frame_len, Ordering::Release) };
}

/// Sets the `FAILED` flag on a frame's header. Must be called before [`commit_header`]
/// for an aborted claim, or on an already-committed frame when a consumer reports failure.
///
/// # Safety
///
/// `base` must point at a region at least `offset + HEADER_LENGTH` bytes long.
#[inline]
pub unsafe fn set_failed_flag(base: *mut u8, offset: usize) {
    unsafe {
        let flags_ptr = base.add(offset + 6);
        let current = flags_ptr.read();
        flags_ptr.write(current | FLAG_FAILED);
    }
}

/// Reads back the decoded header fields at `offset`: `(frame_type, flags, stream_id)`.
///
/// # Safety
///
/// `base` must point at a region at least `offset + HEADER_LENGTH` bytes long.
#[inline]
pub unsafe fn read_header_fields(base: *mut u8, offset: usize) -> (i16, i8, i32) {
    unsafe {
        let frame_type = base.add(offset + 4).cast::<i16>().read_unaligned();
        let flags = base.add(offset + 6).read() as i8;
        let stream_id = base.add(offset + 8).cast::<i32>().read_unaligned();
        (frame_type, flags, stream_id)
    }
}

/// Writes a padding frame spanning `[offset, offset + pad_len)` and commits it
/// immediately (padding is always visible to consumers as soon as it is written).
///
/// # Safety
///
/// `base` must point at a region at least `offset + pad_len` bytes long, and
/// `pad_len >= HEADER_LENGTH`.
#[inline]
pub unsafe fn write_padding_frame(base: *mut u8, offset: usize, pad_len: usize) {
    debug_assert!(pad_len >= HEADER_LENGTH);
    unsafe {
        write_claimed_header(base, offset, pad_len as i32, FRAME_TYPE_PADDING, 0);
        commit_header(base, offset, pad_len as i32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aligned_buf(len: usize) -> Vec<u8> {
        vec![0u8; len]
    }

    #[test]
    fn claim_then_commit_flips_sign() {
        let mut buf = aligned_buf(64);
        let base = buf.as_mut_ptr();
        unsafe {
            write_claimed_header(base, 0, 32, FRAME_TYPE_DATA, 7);
            assert_eq!(load_length(base, 0), -32);
            commit_header(base, 0, 32);
            assert_eq!(load_length(base, 0), 32);
            let (frame_type, flags, stream_id) = read_header_fields(base, 0);
            assert_eq!(frame_type, FRAME_TYPE_DATA);
            assert_eq!(flags, 0);
            assert_eq!(stream_id, 7);
        }
    }

    #[test]
    fn failed_flag_survives_commit() {
        let mut buf = aligned_buf(64);
        let base = buf.as_mut_ptr();
        unsafe {
            write_claimed_header(base, 0, 16, FRAME_TYPE_DATA, 1);
            set_failed_flag(base, 0);
            commit_header(base, 0, 16);
            let (_, flags, _) = read_header_fields(base, 0);
            assert_eq!(flags & FLAG_FAILED, FLAG_FAILED);
        }
    }

    #[test]
    fn padding_frame_is_immediately_visible() {
        let mut buf = aligned_buf(64);
        let base = buf.as_mut_ptr();
        unsafe {
            write_padding_frame(base, 0, 48);
            assert_eq!(load_length(base, 0), 48);
            let (frame_type, ..) = read_header_fields(base, 0);
            assert_eq!(frame_type, FRAME_TYPE_PADDING);
        }
    }
}
