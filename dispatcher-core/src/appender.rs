//! The claim/commit protocol and partition rotation (component C3).

use crate::byte_value::{align_up, FRAME_ALIGNMENT, HEADER_LENGTH};
use crate::error::DispatcherError;
use crate::frame;
use crate::invariants::debug_assert_frame_aligned;
use crate::log_buffer::LogBuffer;
use crate::partition::Partition;
use crate::position::{Position, PositionCodec, PARTITION_COUNT};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Bounded number of CAS-retry iterations `claim` will attempt before giving up
/// and reporting `InsufficientCapacity`. Most iterations are either an immediate
/// win or a single competing producer's retry; this cap exists so a pathological
/// storm of concurrent rotators can't spin forever instead of returning a code.
const MAX_CLAIM_ATTEMPTS: u32 = 1024;

/// Owns the [`LogBuffer`] and implements the producer-facing claim/commit protocol.
pub struct LogAppender {
    log: LogBuffer,
    frame_max_length: usize,
    closed: AtomicBool,
}

impl LogAppender {
    pub(crate) fn new(log: LogBuffer, frame_max_length: usize) -> Self {
        Self {
            log,
            frame_max_length,
            closed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn log_buffer(&self) -> &LogBuffer {
        &self.log
    }

    #[inline]
    pub fn frame_max_length(&self) -> usize {
        self.frame_max_length
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Claims `length` bytes of payload, returning a scoped handle the caller must
    /// `commit()` or `abort()`. `publisher_limit` is the dispatcher's current bound
    /// on how far ahead of the slowest subscription the appender may write.
    pub(crate) fn claim(
        self: &Arc<Self>,
        length: usize,
        stream_id: i32,
        publisher_limit: Position,
    ) -> Result<ClaimedFragment, DispatcherError> {
        if self.is_closed() {
            return Err(DispatcherError::Closed);
        }
        if length == 0 || length > self.frame_max_length {
            return Err(DispatcherError::InvalidLength {
                length: length as i64,
                max: self.frame_max_length,
            });
        }

        let frame_len = align_up(HEADER_LENGTH + length, FRAME_ALIGNMENT);
        let partition_size = self.log.partition_size();
        if frame_len > partition_size {
            return Err(DispatcherError::InvalidLength {
                length: length as i64,
                max: self.frame_max_length,
            });
        }

        let codec = self.log.position_codec();
        let mut attempts = 0u32;

        loop {
            if self.is_closed() {
                return Err(DispatcherError::Closed);
            }
            attempts += 1;
            if attempts > MAX_CLAIM_ATTEMPTS {
                return Err(DispatcherError::InsufficientCapacity);
            }

            let generation = self.log.active_generation();
            let partition_index = generation.rem_euclid(PARTITION_COUNT as i64) as usize;
            let partition = self.log.partition(partition_index);
            let tail = partition.tail();

            if (tail as usize) + frame_len <= partition_size {
                debug_assert_frame_aligned!(tail);
                let start_position = codec.pack(generation, tail);
                let end_position = codec.advance(start_position, frame_len as u32);
                if end_position > publisher_limit {
                    return Err(DispatcherError::InsufficientCapacity);
                }

                if partition
                    .compare_exchange_tail(tail, tail + frame_len as u32)
                    .is_ok()
                {
                    // SAFETY: `tail` was reserved exclusively to us by the CAS above;
                    // `frame_len <= partition_size - tail` was just checked.
                    unsafe {
                        let base = self.log.partition_base_ptr(partition_index);
                        frame::write_claimed_header(
                            base,
                            tail as usize,
                            frame_len as i32,
                            frame::FRAME_TYPE_DATA,
                            stream_id,
                        );
                    }
                    return Ok(ClaimedFragment {
                        appender: Arc::clone(self),
                        partition_index,
                        data_offset: tail as usize,
                        frame_len,
                        payload_len: length,
                        start_position,
                        resolved: false,
                    });
                }
                // Lost the tail CAS race; retry from the top.
                continue;
            }

            // Doesn't fit: attempt rotation (best-effort; always safe to retry).
            self.try_rotate(generation, partition_index, partition, &codec);
        }
    }

    /// Best-effort partition rotation: pads the current partition if needed and
    /// activates the next one if it is `CLEAN`. Always safe to call redundantly —
    /// if another producer already rotated past this generation, every step here
    /// becomes a harmless no-op and the caller's next loop iteration observes the
    /// fresh state.
    fn try_rotate(&self, generation: i64, partition_index: usize, partition: &Partition, _codec: &PositionCodec) {
        let partition_size = self.log.partition_size();
        let tail = partition.tail();

        if (tail as usize) < partition_size {
            let pad_len = partition_size - tail as usize;
            if partition
                .compare_exchange_tail(tail, partition_size as u32)
                .is_ok()
            {
                // SAFETY: we exclusively own `[tail, partition_size)` after the CAS.
                unsafe {
                    let base = self.log.partition_base_ptr(partition_index);
                    frame::write_padding_frame(base, tail as usize, pad_len);
                }
                partition.set_status(crate::partition::PartitionStatus::Dirty);
            }
        }

        let next_index = (partition_index + 1) % PARTITION_COUNT;
        let next_partition = self.log.partition(next_index);
        if next_partition.try_activate() {
            next_partition.reset_for_reuse();
            let _ = self.log.compare_exchange_active_generation(generation, generation + 1);
            tracing::debug!(from = partition_index, to = next_index, generation = generation + 1, "rotated active partition");
        }
    }
}

/// A scoped handle over a claimed-but-not-yet-committed frame.
///
/// Must be resolved with [`ClaimedFragment::commit`] or [`ClaimedFragment::abort`]
/// on every exit path; an abandoned handle (e.g. an early return or panic-unwind)
/// is aborted automatically by `Drop`, matching the scoped-resource discipline the
/// rest of this crate follows.
pub struct ClaimedFragment {
    appender: Arc<LogAppender>,
    partition_index: usize,
    data_offset: usize,
    frame_len: usize,
    payload_len: usize,
    start_position: Position,
    resolved: bool,
}

impl ClaimedFragment {
    /// A mutable view over the claimed payload region (excludes the frame header).
    #[must_use]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        // SAFETY: `[data_offset + HEADER_LENGTH, data_offset + HEADER_LENGTH + payload_len)`
        // was reserved exclusively to this claim by the winning tail CAS, and no
        // other reader observes it until `commit` performs its Release store.
        unsafe {
            let base = self.appender.log_buffer().partition_base_ptr(self.partition_index);
            let start = base.add(self.data_offset + HEADER_LENGTH);
            std::slice::from_raw_parts_mut(start, self.payload_len)
        }
    }

    /// The position this frame will occupy once committed.
    #[must_use]
    pub fn position(&self) -> Position {
        self.appender
            .log_buffer()
            .position_codec()
            .advance(self.start_position, self.frame_len as u32)
    }

    /// The opaque routing key this frame was claimed with.
    #[must_use]
    pub fn stream_id(&self) -> i32 {
        // SAFETY: header was fully written by `claim` before this handle was returned.
        unsafe {
            let base = self.appender.log_buffer().partition_base_ptr(self.partition_index);
            frame::read_header_fields(base, self.data_offset).2
        }
    }

    /// Publishes the frame: flips the header length positive so subscribers can
    /// observe it.
    pub fn commit(mut self) {
        self.commit_internal();
    }

    /// Publishes the frame with the `FAILED` flag set, so subscribers skip (or, in
    /// pipeline mode, re-deliver) it instead of treating it as ordinary data.
    pub fn abort(mut self) {
        // SAFETY: see `commit_internal`.
        unsafe {
            let base = self.appender.log_buffer().partition_base_ptr(self.partition_index);
            frame::set_failed_flag(base, self.data_offset);
        }
        self.commit_internal();
    }

    fn commit_internal(&mut self) {
        if self.resolved {
            return;
        }
        // SAFETY: `data_offset` was exclusively reserved to this claim; `frame_len`
        // matches the magnitude written by `write_claimed_header`.
        unsafe {
            let base = self.appender.log_buffer().partition_base_ptr(self.partition_index);
            frame::commit_header(base, self.data_offset, self.frame_len as i32);
        }
        self.resolved = true;
    }
}

impl Drop for ClaimedFragment {
    fn drop(&mut self) {
        if !self.resolved {
            // An abandoned claim is aborted so consumers don't stall forever behind
            // a frame that will never be committed.
            unsafe {
                let base = self.appender.log_buffer().partition_base_ptr(self.partition_index);
                frame::set_failed_flag(base, self.data_offset);
            }
            self.commit_internal();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::PositionCodec;

    fn new_appender(partition_size: usize, frame_max_length: usize) -> Arc<LogAppender> {
        Arc::new(LogAppender::new(LogBuffer::new(partition_size), frame_max_length))
    }

    fn far_future_limit(appender: &LogAppender) -> Position {
        let codec = appender.log_buffer().position_codec();
        codec.pack(1_000_000, 0)
    }

    #[test]
    fn claim_commit_round_trip() {
        let appender = new_appender(1024, 512);
        let limit = far_future_limit(&appender);
        let mut claim = appender.claim(4, 0, limit).unwrap();
        claim.payload_mut().copy_from_slice(&42u32.to_le_bytes());
        claim.commit();
    }

    #[test]
    fn zero_length_claim_is_rejected() {
        let appender = new_appender(1024, 512);
        let limit = far_future_limit(&appender);
        assert_eq!(appender.claim(0, 0, limit).unwrap_err(), DispatcherError::InvalidLength { length: 0, max: 512 });
    }

    #[test]
    fn over_max_length_claim_is_rejected() {
        let appender = new_appender(1024, 512);
        let limit = far_future_limit(&appender);
        assert!(matches!(appender.claim(600, 0, limit), Err(DispatcherError::InvalidLength { .. })));
    }

    #[test]
    fn claim_after_close_is_rejected() {
        let appender = new_appender(1024, 512);
        appender.close();
        let limit = far_future_limit(&appender);
        assert_eq!(appender.claim(4, 0, limit).unwrap_err(), DispatcherError::Closed);
    }

    #[test]
    fn claim_respects_publisher_limit() {
        let appender = new_appender(1024, 512);
        let codec: PositionCodec = appender.log_buffer().position_codec();
        // A limit of zero means nothing at all may be written.
        let limit = codec.pack(0, 0);
        assert_eq!(appender.claim(4, 0, limit).unwrap_err(), DispatcherError::InsufficientCapacity);
    }

    #[test]
    fn rotation_pads_and_advances_generation() {
        let appender = new_appender(64, 48);
        let limit = far_future_limit(&appender);

        // First claim leaves 40 bytes free in a 64-byte partition (16-byte header
        // + 8-byte payload = 24 bytes).
        let c1 = appender.claim(8, 0, limit).unwrap();
        c1.commit();
        assert_eq!(appender.log_buffer().partition(0).tail(), 24);

        // A 48-byte frame (16-byte header + 32-byte payload) cannot fit in the
        // remaining 40 bytes, forcing rotation into partition 1.
        let c2 = appender.claim(32, 1, limit).unwrap();
        assert_eq!(appender.log_buffer().active_generation(), 1);
        let codec = appender.log_buffer().position_codec();
        assert_eq!(codec.partition_index(c2.position()), 1);
        c2.commit();

        // Partition 0's remainder was padded, not skipped.
        assert_eq!(appender.log_buffer().partition(0).tail(), 64);
    }

    #[test]
    fn dropping_an_uncommitted_claim_marks_it_failed() {
        let appender = new_appender(1024, 512);
        let limit = far_future_limit(&appender);
        {
            let _claim = appender.claim(4, 0, limit).unwrap();
            // dropped without commit/abort
        }
        unsafe {
            let base = appender.log_buffer().partition_base_ptr(0);
            assert!(frame::load_length(base, 0) > 0);
            let (_, flags, _) = frame::read_header_fields(base, 0);
            assert_eq!(flags & frame::FLAG_FAILED, frame::FLAG_FAILED);
        }
    }
}
