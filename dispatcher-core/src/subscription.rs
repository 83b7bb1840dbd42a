//! Subscriber-side consumption (component C5): `poll` and `peek_block` modes.

use crate::appender::LogAppender;
use crate::byte_value::HEADER_LENGTH;
use crate::frame;
use crate::invariants::debug_assert_position_monotonic;
use crate::partition::PartitionStatus;
use crate::position::{AtomicPosition, Position, PositionCodec};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// What a [`FragmentHandler`] wants done with the fragment it was just handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollAction {
    /// Advance past the fragment; it was handled successfully.
    Consume,
    /// Leave the fragment unconsumed and stop this `poll` call. The same fragment
    /// will be offered again on the next call.
    Postpone,
    /// Advance past the fragment, but record it as failed (sets the `FAILED` flag
    /// on the committed frame so downstream consumers, e.g. in pipeline mode, can
    /// see it was not processed cleanly).
    Failed,
}

/// Callback invoked once per fragment during [`Subscription::poll`].
///
/// `buffer` is the full partition the fragment lives in; `offset`/`length` bound
/// the payload within it. `is_failed` reflects the producer's `abort()` or an
/// earlier consumer's `PollAction::Failed`.
pub trait FragmentHandler {
    fn on_fragment(&mut self, buffer: &[u8], offset: usize, length: usize, stream_id: i32, is_failed: bool) -> PollAction;
}

impl<F> FragmentHandler for F
where
    F: FnMut(&[u8], usize, usize, i32, bool) -> PollAction,
{
    fn on_fragment(&mut self, buffer: &[u8], offset: usize, length: usize, stream_id: i32, is_failed: bool) -> PollAction {
        self(buffer, offset, length, stream_id, is_failed)
    }
}

/// The position state shared between a [`Subscription`] and whoever needs to read
/// its progress without owning it: the dispatcher's publisher-limit computation,
/// and (in pipeline mode) the next subscription in the chain.
#[derive(Debug)]
pub(crate) struct SubscriptionShared {
    pub(crate) position: AtomicPosition,
}

/// A single subscriber's cursor into the log.
///
/// Not `Clone`; a subscription is owned by whichever task drives it (typically the
/// `dispatcher-async` consume loop). Cross-thread visibility of its progress is via
/// the cheaply clonable [`SubscriptionShared`] handle the dispatcher holds internally.
pub struct Subscription {
    name: String,
    id: usize,
    appender: Arc<LogAppender>,
    codec: PositionCodec,
    shared: Arc<SubscriptionShared>,
    subscriber_count: Arc<AtomicUsize>,
    /// In pipeline mode, the predecessor this subscription must not read ahead of.
    previous: Option<Arc<SubscriptionShared>>,
}

impl Subscription {
    pub(crate) fn new(
        name: String,
        id: usize,
        appender: Arc<LogAppender>,
        initial_position: Position,
        subscriber_count: Arc<AtomicUsize>,
        previous: Option<Arc<SubscriptionShared>>,
    ) -> Self {
        let codec = appender.log_buffer().position_codec();
        Self {
            name,
            id,
            appender,
            codec,
            shared: Arc::new(SubscriptionShared {
                position: AtomicPosition::new(initial_position),
            }),
            subscriber_count,
            previous,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub fn position(&self) -> Position {
        self.shared.position.load()
    }

    pub(crate) fn shared(&self) -> Arc<SubscriptionShared> {
        Arc::clone(&self.shared)
    }

    /// Drains up to `max_frames` fragments, calling `handler` once per fragment.
    ///
    /// Stops early when the handler returns [`PollAction::Postpone`], when no more
    /// committed data is available, when a pipeline predecessor hasn't consumed far
    /// enough yet, or when the active partition's head is reached (a `poll` call
    /// never spans two partitions). Returns the number of fragments consumed
    /// (padding frames are skipped silently and don't count).
    pub fn poll<H: FragmentHandler>(&self, handler: &mut H, max_frames: usize) -> usize {
        let mut consumed = 0usize;
        while consumed < max_frames {
            let position = self.shared.position.load();
            let generation = self.codec.generation(position);
            let offset = self.codec.offset(position);
            let partition_index = self.codec.partition_index(position);

            // SAFETY: `partition_index` is derived from a codec built for this
            // buffer, so it is always `< PARTITION_COUNT`; `offset` is frame-aligned
            // because every advance lands on a frame boundary.
            let base = unsafe { self.appender.log_buffer().partition_base_ptr(partition_index) };
            let raw_length = unsafe { frame::load_length(base, offset as usize) };

            if raw_length <= 0 {
                // Zero: nothing written yet. Negative: claimed but not committed.
                break;
            }
            let length = raw_length as u32;
            let new_position = self.codec.advance(position, length);

            if let Some(previous) = &self.previous {
                if new_position > previous.position.load() {
                    break;
                }
            }

            // SAFETY: `raw_length > 0` means this header was fully written by a
            // completed `commit`/`write_padding_frame` call.
            let (frame_type, flags, stream_id) = unsafe { frame::read_header_fields(base, offset as usize) };

            if frame_type != frame::FRAME_TYPE_PADDING {
                let is_failed = flags & frame::FLAG_FAILED != 0;
                let payload_offset = offset as usize + HEADER_LENGTH;
                let payload_len = length as usize - HEADER_LENGTH;
                let partition_bytes = self.appender.log_buffer().partition_bytes(partition_index);

                match handler.on_fragment(partition_bytes, payload_offset, payload_len, stream_id, is_failed) {
                    PollAction::Postpone => break,
                    PollAction::Consume => consumed += 1,
                    PollAction::Failed => {
                        // SAFETY: `base`/`offset` point at the header we just read above,
                        // already confirmed committed by the `raw_length > 0` check.
                        unsafe { frame::set_failed_flag(base, offset as usize) };
                        consumed += 1;
                    }
                }
            }

            self.advance_to(new_position, generation, partition_index);

            if self.codec.generation(new_position) != generation {
                break;
            }
        }
        consumed
    }

    /// Looks at up to `max_bytes` of already-committed data ahead of the current
    /// position without consuming it. The returned [`BlockPeek`] never spans more
    /// than one partition.
    #[must_use]
    pub fn peek_block(&self, max_bytes: usize) -> BlockPeek<'_> {
        let position = self.shared.position.load();
        let generation = self.codec.generation(position);
        let partition_index = self.codec.partition_index(position);
        let start_offset = self.codec.offset(position);
        let partition_size = self.appender.log_buffer().partition_size() as u32;

        // SAFETY: see `poll`.
        let base = unsafe { self.appender.log_buffer().partition_base_ptr(partition_index) };

        let mut offset = start_offset;
        let mut bytes_accum: usize = 0;
        while offset < partition_size {
            let raw_length = unsafe { frame::load_length(base, offset as usize) };
            if raw_length <= 0 {
                break;
            }
            let length = raw_length as u32;
            if bytes_accum + length as usize > max_bytes {
                break;
            }

            if let Some(previous) = &self.previous {
                let candidate = self.codec.pack(generation, offset + length);
                if candidate > previous.position.load() {
                    break;
                }
            }

            bytes_accum += length as usize;
            offset += length;
        }

        let end_offset = offset;
        let end_position = if end_offset >= partition_size {
            self.codec.pack(generation + 1, 0)
        } else {
            self.codec.pack(generation, end_offset)
        };

        BlockPeek {
            subscription: self,
            partition_index,
            generation,
            start_offset,
            end_offset,
            end_position,
        }
    }

    fn advance_to(&self, new_position: Position, old_generation: i64, old_partition_index: usize) {
        let old_position = self.shared.position.load();
        debug_assert_position_monotonic!(old_position, new_position);
        self.shared.position.store(new_position);

        if self.codec.generation(new_position) != old_generation {
            let partition = self.appender.log_buffer().partition(old_partition_index);
            let subscriber_count = self.subscriber_count.load(Ordering::Acquire);
            if partition.cast_reclaim_vote(subscriber_count) {
                partition.set_status(PartitionStatus::Clean);
            }
        }
    }
}

/// A view of one already-committed fragment inside a [`BlockPeek`] window.
#[derive(Debug, Clone, Copy)]
pub struct FramedView<'a> {
    pub payload: &'a [u8],
    pub stream_id: i32,
    pub is_failed: bool,
}

/// A read-only window over already-committed, not-yet-consumed data, returned by
/// [`Subscription::peek_block`].
///
/// Looking at a `BlockPeek` never advances the subscription's position; only
/// [`BlockPeek::mark_completed`] or [`BlockPeek::mark_failed`] does, so peeking
/// repeatedly without marking returns the same window every time.
pub struct BlockPeek<'a> {
    subscription: &'a Subscription,
    partition_index: usize,
    generation: i64,
    start_offset: u32,
    end_offset: u32,
    end_position: Position,
}

impl<'a> BlockPeek<'a> {
    /// Bytes of committed frame data (including headers) covered by this window.
    #[must_use]
    pub fn len(&self) -> usize {
        (self.end_offset - self.start_offset) as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates the fragments inside this window, in order. Padding frames are
    /// skipped, matching `poll`'s behaviour.
    #[must_use]
    pub fn iter(&self) -> BlockPeekIter<'a> {
        BlockPeekIter {
            buffer: self.subscription.appender.log_buffer().partition_bytes(self.partition_index),
            offset: self.start_offset,
            end_offset: self.end_offset,
        }
    }

    /// Advances the subscription past this window without touching frame flags.
    pub fn mark_completed(self) {
        self.subscription.advance_to(self.end_position, self.generation, self.partition_index);
    }

    /// Sets the `FAILED` flag on every frame in this window, then advances the
    /// subscription past it. Used when a batch-oriented consumer can't process
    /// part of a block and wants every frame in it marked, not just one.
    pub fn mark_failed(self) {
        // SAFETY: every frame in `[start_offset, end_offset)` was confirmed
        // committed while building this window in `peek_block`.
        unsafe {
            let base = self.subscription.appender.log_buffer().partition_base_ptr(self.partition_index);
            let mut offset = self.start_offset;
            while offset < self.end_offset {
                let length = frame::load_length(base, offset as usize) as u32;
                frame::set_failed_flag(base, offset as usize);
                offset += length;
            }
        }
        self.subscription.advance_to(self.end_position, self.generation, self.partition_index);
    }
}

/// Iterator over the fragments inside a [`BlockPeek`].
pub struct BlockPeekIter<'a> {
    buffer: &'a [u8],
    offset: u32,
    end_offset: u32,
}

impl<'a> Iterator for BlockPeekIter<'a> {
    type Item = FramedView<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.offset < self.end_offset {
            let base = self.buffer.as_ptr().cast_mut();
            // SAFETY: `offset` is within `[0, end_offset)`, and `end_offset` was only
            // extended over frames already confirmed committed in `peek_block`.
            let (length, frame_type, flags, stream_id) = unsafe {
                let length = frame::load_length(base, self.offset as usize) as u32;
                let (frame_type, flags, stream_id) = frame::read_header_fields(base, self.offset as usize);
                (length, frame_type, flags, stream_id)
            };
            let frame_offset = self.offset as usize;
            self.offset += length;

            if frame_type == frame::FRAME_TYPE_PADDING {
                continue;
            }

            let payload_offset = frame_offset + HEADER_LENGTH;
            let payload_len = length as usize - HEADER_LENGTH;
            return Some(FramedView {
                payload: &self.buffer[payload_offset..payload_offset + payload_len],
                stream_id,
                is_failed: flags & frame::FLAG_FAILED != 0,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_buffer::LogBuffer;

    fn new_subscription(partition_size: usize, frame_max_length: usize) -> (Arc<LogAppender>, Subscription) {
        let appender = Arc::new(LogAppender::new(LogBuffer::new(partition_size), frame_max_length));
        let subscriber_count = Arc::new(AtomicUsize::new(1));
        let sub = Subscription::new("s".into(), 0, Arc::clone(&appender), Position::ZERO, subscriber_count, None);
        (appender, sub)
    }

    fn far_future_limit(appender: &LogAppender) -> Position {
        appender.log_buffer().position_codec().pack(1_000_000, 0)
    }

    struct CollectHandler {
        seen: Vec<Vec<u8>>,
    }

    impl FragmentHandler for CollectHandler {
        fn on_fragment(&mut self, buffer: &[u8], offset: usize, length: usize, _stream_id: i32, _is_failed: bool) -> PollAction {
            self.seen.push(buffer[offset..offset + length].to_vec());
            PollAction::Consume
        }
    }

    #[test]
    fn poll_consumes_committed_fragments_in_order() {
        let (appender, sub) = new_subscription(1024, 512);
        let limit = far_future_limit(&appender);

        for byte in [1u8, 2, 3] {
            let mut claim = appender.claim(4, 0, limit).unwrap();
            claim.payload_mut().copy_from_slice(&[byte; 4]);
            claim.commit();
        }

        let mut handler = CollectHandler { seen: Vec::new() };
        let consumed = sub.poll(&mut handler, 10);
        assert_eq!(consumed, 3);
        assert_eq!(handler.seen, vec![vec![1; 4], vec![2; 4], vec![3; 4]]);
    }

    #[test]
    fn poll_stops_at_uncommitted_claim() {
        let (appender, sub) = new_subscription(1024, 512);
        let limit = far_future_limit(&appender);

        let committed = appender.claim(4, 0, limit).unwrap();
        committed.commit();
        let _still_claimed = appender.claim(4, 0, limit).unwrap();

        let mut handler = CollectHandler { seen: Vec::new() };
        assert_eq!(sub.poll(&mut handler, 10), 1);
    }

    #[test]
    fn poll_respects_max_frames() {
        let (appender, sub) = new_subscription(1024, 512);
        let limit = far_future_limit(&appender);
        for _ in 0..5 {
            appender.claim(4, 0, limit).unwrap().commit();
        }

        let mut handler = CollectHandler { seen: Vec::new() };
        assert_eq!(sub.poll(&mut handler, 2), 2);
        assert_eq!(sub.poll(&mut handler, 2), 2);
        assert_eq!(sub.poll(&mut handler, 2), 1);
    }

    #[test]
    fn postpone_leaves_position_unchanged() {
        let (appender, sub) = new_subscription(1024, 512);
        let limit = far_future_limit(&appender);
        appender.claim(4, 0, limit).unwrap().commit();

        let position_before = sub.position();
        let mut handler = |_: &[u8], _: usize, _: usize, _: i32, _: bool| PollAction::Postpone;
        assert_eq!(sub.poll(&mut handler, 10), 0);
        assert_eq!(sub.position(), position_before);
    }

    #[test]
    fn peek_without_marking_is_idempotent() {
        let (appender, sub) = new_subscription(1024, 512);
        let limit = far_future_limit(&appender);
        appender.claim(4, 0, limit).unwrap().commit();
        appender.claim(4, 0, limit).unwrap().commit();

        let first = sub.peek_block(1024);
        let first_len = first.len();
        drop(first);
        let second = sub.peek_block(1024);
        assert_eq!(second.len(), first_len);
        assert_eq!(second.iter().count(), 2);
    }

    #[test]
    fn peek_mark_completed_advances_position() {
        let (appender, sub) = new_subscription(1024, 512);
        let limit = far_future_limit(&appender);
        appender.claim(4, 0, limit).unwrap().commit();
        appender.claim(4, 0, limit).unwrap().commit();

        let before = sub.position();
        let block = sub.peek_block(1024);
        block.mark_completed();
        assert!(sub.position() > before);

        let mut handler = CollectHandler { seen: Vec::new() };
        assert_eq!(sub.poll(&mut handler, 10), 0);
    }

    struct FlagHandler<'a>(&'a mut Vec<bool>);
    impl FragmentHandler for FlagHandler<'_> {
        fn on_fragment(&mut self, _: &[u8], _: usize, _: usize, _: i32, is_failed: bool) -> PollAction {
            self.0.push(is_failed);
            PollAction::Consume
        }
    }

    #[test]
    fn peek_mark_failed_sets_flag_on_every_frame_in_window() {
        let (appender, sub) = new_subscription(1024, 512);
        let limit = far_future_limit(&appender);
        appender.claim(4, 0, limit).unwrap().commit();
        appender.claim(4, 0, limit).unwrap().commit();

        sub.peek_block(1024).mark_failed();

        // `sub` already consumed the window; re-read it from a fresh cursor over
        // the same partition to check the flags stuck.
        let verifier = Subscription::new("v".into(), 1, Arc::clone(&appender), Position::ZERO, Arc::new(AtomicUsize::new(1)), None);
        let mut flags = Vec::new();
        verifier.poll(&mut FlagHandler(&mut flags), 10);
        assert_eq!(flags, vec![true, true]);
    }

    #[test]
    fn partition_crossing_casts_reclaim_vote_and_stops_poll() {
        let (appender, sub) = new_subscription(64, 48);
        let limit = far_future_limit(&appender);

        // 8-byte payload -> 24-byte frame, leaves 40 bytes; a second 8-byte payload
        // also fits (24 bytes), leaving 16 bytes: too small for another 24-byte
        // frame, so the next claim pads and rotates.
        appender.claim(8, 0, limit).unwrap().commit();
        appender.claim(8, 0, limit).unwrap().commit();
        appender.claim(8, 0, limit).unwrap().commit();

        let mut handler = CollectHandler { seen: Vec::new() };
        let consumed = sub.poll(&mut handler, 10);
        assert_eq!(consumed, 2);
        assert_eq!(appender.log_buffer().partition(0).status(), PartitionStatus::Clean);
    }
}
