//! The top-level dispatcher (component C4): ties the appender to a fixed set of
//! named subscriptions and computes the publisher limit that keeps the slowest
//! one from being overwritten. Construction goes through [`DispatcherBuilder`] (C7).

use crate::appender::LogAppender;
use crate::byte_value::{pow2_at_least, MINIMUM_PARTITION_SIZE};
use crate::error::{BuilderError, DispatcherError, SubscriptionError};
use crate::log_buffer::LogBuffer;
use crate::position::{Position, PARTITION_COUNT};
use crate::subscription::{Subscription, SubscriptionShared};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// How subsequent subscriptions relate to one another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatcherMode {
    /// Every subscription reads independently; a fast subscriber may run far
    /// ahead of a slow one (bounded only by the publisher limit).
    #[default]
    Independent,
    /// Subscriptions form an ordered chain (declaration order): subscription `i`
    /// may never read past subscription `i - 1`'s current position.
    Pipeline,
}

/// Builds a [`Dispatcher`] (component C7).
pub struct DispatcherBuilder {
    buffer_size_bytes: Option<u64>,
    subscription_names: Vec<String>,
    mode: DispatcherMode,
    frame_max_length: Option<usize>,
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self {
            buffer_size_bytes: None,
            subscription_names: Vec::new(),
            mode: DispatcherMode::Independent,
            frame_max_length: None,
        }
    }
}

impl DispatcherBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total ring capacity; internally rounded up to 3 times the next power of
    /// two `>= buffer_size_bytes / 3` (and at least `MINIMUM_PARTITION_SIZE` per
    /// partition).
    #[must_use]
    pub fn buffer_size_bytes(mut self, bytes: u64) -> Self {
        self.buffer_size_bytes = Some(bytes);
        self
    }

    #[must_use]
    pub fn subscriptions(mut self, names: &[&str]) -> Self {
        self.subscription_names = names.iter().map(|s| (*s).to_string()).collect();
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: DispatcherMode) -> Self {
        self.mode = mode;
        self
    }

    /// Largest payload a single `claim`/`offer` may request. Defaults to the
    /// full partition size if left unset.
    #[must_use]
    pub fn frame_max_length(mut self, bytes: usize) -> Self {
        self.frame_max_length = Some(bytes);
        self
    }

    /// # Errors
    ///
    /// Returns a [`BuilderError`] if the buffer size is too small, no
    /// subscriptions were configured, two subscriptions share a name, or
    /// `frame_max_length` can't fit in a single partition.
    pub fn build(self) -> Result<Dispatcher, BuilderError> {
        let requested = self.buffer_size_bytes.unwrap_or(0);
        let minimum = (MINIMUM_PARTITION_SIZE * PARTITION_COUNT) as u64;
        if requested < minimum {
            return Err(BuilderError::BufferTooSmall { requested, minimum });
        }

        if self.subscription_names.is_empty() {
            return Err(BuilderError::NoSubscriptions);
        }
        let mut seen = HashSet::new();
        for name in &self.subscription_names {
            if !seen.insert(name.clone()) {
                return Err(BuilderError::DuplicateSubscriptionName(name.clone()));
            }
        }

        let partition_size = pow2_at_least((requested / PARTITION_COUNT as u64) as usize, MINIMUM_PARTITION_SIZE);
        let frame_max_length = self.frame_max_length.unwrap_or(partition_size);
        if frame_max_length > partition_size {
            return Err(BuilderError::FrameMaxLengthTooLarge { requested: frame_max_length, partition_size });
        }

        let appender = Arc::new(LogAppender::new(LogBuffer::new(partition_size), frame_max_length));

        Ok(Dispatcher {
            appender,
            mode: self.mode,
            buffer_capacity: (partition_size * 2) as i64,
            subscription_names: self.subscription_names.clone(),
            slots: Mutex::new(vec![None; self.subscription_names.len()]),
            open_count: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
        })
    }
}

/// Orchestrates a [`LogAppender`] and a fixed roster of named subscriptions.
pub struct Dispatcher {
    appender: Arc<LogAppender>,
    mode: DispatcherMode,
    buffer_capacity: i64,
    subscription_names: Vec<String>,
    slots: Mutex<Vec<Option<Arc<SubscriptionShared>>>>,
    open_count: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl Dispatcher {
    #[must_use]
    pub fn mode(&self) -> DispatcherMode {
        self.mode
    }

    #[must_use]
    pub fn subscription_names(&self) -> &[String] {
        &self.subscription_names
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Copies `payload` into the ring and publishes it. Returns the resulting
    /// position on success, or a status code (`-1` insufficient capacity, `-2`
    /// closed, `-3` invalid length) on failure.
    pub fn offer(&self, payload: &[u8]) -> i64 {
        self.offer_with_stream(payload, 0)
    }

    pub fn offer_with_stream(&self, payload: &[u8], stream_id: i32) -> i64 {
        if self.closed.load(Ordering::Acquire) {
            return DispatcherError::Closed.code();
        }
        let limit = self.publisher_limit();
        match self.appender.claim(payload.len(), stream_id, limit) {
            Ok(mut claim) => {
                claim.payload_mut().copy_from_slice(payload);
                let position = claim.position();
                claim.commit();
                position.as_i64()
            }
            Err(error) => {
                if error == DispatcherError::InsufficientCapacity {
                    tracing::warn!(stream_id, len = payload.len(), "offer rejected: insufficient capacity");
                }
                error.code()
            }
        }
    }

    /// Reserves `length` bytes for zero-copy writing. The caller must resolve
    /// the returned handle with `commit()` or `abort()`.
    ///
    /// # Errors
    ///
    /// See [`DispatcherError`].
    pub fn claim(&self, length: usize, stream_id: i32) -> Result<crate::appender::ClaimedFragment, DispatcherError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DispatcherError::Closed);
        }
        let limit = self.publisher_limit();
        self.appender.claim(length, stream_id, limit)
    }

    /// Opens a subscription by its configured name.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::NotFound`] if `name` wasn't configured,
    /// [`SubscriptionError::AlreadyOpen`] if it's already open, or
    /// [`SubscriptionError::DispatcherClosed`] if the dispatcher is closed.
    pub fn open_subscription(&self, name: &str) -> Result<Subscription, SubscriptionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SubscriptionError::DispatcherClosed);
        }

        let index = self
            .subscription_names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| SubscriptionError::NotFound(name.to_string()))?;

        let mut slots = self.slots.lock().unwrap();
        if slots[index].is_some() {
            return Err(SubscriptionError::AlreadyOpen(name.to_string()));
        }

        let previous = match self.mode {
            DispatcherMode::Pipeline if index > 0 => slots[index - 1].clone(),
            _ => None,
        };

        let subscription = Subscription::new(
            name.to_string(),
            index,
            Arc::clone(&self.appender),
            self.initial_position(),
            Arc::clone(&self.open_count),
            previous,
        );
        slots[index] = Some(subscription.shared());
        self.open_count.fetch_add(1, Ordering::AcqRel);
        tracing::info!(name, index, "subscription opened");
        Ok(subscription)
    }

    /// Closes a subscription, removing its bound from the publisher-limit
    /// computation. Idempotent: closing an already-closed (or never-opened) slot
    /// is a no-op.
    pub fn close_subscription(&self, name: &str) {
        let Some(index) = self.subscription_names.iter().position(|n| n == name) else {
            return;
        };
        let mut slots = self.slots.lock().unwrap();
        if slots[index].take().is_some() {
            self.open_count.fetch_sub(1, Ordering::AcqRel);
            tracing::info!(name, index, "subscription closed");
        }
    }

    /// Closes the dispatcher: further `offer`/`claim` calls return `-2`.
    /// Already-open subscriptions may keep draining whatever was already
    /// written.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.appender.close();
        tracing::info!("dispatcher closed");
    }

    fn initial_position(&self) -> Position {
        let codec = self.appender.log_buffer().position_codec();
        let generation = self.appender.log_buffer().active_generation();
        match self.mode {
            DispatcherMode::Independent => {
                let partition_index = generation.rem_euclid(PARTITION_COUNT as i64) as usize;
                let tail = self.appender.log_buffer().partition(partition_index).tail();
                codec.pack(generation, tail)
            }
            DispatcherMode::Pipeline => codec.pack(generation, 0),
        }
    }

    fn publisher_limit(&self) -> Position {
        let slots = self.slots.lock().unwrap();
        let floor = slots
            .iter()
            .flatten()
            .map(|shared| shared.position.load())
            .min()
            .unwrap_or(Position::ZERO);
        self.appender.log_buffer().position_codec().add_bytes(floor, self.buffer_capacity)
    }
}
