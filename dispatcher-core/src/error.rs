//! Error taxonomy (ambient component A1).
//!
//! The external `offer`/`claim` interface returns raw `i64` status codes;
//! internally (and for callers that want typed errors, such as
//! `dispatcher-async`) every failure is one of these variants.

use thiserror::Error;

/// Status code for a producer call that failed transiently or terminally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatcherError {
    /// The slowest subscription hasn't caught up enough to free space (`offer`/`claim`
    /// return `-1`). Transient: the producer should retry.
    #[error("insufficient capacity")]
    InsufficientCapacity,

    /// The dispatcher has been closed (`offer`/`claim` return `-2`). Terminal.
    #[error("dispatcher is closed")]
    Closed,

    /// `claim` was asked for a length of zero, a negative length, or one exceeding
    /// `frame_max_length` (`-3`).
    #[error("invalid claim length {length} (max {max})")]
    InvalidLength { length: i64, max: usize },
}

impl DispatcherError {
    /// The external interface's `i64` return-code convention.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::InsufficientCapacity => -1,
            Self::Closed => -2,
            Self::InvalidLength { .. } => -3,
        }
    }
}

/// Errors raised while registering or closing a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// `open_subscription` was called with a name not present in the dispatcher's
    /// configured `subscription_names`.
    #[error("no subscription named {0:?} was configured")]
    NotFound(String),

    /// The subscription is already open (registration is not re-entrant).
    #[error("subscription {0:?} is already open")]
    AlreadyOpen(String),

    /// The dispatcher has been closed.
    #[error("dispatcher is closed")]
    DispatcherClosed,
}

/// Errors raised by `DispatcherBuilder::build`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuilderError {
    /// The requested buffer size is too small to hold 3 partitions of at least
    /// `MINIMUM_PARTITION_SIZE` bytes each.
    #[error("buffer_size_bytes {requested} is smaller than the minimum {minimum}")]
    BufferTooSmall { requested: u64, minimum: u64 },

    /// Two (or more) configured subscriptions share a name.
    #[error("duplicate subscription name {0:?}")]
    DuplicateSubscriptionName(String),

    /// No subscription names were configured at all.
    #[error("at least one subscription name must be configured")]
    NoSubscriptions,

    /// `frame_max_length` is larger than a single partition can ever hold.
    #[error("frame_max_length {requested} cannot exceed partition_size {partition_size}")]
    FrameMaxLengthTooLarge { requested: usize, partition_size: usize },
}
