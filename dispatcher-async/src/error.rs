//! Error types for `dispatcher-async` operations.

use dispatcher_core::{DispatcherError, SubscriptionError};
use thiserror::Error;

/// Errors surfaced by the async dispatcher handle, its sink, and its streams.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The dispatcher is closed; no further offers/claims will succeed.
    #[error("dispatcher is closed")]
    Closed,

    /// A producer-side `claim`/`offer` failed for a reason other than closure
    /// (invalid length, or transient insufficient capacity that callers chose
    /// not to await).
    #[error("claim rejected: {0}")]
    Rejected(#[from] DispatcherError),

    /// Opening a subscription stream failed.
    #[error("failed to open subscription: {0}")]
    OpenFailed(#[from] SubscriptionError),

    /// The stream has been shut down via [`crate::shutdown::ShutdownSignal`].
    #[error("stream has been shut down")]
    ShutDown,
}

impl StreamError {
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Rejected(DispatcherError::InsufficientCapacity))
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::ShutDown | Self::Rejected(DispatcherError::Closed))
    }
}
