//! A fixed-capacity, partitioned in-process log for fan-out between one producer
//! thread (or task) and many independent consumers.
//!
//! The ring is split into three equal partitions so that reclaiming a fully-drained
//! partition never has to wait on the producer to catch its own tail back around —
//! there are always at least two other partitions for it to write into. Producers
//! claim a frame, write the payload, and commit; commit is a single release-ordered
//! store that flips the frame header's length field from negative (claimed) to
//! positive (visible). Consumers either `poll` fragment-by-fragment with a callback,
//! or `peek_block` a contiguous window of already-committed bytes without consuming
//! it.
//!
//! This crate is synchronous and single-threaded-producer; see `dispatcher-async`
//! for a `tokio`-driven wrapper with coalesced wake-ups on consumption.

mod appender;
mod byte_value;
mod dispatcher;
mod error;
mod frame;
mod invariants;
mod log_buffer;
mod partition;
mod position;
mod subscription;

pub use appender::ClaimedFragment;
pub use byte_value::{ByteValue, ParseByteValueError};
pub use dispatcher::{Dispatcher, DispatcherBuilder, DispatcherMode};
pub use error::{BuilderError, DispatcherError, SubscriptionError};
pub use partition::PartitionStatus;
pub use position::{Position, PositionCodec};
pub use subscription::{BlockPeek, BlockPeekIter, FragmentHandler, FramedView, PollAction, Subscription};
