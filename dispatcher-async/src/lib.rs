//! `tokio`-driven async adapters over `dispatcher-core`.
//!
//! [`AsyncDispatcher`] wires a synchronous `Dispatcher` up with a pair of
//! `tokio::sync::Notify` handles and hands out:
//!
//! - [`DispatcherSink`], a `futures::Sink` producer that awaits backpressure
//!   relief instead of spinning when the ring is full.
//! - [`SubscriptionStream`], a `futures::Stream` consumer with hybrid
//!   event-driven + poll-interval draining, mirroring the synchronous
//!   `Subscription::poll` loop one layer up.
//!
//! # Example
//!
//! ```ignore
//! use dispatcher_async::AsyncDispatcher;
//! use dispatcher_core::DispatcherBuilder;
//! use tokio_stream::StreamExt;
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = AsyncDispatcher::build(
//!         DispatcherBuilder::new().buffer_size_bytes(1 << 20).subscriptions(&["reader"]),
//!     )
//!     .unwrap();
//!
//!     let sink = handle.sink();
//!     let mut stream = handle.open_subscription_stream("reader").unwrap();
//!
//!     sink.offer(b"hello", 0).await.unwrap();
//!     while let Some(fragment) = stream.next().await {
//!         println!("{:?}", fragment.payload);
//!     }
//! }
//! ```

mod config;
mod consumer;
mod error;
mod handle;
mod invariants;
mod producer;
mod shutdown;

pub use config::StreamConfig;
pub use consumer::{OwnedFragment, SubscriptionStream};
pub use error::StreamError;
pub use handle::AsyncDispatcher;
pub use producer::DispatcherSink;
pub use shutdown::ShutdownSignal;

pub use tokio_stream::StreamExt;
