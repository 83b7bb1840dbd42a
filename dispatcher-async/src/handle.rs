//! Construction: wires a `dispatcher-core` `Dispatcher` up with the `Notify`
//! pair and shutdown state that the async sink/stream adapters share.

use crate::config::StreamConfig;
use crate::consumer::SubscriptionStream;
use crate::error::StreamError;
use crate::producer::DispatcherSink;
use crate::shutdown::{ShutdownSignal, ShutdownState};
use dispatcher_core::{Dispatcher, DispatcherBuilder};
use std::sync::Arc;
use tokio::sync::Notify;

/// Wraps a built [`Dispatcher`] with the shared `Notify` pair and shutdown
/// state its async adapters need, and hands out [`DispatcherSink`]s and
/// [`SubscriptionStream`]s over it.
///
/// # Example
///
/// ```ignore
/// use dispatcher_async::AsyncDispatcher;
/// use dispatcher_core::DispatcherBuilder;
///
/// let dispatcher = DispatcherBuilder::new()
///     .buffer_size_bytes(1 << 20)
///     .subscriptions(&["reader"])
///     .build()?;
/// let handle = AsyncDispatcher::new(dispatcher);
///
/// let mut sink = handle.sink();
/// let mut stream = handle.open_subscription_stream("reader")?;
/// ```
#[derive(Clone)]
pub struct AsyncDispatcher {
    dispatcher: Arc<Dispatcher>,
    data_notify: Arc<Notify>,
    backpressure_notify: Arc<Notify>,
    shutdown_state: Arc<ShutdownState>,
}

impl AsyncDispatcher {
    #[must_use]
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            data_notify: Arc::new(Notify::new()),
            backpressure_notify: Arc::new(Notify::new()),
            shutdown_state: Arc::new(ShutdownState::new()),
        }
    }

    /// Builds directly from a [`DispatcherBuilder`].
    ///
    /// # Errors
    ///
    /// See [`dispatcher_core::BuilderError`].
    pub fn build(builder: DispatcherBuilder) -> Result<Self, dispatcher_core::BuilderError> {
        Ok(Self::new(builder.build()?))
    }

    /// Opens a named subscription as an async [`SubscriptionStream`].
    ///
    /// # Errors
    ///
    /// [`StreamError::OpenFailed`] if the name is unknown, already open, or the
    /// dispatcher is closed.
    pub fn open_subscription_stream(&self, name: &str) -> Result<SubscriptionStream, StreamError> {
        self.open_subscription_stream_with_config(name, StreamConfig::default())
    }

    pub fn open_subscription_stream_with_config(&self, name: &str, config: StreamConfig) -> Result<SubscriptionStream, StreamError> {
        let subscription = self.dispatcher.open_subscription(name)?;
        Ok(SubscriptionStream::new(
            subscription,
            Arc::clone(&self.data_notify),
            Arc::clone(&self.backpressure_notify),
            Arc::clone(&self.shutdown_state),
            config,
        ))
    }

    /// Closes a named subscription, no longer bounding the publisher limit.
    pub fn close_subscription(&self, name: &str) {
        self.dispatcher.close_subscription(name);
        self.backpressure_notify.notify_waiters();
    }

    /// A [`DispatcherSink`] for producing fragments into the ring.
    #[must_use]
    pub fn sink(&self) -> DispatcherSink {
        DispatcherSink::new(
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.data_notify),
            Arc::clone(&self.backpressure_notify),
            Arc::clone(&self.shutdown_state),
        )
    }

    /// A cloneable signal any task can use to trigger shutdown.
    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal::new(Arc::clone(&self.shutdown_state), Arc::clone(&self.backpressure_notify))
    }

    /// Closes the dispatcher for new offers/claims and wakes anything blocked
    /// on backpressure so it observes the closed state.
    pub fn close(&self) {
        self.shutdown_state.close();
        self.dispatcher.close();
        self.backpressure_notify.notify_waiters();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown_state.is_closed()
    }
}
