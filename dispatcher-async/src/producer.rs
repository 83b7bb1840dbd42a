//! Async producer implementing `futures::Sink` over a [`Dispatcher`].

use crate::error::StreamError;
#[cfg(debug_assertions)]
use crate::invariants::debug_assert_data_notified;
use crate::shutdown::ShutdownState;
use dispatcher_core::{Dispatcher, DispatcherError};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::Notify;

use futures_core::Future;
use futures_sink::Sink;
use pin_project_lite::pin_project;

pin_project! {
    /// Async sink wrapping a `dispatcher-core` [`Dispatcher`].
    ///
    /// Every item is `(payload, stream_id)`; when the ring is full, `poll_ready`
    /// returns `Pending` until a consumer's drain signals relief via the shared
    /// backpressure notify.
    pub struct DispatcherSink {
        dispatcher: Arc<Dispatcher>,
        data_notify: Arc<Notify>,
        backpressure_notify: Arc<Notify>,
        shutdown_state: Arc<ShutdownState>,
        pending_item: Option<(Vec<u8>, i32)>,
    }
}

impl DispatcherSink {
    pub(crate) fn new(
        dispatcher: Arc<Dispatcher>,
        data_notify: Arc<Notify>,
        backpressure_notify: Arc<Notify>,
        shutdown_state: Arc<ShutdownState>,
    ) -> Self {
        Self {
            dispatcher,
            data_notify,
            backpressure_notify,
            shutdown_state,
            pending_item: None,
        }
    }

    /// Offers `payload` without waiting; returns `Err` immediately if the ring
    /// is momentarily full rather than blocking.
    ///
    /// # Errors
    ///
    /// See [`StreamError`].
    pub fn try_offer(&self, payload: &[u8], stream_id: i32) -> Result<i64, StreamError> {
        if self.shutdown_state.is_closed() || self.dispatcher.is_closed() {
            return Err(StreamError::Closed);
        }
        let position = self.dispatcher.offer_with_stream(payload, stream_id);
        if position >= 0 {
            self.data_notify.notify_one();
            #[cfg(debug_assertions)]
            debug_assert_data_notified!(true, true);
            Ok(position)
        } else {
            Err(StreamError::Rejected(code_to_error(position)))
        }
    }

    /// Offers `payload`, awaiting backpressure relief if the ring is full.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Closed`] if the dispatcher closes while waiting.
    pub async fn offer(&self, payload: &[u8], stream_id: i32) -> Result<i64, StreamError> {
        loop {
            if self.shutdown_state.is_closed() || self.dispatcher.is_closed() {
                return Err(StreamError::Closed);
            }

            let position = self.dispatcher.offer_with_stream(payload, stream_id);
            if position >= 0 {
                self.data_notify.notify_one();
                #[cfg(debug_assertions)]
                debug_assert_data_notified!(true, true);
                return Ok(position);
            }
            if code_to_error(position) != DispatcherError::InsufficientCapacity {
                return Err(StreamError::Rejected(code_to_error(position)));
            }

            self.backpressure_notify.notified().await;

            if self.shutdown_state.is_closed() {
                return Err(StreamError::Closed);
            }
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown_state.is_closed() || self.dispatcher.is_closed()
    }
}

fn code_to_error(code: i64) -> DispatcherError {
    match code {
        -2 => DispatcherError::Closed,
        -3 => DispatcherError::InvalidLength { length: -1, max: 0 },
        _ => DispatcherError::InsufficientCapacity,
    }
}

impl Sink<(Vec<u8>, i32)> for DispatcherSink {
    type Error = StreamError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.project();

        if this.shutdown_state.is_closed() || this.dispatcher.is_closed() {
            return Poll::Ready(Err(StreamError::Closed));
        }

        if let Some((payload, stream_id)) = this.pending_item.take() {
            let position = this.dispatcher.offer_with_stream(&payload, stream_id);
            if position >= 0 {
                this.data_notify.notify_one();
                return Poll::Ready(Ok(()));
            }
            *this.pending_item = Some((payload, stream_id));

            let notified = this.backpressure_notify.notified();
            tokio::pin!(notified);
            return match notified.poll(cx) {
                Poll::Ready(()) => {
                    cx.waker().wake_by_ref();
                    Poll::Pending
                }
                Poll::Pending => Poll::Pending,
            };
        }

        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: (Vec<u8>, i32)) -> Result<(), Self::Error> {
        let this = self.project();

        if this.shutdown_state.is_closed() || this.dispatcher.is_closed() {
            return Err(StreamError::Closed);
        }

        let (payload, stream_id) = item;
        let position = this.dispatcher.offer_with_stream(&payload, stream_id);
        if position >= 0 {
            this.data_notify.notify_one();
        } else {
            *this.pending_item = Some((payload, stream_id));
        }
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.project();

        if this.shutdown_state.is_closed() || this.dispatcher.is_closed() {
            return Poll::Ready(Err(StreamError::Closed));
        }

        if let Some((payload, stream_id)) = this.pending_item.take() {
            let position = this.dispatcher.offer_with_stream(&payload, stream_id);
            if position >= 0 {
                this.data_notify.notify_one();
                return Poll::Ready(Ok(()));
            }
            *this.pending_item = Some((payload, stream_id));

            let notified = this.backpressure_notify.notified();
            tokio::pin!(notified);
            return match notified.poll(cx) {
                Poll::Ready(()) => {
                    cx.waker().wake_by_ref();
                    Poll::Pending
                }
                Poll::Pending => Poll::Pending,
            };
        }

        Poll::Ready(Ok(()))
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        match self.as_mut().poll_flush(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(error)) => return Poll::Ready(Err(error)),
            Poll::Ready(Ok(())) => {}
        }
        let this = self.project();
        this.dispatcher.close();
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatcher_core::DispatcherBuilder;
    use futures_util::SinkExt;

    #[tokio::test]
    async fn offer_async_waits_for_backpressure_relief() {
        let dispatcher = Arc::new(DispatcherBuilder::new().buffer_size_bytes(1 << 16).subscriptions(&["r"]).build().unwrap());
        let sub = dispatcher.open_subscription("r").unwrap();
        let sink = DispatcherSink::new(
            Arc::clone(&dispatcher),
            Arc::new(Notify::new()),
            Arc::new(Notify::new()),
            Arc::new(ShutdownState::new()),
        );

        assert!(sink.offer(b"hello", 0).await.unwrap() > 0);

        let mut handler = |buffer: &[u8], offset: usize, length: usize, _: i32, _: bool| {
            assert_eq!(&buffer[offset..offset + length], b"hello");
            dispatcher_core::PollAction::Consume
        };
        assert_eq!(sub.poll(&mut handler, 10), 1);
    }

    #[tokio::test]
    async fn sink_send_round_trips_a_payload() {
        let dispatcher = Arc::new(DispatcherBuilder::new().buffer_size_bytes(1 << 16).subscriptions(&["r"]).build().unwrap());
        let sub = dispatcher.open_subscription("r").unwrap();
        let mut sink = DispatcherSink::new(
            Arc::clone(&dispatcher),
            Arc::new(Notify::new()),
            Arc::new(Notify::new()),
            Arc::new(ShutdownState::new()),
        );

        sink.send((b"payload".to_vec(), 7)).await.unwrap();

        let mut handler = |buffer: &[u8], offset: usize, length: usize, stream_id: i32, _: bool| {
            assert_eq!(&buffer[offset..offset + length], b"payload");
            assert_eq!(stream_id, 7);
            dispatcher_core::PollAction::Consume
        };
        assert_eq!(sub.poll(&mut handler, 10), 1);
    }
}
