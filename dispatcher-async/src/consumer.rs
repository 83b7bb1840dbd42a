//! Async consumer implementing `futures::Stream` over a [`Subscription`].

use crate::config::StreamConfig;
#[cfg(debug_assertions)]
use crate::invariants::{debug_assert_backpressure_signaled, debug_assert_shutdown_drained};
use crate::shutdown::{ShutdownHandle, ShutdownSignal, ShutdownState};
use dispatcher_core::{PollAction, Subscription};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{oneshot, Notify};
use tokio::time::{interval, Interval};

use futures_core::{Future, Stream};
use pin_project_lite::pin_project;

/// An owned, detached copy of one fragment yielded by a [`SubscriptionStream`].
///
/// Owned rather than borrowed because the underlying partition can be rotated
/// and reclaimed by the producer once this subscription has advanced past it;
/// a `Stream::Item` can't safely hold a reference into the ring.
#[derive(Debug, Clone)]
pub struct OwnedFragment {
    pub payload: Vec<u8>,
    pub stream_id: i32,
    pub is_failed: bool,
}

pin_project! {
    /// Async stream wrapping a `dispatcher-core` [`Subscription`].
    ///
    /// Uses the same hybrid event-driven + polling strategy as a plain `poll`
    /// loop would, but wired through a `tokio::sync::Notify` so a consumer task
    /// sleeps between commits instead of busy-spinning.
    ///
    /// # Backpressure
    ///
    /// After draining fragments, the stream calls `notify_waiters()` on the
    /// shared backpressure notify so any producer blocked in
    /// [`crate::producer::DispatcherSink`] wakes up and retries its claim.
    ///
    /// # Shutdown
    ///
    /// Call `shutdown()` for graceful termination: remaining committed
    /// fragments are drained before the stream ends.
    pub struct SubscriptionStream {
        subscription: Subscription,
        data_notify: Arc<Notify>,
        backpressure_notify: Arc<Notify>,
        shutdown_state: Arc<ShutdownState>,
        shutdown_rx: Option<oneshot::Receiver<()>>,
        shutdown_handle: Option<ShutdownHandle>,
        config: StreamConfig,
        #[pin]
        poll_timer: Interval,
        buffer: VecDeque<OwnedFragment>,
        data_pending: bool,
        drain_complete: bool,
    }
}

impl SubscriptionStream {
    pub(crate) fn new(
        subscription: Subscription,
        data_notify: Arc<Notify>,
        backpressure_notify: Arc<Notify>,
        shutdown_state: Arc<ShutdownState>,
        config: StreamConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let shutdown_handle = ShutdownHandle {
            shutdown_tx: Some(shutdown_tx),
            state: Arc::clone(&shutdown_state),
            backpressure_notify: Arc::clone(&backpressure_notify),
        };

        Self {
            subscription,
            data_notify,
            backpressure_notify,
            shutdown_state,
            shutdown_rx: Some(shutdown_rx),
            shutdown_handle: Some(shutdown_handle),
            poll_timer: interval(config.poll_interval),
            buffer: VecDeque::with_capacity(config.max_frames_per_poll),
            config,
            data_pending: false,
            drain_complete: false,
        }
    }

    /// The subscription's configured name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.subscription.name()
    }

    /// Initiates graceful shutdown: keep polling this stream until it returns
    /// `None` to observe the final drain.
    pub fn shutdown(&mut self) {
        if let Some(handle) = &mut self.shutdown_handle {
            handle.trigger();
        }
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_state.is_shutdown_initiated()
    }

    /// A cloneable handle that can trigger shutdown from another task.
    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal::new(Arc::clone(&self.shutdown_state), Arc::clone(&self.backpressure_notify))
    }

    #[must_use]
    pub fn buffered_count(&self) -> usize {
        self.buffer.len()
    }
}

fn drain_into(subscription: &Subscription, buffer: &mut VecDeque<OwnedFragment>, max_frames: usize) -> usize {
    let mut drained = 0usize;
    subscription.poll(
        &mut |fragment: &[u8], offset: usize, length: usize, stream_id: i32, is_failed: bool| {
            buffer.push_back(OwnedFragment {
                payload: fragment[offset..offset + length].to_vec(),
                stream_id,
                is_failed,
            });
            drained += 1;
            PollAction::Consume
        },
        max_frames,
    );
    drained
}

impl Stream for SubscriptionStream {
    type Item = OwnedFragment;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if let Some(fragment) = this.buffer.pop_front() {
            return Poll::Ready(Some(fragment));
        }

        if *this.drain_complete {
            return Poll::Ready(None);
        }

        if let Some(rx) = this.shutdown_rx {
            if Pin::new(rx).poll(cx).is_ready() {
                *this.shutdown_rx = None;

                let drained = drain_into(this.subscription, this.buffer, usize::MAX);
                this.backpressure_notify.notify_waiters();
                *this.drain_complete = true;

                #[cfg(debug_assertions)]
                debug_assert_backpressure_signaled!(drained, true);
                #[cfg(debug_assertions)]
                debug_assert_shutdown_drained!(true, *this.drain_complete);

                if let Some(fragment) = this.buffer.pop_front() {
                    return Poll::Ready(Some(fragment));
                }
                return Poll::Ready(None);
            }
        }

        if *this.data_pending {
            *this.data_pending = false;
            let drained = drain_into(this.subscription, this.buffer, this.config.max_frames_per_poll);
            if drained > 0 {
                this.backpressure_notify.notify_waiters();
            }
            #[cfg(debug_assertions)]
            debug_assert_backpressure_signaled!(drained, drained == 0 || true);
        }

        if let Some(fragment) = this.buffer.pop_front() {
            return Poll::Ready(Some(fragment));
        }

        let notified = this.data_notify.notified();
        tokio::pin!(notified);
        if notified.as_mut().poll(cx).is_ready() {
            *this.data_pending = true;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }

        if this.poll_timer.as_mut().poll_tick(cx).is_ready() {
            let drained = drain_into(this.subscription, this.buffer, this.config.max_frames_per_poll);
            if drained > 0 {
                this.backpressure_notify.notify_waiters();
                if let Some(fragment) = this.buffer.pop_front() {
                    return Poll::Ready(Some(fragment));
                }
            }
        }

        if this.shutdown_state.is_closed() {
            let drained = drain_into(this.subscription, this.buffer, usize::MAX);
            if drained > 0 {
                this.backpressure_notify.notify_waiters();
                if let Some(fragment) = this.buffer.pop_front() {
                    return Poll::Ready(Some(fragment));
                }
            }
            return Poll::Ready(None);
        }

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatcher_core::{Dispatcher, DispatcherBuilder};
    use futures_util::StreamExt;

    fn dispatcher_with_stream(name: &str) -> (Dispatcher, SubscriptionStream) {
        let dispatcher = DispatcherBuilder::new().buffer_size_bytes(1 << 16).subscriptions(&[name]).build().unwrap();
        let subscription = dispatcher.open_subscription(name).unwrap();
        let stream = SubscriptionStream::new(
            subscription,
            Arc::new(Notify::new()),
            Arc::new(Notify::new()),
            Arc::new(ShutdownState::new()),
            StreamConfig::default(),
        );
        (dispatcher, stream)
    }

    #[tokio::test]
    async fn yields_already_committed_fragments_without_waiting() {
        let (dispatcher, mut stream) = dispatcher_with_stream("a");
        assert!(dispatcher.offer(b"hello") > 0);

        let fragment = stream.next().await.unwrap();
        assert_eq!(fragment.payload, b"hello");
    }

    #[tokio::test]
    async fn shutdown_drains_remaining_fragments_then_ends() {
        let (dispatcher, mut stream) = dispatcher_with_stream("a");
        assert!(dispatcher.offer(b"one") > 0);
        assert!(dispatcher.offer(b"two") > 0);

        stream.shutdown();
        let mut seen = Vec::new();
        while let Some(fragment) = stream.next().await {
            seen.push(fragment.payload);
        }
        assert_eq!(seen, vec![b"one".to_vec(), b"two".to_vec()]);
    }
}
