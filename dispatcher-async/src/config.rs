//! Configuration for the async consumption loop.

use std::time::Duration;

/// Tuning knobs for [`crate::consumer::SubscriptionStream`]'s hybrid polling.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Safety-net poll interval: even with event-driven wake-ups via `Notify`,
    /// this catches any missed notification and coalesces small bursts.
    ///
    /// Default: 10ms.
    pub poll_interval: Duration,

    /// Upper bound on fragments drained from the underlying `Subscription` per
    /// wake-up, mirroring `Subscription::poll`'s `max_frames`.
    ///
    /// Default: 64.
    pub max_frames_per_poll: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            max_frames_per_poll: 64,
        }
    }
}

impl StreamConfig {
    #[must_use]
    pub fn low_latency() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            max_frames_per_poll: 16,
        }
    }

    #[must_use]
    pub fn high_throughput() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            max_frames_per_poll: 256,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_frames_per_poll(mut self, max_frames: usize) -> Self {
        self.max_frames_per_poll = max_frames;
        self
    }
}
