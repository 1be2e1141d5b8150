//! Frame delivery statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;

/// Point-in-time view of a [`StreamStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Samples delivered per second since the last report.
    pub fps: f32,
    /// Samples handed to the frame queue by the provider.
    pub received: u64,
    /// Samples taken off the queue by the consumer.
    pub consumed: u64,
    /// Samples discarded because the queue was full.
    pub dropped: u64,
    /// Samples currently waiting in the queue.
    pub queued: u64,
    pub uptime_seconds: u64,
}

/// Counters shared between the delivery callback and the consumer.
#[derive(Debug)]
pub struct StreamStats {
    start_time: Instant,
    received: AtomicU64,
    consumed: AtomicU64,
    dropped: AtomicU64,
    last_report_time: RwLock<Instant>,
    last_received: AtomicU64,
}

impl StreamStats {
    /// Counters starting at zero, with the rate window starting now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start_time: now,
            received: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            last_report_time: RwLock::new(now),
            last_received: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_consumed(&self) {
        self.consumed.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the new drop count.
    pub(crate) fn record_dropped(&self) -> u64 {
        self.dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Totals plus the frame rate since the previous snapshot. Resets the
    /// rate window.
    pub fn snapshot(&self) -> StatsSnapshot {
        let now = Instant::now();

        let elapsed = now.duration_since(*self.last_report_time.read()).as_secs_f32();
        let received = self.received.load(Ordering::Relaxed);
        let last_received = self.last_received.load(Ordering::Relaxed);
        let fps = if elapsed > 0.0 {
            received.saturating_sub(last_received) as f32 / elapsed
        } else {
            0.0
        };

        let consumed = self.consumed.load(Ordering::Relaxed);
        let dropped = self.dropped.load(Ordering::Relaxed);

        StatsSnapshot {
            fps,
            received,
            consumed,
            dropped,
            queued: received.saturating_sub(consumed + dropped),
            uptime_seconds: now.duration_since(self.start_time).as_secs(),
        }
    }

    /// Reset the window used for the fps figure.
    pub fn mark_reported(&self) {
        *self.last_report_time.write() = Instant::now();
        self.last_received
            .store(self.received.load(Ordering::Relaxed), Ordering::Relaxed);
    }
}

impl Default for StreamStats {
    fn default() -> Self {
        Self::new()
    }
}
