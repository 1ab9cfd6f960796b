//! Metrics for surge rings.
//!
//! Lightweight counters for observability. Every counter is recorded on a
//! cold path only (a wait that backed off, a put dropped by close, an
//! end-of-stream report), so the hot claim/publish path never touches them.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-ring metrics counters
pub struct Metrics {
    backpressure_events: AtomicU64,
    dropped_after_close: AtomicU64,
    end_of_stream_polls: AtomicU64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            backpressure_events: AtomicU64::new(0),
            dropped_after_close: AtomicU64::new(0),
            end_of_stream_polls: AtomicU64::new(0),
        }
    }

    /// A producer or consumer had to back off waiting for its slot.
    #[inline]
    pub(crate) fn record_backpressure(&self) {
        self.backpressure_events.fetch_add(1, Ordering::Relaxed);
    }

    /// A put was dropped or retired because the ring was closed.
    #[inline]
    pub(crate) fn record_dropped(&self) {
        self.dropped_after_close.fetch_add(1, Ordering::Relaxed);
    }

    /// A consumer reported end-of-stream.
    #[inline]
    pub(crate) fn record_end_of_stream(&self) {
        self.end_of_stream_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            backpressure_events: self.backpressure_events.load(Ordering::Relaxed),
            dropped_after_close: self.dropped_after_close.load(Ordering::Relaxed),
            end_of_stream_polls: self.end_of_stream_polls.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.backpressure_events.store(0, Ordering::Relaxed);
        self.dropped_after_close.store(0, Ordering::Relaxed);
        self.end_of_stream_polls.store(0, Ordering::Relaxed);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Waits that had to back off (slot not yet in the expected state)
    pub backpressure_events: u64,
    /// Puts dropped or retired because the ring was closed
    pub dropped_after_close: u64,
    /// End-of-stream reports handed to consumers
    pub end_of_stream_polls: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_reset() {
        let metrics = Metrics::new();
        metrics.record_backpressure();
        metrics.record_backpressure();
        metrics.record_dropped();
        metrics.record_end_of_stream();

        let snap = metrics.snapshot();
        assert_eq!(snap.backpressure_events, 2);
        assert_eq!(snap.dropped_after_close, 1);
        assert_eq!(snap.end_of_stream_polls, 1);

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }
}
