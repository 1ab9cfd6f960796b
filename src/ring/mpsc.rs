//! MPSC ring - multiple producers, single consumer.
//!
//! Producers claim positions with one fetch-and-add on the head cursor; the
//! unique ticket gives each producer exclusive ownership of one slot per
//! round, so producers never collide on a slot and never retry a claim.
//! Readiness still travels through the per-slot stamp: a producer waits for
//! its slot to come around empty, writes, and release-publishes the full
//! stamp. The single consumer mirrors the SPSC read side.
//!
//! The fetch-and-add linearises producers, so the consumer observes handles
//! in exactly the order in which producers took their tickets.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::constants::CONSUME_BATCH_LIMIT;
use crate::error::Result;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::trace;

use super::backoff::Backoff;
use super::common::PaddedCursor;
use super::slot::{new_slot_array, Slot};
use super::{check_capacity, Handle, Iter, Sequence};

const RING: &str = "mpsc";

/// Multi-producer single-consumer ring buffer.
///
/// Cardinality contract: any number of threads may call `push`; exactly one
/// thread calls `pop`/`consume`. Violations on the consumer side are
/// undefined behaviour of the queue and are not detected.
pub struct MpscRing {
    buffer: Box<[Slot]>,
    size: usize,
    mask: usize,
    /// Claim cursor, advanced by producer fetch-and-add
    head: PaddedCursor,
    /// Consumer-owned cursor
    tail: PaddedCursor,
    closed: AtomicBool,
    metrics: Metrics,
}

impl MpscRing {
    pub fn new(size: usize) -> Result<Self> {
        check_capacity(size)?;

        Ok(Self {
            buffer: new_slot_array(size),
            size,
            mask: size - 1,
            head: PaddedCursor::new(0),
            tail: PaddedCursor::new(0),
            closed: AtomicBool::new(false),
            metrics: Metrics::new(),
        })
    }

    #[inline(always)]
    fn slot(&self, position: Sequence) -> &Slot {
        &self.buffer[(position as usize) & self.mask]
    }

    /// Enqueue a handle.
    ///
    /// Claims a unique position, then spins (with backoff) until the slot
    /// comes around empty for that position. On a closed ring this is a
    /// silent drop. A producer whose claim raced the close retires the
    /// position with a tombstone so the drain never stalls on it.
    pub fn push(&self, handle: Handle) {
        if self.closed.load(Ordering::SeqCst) {
            self.metrics.record_dropped();
            return;
        }

        let position = self.head.sequence.fetch_add(1, Ordering::SeqCst);

        // The claim may have crossed a concurrent close; re-check before
        // filling so "head at close" stays the final logical count.
        if self.closed.load(Ordering::SeqCst) {
            self.retire(position);
            return;
        }

        let slot = self.slot(position);
        let mut backoff = Backoff::new();
        let mut waited = false;

        while slot.load_stamp(Ordering::Acquire) != position {
            if !waited && backoff.is_yielding() {
                waited = true;
                self.metrics.record_backpressure();
            }
            backoff.snooze();
        }

        slot.write(handle);
        slot.store_stamp(position + 1, Ordering::Release);
    }

    /// Publish a tombstone into a position claimed across a close.
    ///
    /// The position is already part of the logical stream, so the consumer
    /// will wait on it during the drain; the tombstone satisfies that wait
    /// without delivering a payload.
    fn retire(&self, position: Sequence) {
        self.metrics.record_dropped();
        trace::retired(RING, position);

        let slot = self.slot(position);
        let mut backoff = Backoff::new();
        while slot.load_stamp(Ordering::Acquire) != position {
            backoff.snooze();
        }
        slot.write(Handle::TOMBSTONE);
        slot.store_stamp(position + 1, Ordering::Release);
    }

    /// Dequeue the next handle.
    ///
    /// Spins while the ring is empty and open; returns `None` once the ring
    /// is closed and every claimed position at or before the final head has
    /// been drained.
    pub fn pop(&self) -> Option<Handle> {
        let mut tail = self.tail.sequence.load(Ordering::Relaxed);

        loop {
            let slot = self.slot(tail);
            let mut backoff = Backoff::new();
            let mut waited = false;

            loop {
                if slot.load_stamp(Ordering::Acquire) == tail + 1 {
                    let handle = slot.read();
                    slot.store_stamp(tail + self.size as u64, Ordering::Release);
                    self.tail.sequence.store(tail + 1, Ordering::Relaxed);
                    if handle == Handle::TOMBSTONE {
                        tail += 1;
                        break; // retired position, move on
                    }
                    return Some(handle);
                }
                if self.closed.load(Ordering::SeqCst)
                    && self.head.sequence.load(Ordering::SeqCst) <= tail
                {
                    self.metrics.record_end_of_stream();
                    trace::end_of_stream(RING, tail);
                    return None;
                }
                if !waited && backoff.is_yielding() {
                    waited = true;
                    self.metrics.record_backpressure();
                }
                backoff.snooze();
            }
        }
    }

    /// Batched consumption; see [`SpscRing::consume`](super::SpscRing::consume).
    ///
    /// Tombstones from retired positions are skipped without invoking the
    /// callback and do not count against the batch budget.
    pub fn consume<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&mut Iter, Handle),
    {
        let mut tail = self.tail.sequence.load(Ordering::Relaxed);
        let mut iter = Iter::new(tail, CONSUME_BATCH_LIMIT);
        let mut delivered = 0;

        while delivered < CONSUME_BATCH_LIMIT {
            let slot = self.slot(tail);
            let mut backoff = Backoff::new();
            let mut waited = false;

            loop {
                if slot.load_stamp(Ordering::Acquire) == tail + 1 {
                    break;
                }
                if self.closed.load(Ordering::SeqCst)
                    && self.head.sequence.load(Ordering::SeqCst) <= tail
                {
                    self.metrics.record_end_of_stream();
                    trace::end_of_stream(RING, tail);
                    self.tail.sequence.store(tail, Ordering::Relaxed);
                    return delivered;
                }
                if !waited && backoff.is_yielding() {
                    waited = true;
                    self.metrics.record_backpressure();
                }
                backoff.snooze();
            }

            let handle = slot.read();
            slot.store_stamp(tail + self.size as u64, Ordering::Release);
            iter.seek(tail);
            tail += 1;

            if handle == Handle::TOMBSTONE {
                continue;
            }

            delivered += 1;
            f(&mut iter, handle);
            iter.step();
            if iter.is_stopped() {
                break;
            }
        }

        self.tail.sequence.store(tail, Ordering::Relaxed);
        delivered
    }

    /// Mark the ring closed. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        trace::closed(RING, self.size);
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Claimed-but-undequeued count (racy snapshot; includes retired
    /// positions that have not been skipped yet).
    #[inline]
    pub fn len(&self) -> usize {
        let head = self.head.sequence.load(Ordering::Relaxed);
        let tail = self.tail.sequence.load(Ordering::Relaxed);
        head.wrapping_sub(tail) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_invalid_capacity() {
        assert!(MpscRing::new(0).is_err());
        assert!(MpscRing::new(48).is_err());
    }

    #[test]
    fn test_fifo_single_thread() {
        let ring = MpscRing::new(8).unwrap();
        for i in 0..8 {
            ring.push(Handle::from_usize(i));
        }
        for i in 0..8 {
            assert_eq!(ring.pop(), Some(Handle::from_usize(i)));
        }
    }

    #[test]
    fn test_close_then_drain() {
        let ring = MpscRing::new(8).unwrap();
        for i in 0..5 {
            ring.push(Handle::from_usize(i));
        }
        ring.close();
        ring.push(Handle::from_usize(99)); // dropped

        for i in 0..5 {
            assert_eq!(ring.pop(), Some(Handle::from_usize(i)));
        }
        assert_eq!(ring.pop(), None);
        assert_eq!(ring.metrics().dropped_after_close, 1);
    }

    #[test]
    fn test_producers_linearise() {
        let ring = Arc::new(MpscRing::new(256).unwrap());
        let producers = 4;
        let per_producer = 1_000usize;

        let mut handles = Vec::new();
        for p in 0..producers {
            let ring = ring.clone();
            handles.push(thread::spawn(move || {
                for i in 0..per_producer {
                    ring.push(Handle::from_usize(p * 1_000_000 + i));
                }
            }));
        }

        let mut last_seen = vec![None::<usize>; producers];
        for _ in 0..producers * per_producer {
            let value = ring.pop().unwrap().into_usize();
            let producer = value / 1_000_000;
            let seq = value % 1_000_000;
            if let Some(prev) = last_seen[producer] {
                assert!(seq > prev, "producer {producer} reordered");
            }
            last_seen[producer] = Some(seq);
        }

        for handle in handles {
            handle.join().unwrap();
        }
        ring.close();
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_consume_interleaves_with_pop() {
        let ring = MpscRing::new(16).unwrap();
        for i in 0..10 {
            ring.push(Handle::from_usize(i));
        }
        ring.close();

        let mut seen = Vec::new();
        ring.consume(|iter, handle| {
            seen.push(handle.into_usize());
            if seen.len() == 4 {
                iter.stop();
            }
        });
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(ring.pop(), Some(Handle::from_usize(4)));

        let rest = ring.consume(|_, handle| seen.push(handle.into_usize()));
        assert_eq!(rest, 5);
        assert_eq!(ring.pop(), None);
    }
}
