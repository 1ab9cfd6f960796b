//! MPMC ring - multiple producers, multiple consumers.
//!
//! Both sides use the fetch-and-add ticket discipline: producers claim on
//! the head cursor, consumers on the tail cursor, and each ticket grants
//! unambiguous ownership of exactly one logical slot. Inter-round
//! coordination happens through the per-slot stamp, which is touched by
//! exactly one producer and one consumer per round.
//!
//! No participant ever retries a logical position, which is what keeps each
//! operation wait-free modulo the progress the state machine requires from
//! the slot's peer. The only compare-exchange operations in the file belong
//! to the cold close/drain paths (position retirement and end-of-stream
//! slot skips) and never claim or publish on an open ring.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::constants::CONSUME_BATCH_LIMIT;
use crate::error::Result;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::trace;

use super::backoff::Backoff;
use super::common::PaddedCursor;
use super::slot::{new_slot_array, Slot};
use super::{check_capacity, Handle, Iter, Sequence};

const RING: &str = "mpmc";

/// Multi-producer multi-consumer ring buffer.
///
/// Any number of threads may call `push`, any number may call
/// `pop`/`consume`.
pub struct MpmcRing {
    buffer: Box<[Slot]>,
    size: usize,
    mask: usize,
    /// Claim cursor, advanced by producer fetch-and-add
    head: PaddedCursor,
    /// Claim cursor, advanced by consumer fetch-and-add
    tail: PaddedCursor,
    closed: AtomicBool,
    metrics: Metrics,
}

impl MpmcRing {
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
    /// silent drop; a claim that raced the close is retired with a
    /// tombstone so the drain never stalls on it.
    pub fn push(&self, handle: Handle) {
        if self.closed.load(Ordering::SeqCst) {
            self.metrics.record_dropped();
            return;
        }

        let position = self.head.sequence.fetch_add(1, Ordering::SeqCst);

        if self.closed.load(Ordering::SeqCst) {
            self.retire(position);
            return;
        }

        // The check above saw the ring open after the claim, so no draining
        // consumer can skip this position; a plain release publish suffices.
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

    /// Retire a position whose claim crossed a concurrent close.
    ///
    /// A draining consumer may race this and skip the slot first, so the
    /// stamp is advanced with compare-exchange; whichever side wins, the
    /// position resolves without a payload.
    fn retire(&self, position: Sequence) {
        self.metrics.record_dropped();
        trace::retired(RING, position);

        let slot = self.slot(position);
        let mut backoff = Backoff::new();
        loop {
            let stamp = slot.load_stamp(Ordering::Acquire);
            if stamp == position {
                slot.write(Handle::TOMBSTONE);
                if slot.try_advance_stamp(position, position + 1) {
                    return;
                }
            } else if stamp > position {
                return; // a draining consumer already skipped it
            } else {
                backoff.snooze();
            }
        }
    }

    /// Claim and read the next position, skipping tombstones. `None` means
    /// end-of-stream.
    fn take(&self) -> Option<(Sequence, Handle)> {
        loop {
            let position = self.tail.sequence.fetch_add(1, Ordering::SeqCst);
            let slot = self.slot(position);
            let mut backoff = Backoff::new();
            let mut waited = false;

            loop {
                if slot.load_stamp(Ordering::Acquire) == position + 1 {
                    let handle = slot.read();
                    slot.store_stamp(position + self.size as u64, Ordering::Release);
                    if handle == Handle::TOMBSTONE {
                        break; // retired position, claim the next one
                    }
                    return Some((position, handle));
                }
                if self.closed.load(Ordering::SeqCst)
                    && self.head.sequence.load(Ordering::SeqCst) <= position
                {
                    // Claimed past the final head. Skip the slot so its
                    // stamp keeps advancing, then report end-of-stream.
                    if slot.try_advance_stamp(position, position + self.size as u64) {
                        self.metrics.record_end_of_stream();
                        trace::end_of_stream(RING, position);
                        return None;
                    }
                    // A retirement landed first; consume it on the next pass
                    backoff.snooze();
                    continue;
                }
                if !waited && backoff.is_yielding() {
                    waited = true;
                    self.metrics.record_backpressure();
                }
                backoff.snooze();
            }
        }
    }

    /// Dequeue the next handle this consumer's claim resolves to.
    ///
    /// Spins while the ring is empty and open; returns `None` once the ring
    /// is closed and this consumer's claim lies past the final head. Each
    /// handle is delivered to exactly one consumer, in claim order.
    pub fn pop(&self) -> Option<Handle> {
        self.take().map(|(_, handle)| handle)
    }

    /// Batched consumption; see [`SpscRing::consume`](super::SpscRing::consume).
    ///
    /// With multiple consumers each claim is its own fetch-and-add, so a
    /// single consumer observes a monotone subsequence of positions rather
    /// than a contiguous range.
    pub fn consume<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&mut Iter, Handle),
    {
        let mut iter = Iter::new(0, CONSUME_BATCH_LIMIT);
        let mut delivered = 0;

        while delivered < CONSUME_BATCH_LIMIT {
            match self.take() {
                Some((position, handle)) => {
                    iter.seek(position);
                    delivered += 1;
                    f(&mut iter, handle);
                    iter.step();
                    if iter.is_stopped() {
                        break;
                    }
                }
                None => break,
            }
        }

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

    /// Claimed-but-undequeued count (racy snapshot).
    #[inline]
    pub fn len(&self) -> usize {
        let head = self.head.sequence.load(Ordering::Relaxed);
        let tail = self.tail.sequence.load(Ordering::Relaxed);
        head.saturating_sub(tail) as usize
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
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_invalid_capacity() {
        assert!(MpmcRing::new(3).is_err());
        assert!(MpmcRing::new(0).is_err());
    }

    #[test]
    fn test_fifo_single_thread() {
        let ring = MpmcRing::new(8).unwrap();
        for i in 0..8 {
            ring.push(Handle::from_usize(i));
        }
        for i in 0..8 {
            assert_eq!(ring.pop(), Some(Handle::from_usize(i)));
        }
    }

    #[test]
    fn test_wrap_around() {
        let ring = MpmcRing::new(4).unwrap();
        for round in 0..10 {
            for i in 0..4 {
                ring.push(Handle::from_usize(round * 10 + i));
            }
            for i in 0..4 {
                assert_eq!(ring.pop(), Some(Handle::from_usize(round * 10 + i)));
            }
        }
    }

    #[test]
    fn test_close_then_drain() {
        let ring = MpmcRing::new(8).unwrap();
        for i in 0..4 {
            ring.push(Handle::from_usize(i));
        }
        ring.close();
        ring.push(Handle::from_usize(77)); // dropped

        for i in 0..4 {
            assert_eq!(ring.pop(), Some(Handle::from_usize(i)));
        }
        assert_eq!(ring.pop(), None);
        assert_eq!(ring.metrics().dropped_after_close, 1);
    }

    #[test]
    fn test_multi_producer_multi_consumer_totals() {
        let ring = Arc::new(MpmcRing::new(1024).unwrap());
        let producers = 4;
        let consumers = 4;
        let per_producer = 2_500u64;
        let total = producers as u64 * per_producer;

        let sum = Arc::new(AtomicU64::new(0));
        let count = Arc::new(AtomicU64::new(0));

        let mut consumer_handles = Vec::new();
        for _ in 0..consumers {
            let ring = ring.clone();
            let sum = sum.clone();
            let count = count.clone();
            consumer_handles.push(thread::spawn(move || {
                while let Some(handle) = ring.pop() {
                    sum.fetch_add(handle.into_usize() as u64, Ordering::Relaxed);
                    count.fetch_add(1, Ordering::Relaxed);
                }
            }));
        }

        let mut producer_handles = Vec::new();
        for p in 0..producers {
            let ring = ring.clone();
            producer_handles.push(thread::spawn(move || {
                let start = (p as u64) * per_producer + 1;
                for value in start..start + per_producer {
                    ring.push(Handle::from_usize(value as usize));
                }
            }));
        }

        for handle in producer_handles {
            handle.join().unwrap();
        }
        ring.close();
        for handle in consumer_handles {
            handle.join().unwrap();
        }

        let expected_sum = total * (total + 1) / 2;
        assert_eq!(count.load(Ordering::Relaxed), total, "handle lost or duplicated");
        assert_eq!(sum.load(Ordering::Relaxed), expected_sum, "payload corrupted");
    }
}
