//! SPMC ring - single producer, multiple consumers.
//!
//! The producer is SPSC-shaped: it owns the head cursor and hands slots over
//! through the stamps. Consumers claim positions with one fetch-and-add on
//! the tail cursor; the unique ticket means consumers never collide on a
//! slot and never retry a claim.
//!
//! The head cursor is reserved (published) before the slot is filled. That
//! reservation is what lets a draining consumer decide whether a claimed
//! position can still receive a handle: once the ring is closed, a position
//! at or past the reserved head never will, and the consumer skips its slot
//! and reports end-of-stream instead.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::constants::CONSUME_BATCH_LIMIT;
use crate::error::Result;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::trace;

use super::backoff::Backoff;
use super::common::PaddedCursor;
use super::slot::{new_slot_array, Slot};
use super::{check_capacity, Handle, Iter, Sequence};

const RING: &str = "spmc";

/// Single-producer multi-consumer ring buffer.
///
/// Cardinality contract: exactly one thread calls `push`; any number of
/// threads call `pop`/`consume`. Violations on the producer side are
/// undefined behaviour of the queue and are not detected.
pub struct SpmcRing {
    buffer: Box<[Slot]>,
    size: usize,
    mask: usize,
    /// Producer-owned cursor, reserved ahead of each fill so draining
    /// consumers see an up-to-date head
    head: PaddedCursor,
    /// Claim cursor, advanced by consumer fetch-and-add
    tail: PaddedCursor,
    closed: AtomicBool,
    metrics: Metrics,
}

impl SpmcRing {
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
    /// Reserves the next position, then spins (with backoff) until the slot
    /// comes around empty. On a closed ring this is a silent drop; a
    /// reservation that raced the close is retired with a tombstone.
    pub fn push(&self, handle: Handle) {
        if self.closed.load(Ordering::SeqCst) {
            self.metrics.record_dropped();
            return;
        }

        let position = self.head.sequence.load(Ordering::Relaxed);
        self.head.sequence.store(position + 1, Ordering::SeqCst);

        if self.closed.load(Ordering::SeqCst) {
            self.retire(position);
            return;
        }

        // The reservation above saw the ring open, so no drain can skip this
        // position; a plain release publish is sufficient.
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

    /// Retire a position whose reservation crossed a concurrent close.
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
    /// handle is delivered to exactly one consumer.
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

    /// Reserved-but-unclaimed count (racy snapshot).
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
