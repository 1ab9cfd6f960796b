//! SPSC ring - single producer, single consumer.
//!
//! The producer owns `head`, the consumer owns `tail`; neither cursor is
//! read by the other side on the hot path, and slot hand-off happens through
//! the per-slot stamp (release publish, acquire observe). Single-sided
//! ownership means no fetch-and-add anywhere, which makes this the cheapest
//! variant in the family.
//!
//! The head cursor is still reserved (published) before each fill, exactly
//! like the multi-producer rings: a draining consumer compares its position
//! against the reserved head to decide whether a handle can still arrive.
//! Deciding from the slot stamp alone would race a producer that passed its
//! closed check just before the close landed, and silently strand that
//! handle.
//!
//! ## Allocation strategies
//!
//! - `new()` - standard heap allocation
//! - `new_mapped()` - memory-mapped with mlock (no page faults in steady state)

use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::constants::CONSUME_BATCH_LIMIT;
use crate::error::{Result, SurgeError};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::trace;

use super::backoff::Backoff;
use super::common::PaddedCursor;
use super::slot::{new_slot_array, Slot};
use super::{check_capacity, Handle, Iter, Sequence};

const RING: &str = "spsc";

/// Single-producer single-consumer ring buffer.
///
/// Cardinality contract: exactly one thread calls `push`, exactly one thread
/// calls `pop`/`consume`. Violations are undefined behaviour of the queue
/// and are not detected.
pub struct SpscRing {
    /// Direct pointer to the slot array (no enum dispatch in the hot path)
    buffer: *mut Slot,
    size: usize,
    mask: usize,
    /// Producer-owned cursor, reserved ahead of each fill so the draining
    /// consumer sees an up-to-date head
    head: PaddedCursor,
    /// Consumer-owned cursor; the producer never reads it
    tail: PaddedCursor,
    closed: AtomicBool,
    metrics: Metrics,
    /// Keep heap allocation alive (None for mmap)
    _heap: Option<Box<[Slot]>>,
    is_mapped: bool,
}

impl SpscRing {
    /// Create with heap allocation.
    pub fn new(size: usize) -> Result<Self> {
        check_capacity(size)?;

        let heap = new_slot_array(size);
        let buffer = heap.as_ptr() as *mut Slot;

        Ok(Self {
            buffer,
            size,
            mask: size - 1,
            head: PaddedCursor::new(0),
            tail: PaddedCursor::new(0),
            closed: AtomicBool::new(false),
            metrics: Metrics::new(),
            _heap: Some(heap),
            is_mapped: false,
        })
    }

    /// Create with memory-mapped allocation (mmap + mlock).
    ///
    /// Locks the slot array into physical memory so the steady state never
    /// takes a page fault.
    pub fn new_mapped(size: usize) -> Result<Self> {
        check_capacity(size)?;

        let buffer_size = size * std::mem::size_of::<Slot>();

        let buffer = unsafe {
            let p = libc::mmap(
                ptr::null_mut(),
                buffer_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );

            if p == libc::MAP_FAILED {
                return Err(SurgeError::mmap("anonymous mmap failed"));
            }

            // Best effort; the ring works unlocked too
            let _ = libc::mlock(p, buffer_size);

            let slots = p as *mut Slot;
            for i in 0..size {
                ptr::write(slots.add(i), Slot::new(i as u64));
            }
            slots
        };

        Ok(Self {
            buffer,
            size,
            mask: size - 1,
            head: PaddedCursor::new(0),
            tail: PaddedCursor::new(0),
            closed: AtomicBool::new(false),
            metrics: Metrics::new(),
            _heap: None,
            is_mapped: true,
        })
    }

    #[inline(always)]
    fn slot(&self, position: Sequence) -> &Slot {
        unsafe { &*self.buffer.add((position as usize) & self.mask) }
    }

    /// Enqueue a handle.
    ///
    /// Reserves the next position, then spins (with backoff) while the ring
    /// is full. On a closed ring this is a silent drop; a reservation that
    /// raced the close is retired with a tombstone so the drain never stalls
    /// on it. The `dropped_after_close` metric records either outcome.
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

        // The reservation above saw the ring open, so the consumer drains
        // this position before it can report end-of-stream.
        let slot = self.slot(position);
        let mut backoff = Backoff::new();
        let mut waited = false;

        // Wait for the slot to come around empty for this round
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

    /// Publish a tombstone into a position reserved across a close.
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
    /// Spins while the ring is empty and open. Returns `None` exactly when
    /// the ring is closed and every position reserved before the close has
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

    /// Batched consumption.
    ///
    /// Awaits readiness of successive slots and invokes `f` once per handle,
    /// in arrival order, amortising the tail-cursor store across the whole
    /// batch. Returns the number of handles delivered; the call ends when
    /// the callback invokes [`Iter::stop`], when the ring is closed and
    /// drained, or when the internal batch budget is spent. Tombstones from
    /// retired positions are skipped without invoking the callback and do
    /// not count against the budget.
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

    /// Reserved-but-undequeued count (racy snapshot; includes positions a
    /// blocked `push` has reserved but not yet filled).
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

impl Drop for SpscRing {
    fn drop(&mut self) {
        if self.is_mapped && !self.buffer.is_null() {
            let buffer_size = self.size * std::mem::size_of::<Slot>();
            unsafe {
                libc::munmap(self.buffer as *mut libc::c_void, buffer_size);
            }
        }
        // Heap storage (_heap) is dropped automatically
    }
}

// Safety: the slot stamps serialise all access to each slot's handle, and
// the cardinality contract gives head and tail a single writer each.
unsafe impl Send for SpscRing {}
unsafe impl Sync for SpscRing {}
