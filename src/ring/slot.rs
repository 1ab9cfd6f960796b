//! Stamped ring slot.
//!
//! A slot pairs a 64-bit atomic sequence stamp with the handle it guards.
//! For position `p` in a ring of capacity `N` the stamp encodes the slot
//! state machine:
//!
//! - `stamp == p`     - empty, awaiting the producer of position `p`
//! - `stamp == p + 1` - full, awaiting the consumer of position `p`
//! - `stamp == p + N` - empty again, awaiting the producer of the next round
//!
//! The stamp is the only cross-thread channel for the handle: a producer
//! publishes with a release store after writing `value`, a consumer reads
//! `value` only after an acquire load observed the full stamp, so the
//! value cell itself needs no ordering of its own. It is still an atomic
//! word rather than a plain cell because the close protocol allows two
//! retiring producers of adjacent rounds to store a tombstone into the same
//! slot concurrently; both store the same word, and word-sized atomics make
//! the overlap well-defined. Stamps are monotonically non-decreasing over a
//! slot's lifetime.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::Handle;

pub(crate) struct Slot {
    stamp: AtomicU64,
    value: AtomicUsize,
}

impl Slot {
    pub(crate) fn new(stamp: u64) -> Self {
        Self {
            stamp: AtomicU64::new(stamp),
            value: AtomicUsize::new(0),
        }
    }

    #[inline(always)]
    pub(crate) fn load_stamp(&self, order: Ordering) -> u64 {
        self.stamp.load(order)
    }

    #[inline(always)]
    pub(crate) fn store_stamp(&self, stamp: u64, order: Ordering) {
        self.stamp.store(stamp, order);
    }

    /// Advance the stamp only if it still reads `current`. Used exclusively
    /// by the cold close/drain paths, never to claim or publish on an open
    /// ring.
    #[inline]
    pub(crate) fn try_advance_stamp(&self, current: u64, next: u64) -> bool {
        self.stamp
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Write the handle into the slot. Must happen before the full stamp is
    /// published; the stamp's release/acquire pair carries the ordering.
    #[inline(always)]
    pub(crate) fn write(&self, handle: Handle) {
        self.value.store(handle.into_usize(), Ordering::Relaxed);
    }

    /// Read the handle out of the slot. Valid only after the full stamp for
    /// the claimed position was observed with acquire ordering.
    #[inline(always)]
    pub(crate) fn read(&self) -> Handle {
        Handle::from_usize(self.value.load(Ordering::Relaxed))
    }
}

/// Allocate a slot array with stamps initialised to the slot index, i.e.
/// every slot empty and awaiting round zero.
pub(crate) fn new_slot_array(capacity: usize) -> Box<[Slot]> {
    (0..capacity)
        .map(|i| Slot::new(i as u64))
        .collect::<Vec<_>>()
        .into_boxed_slice()
}
