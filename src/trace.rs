//! Trace hooks for cold-path events.
//!
//! Compiled to empty inline functions unless the `tracing` feature is
//! enabled, so the default build pays nothing for them.
//!
//! ```toml
//! surge = { version = "0.1", features = ["tracing"] }
//! ```

/// A ring was closed.
#[cfg(feature = "tracing")]
#[inline]
pub(crate) fn closed(ring: &'static str, capacity: usize) {
    tracing::debug!(ring, capacity, "ring closed");
}

#[cfg(not(feature = "tracing"))]
#[inline]
pub(crate) fn closed(_ring: &'static str, _capacity: usize) {}

/// A producer retired a claimed position after observing close.
#[cfg(feature = "tracing")]
#[inline]
pub(crate) fn retired(ring: &'static str, position: u64) {
    tracing::trace!(ring, position, "claimed position retired after close");
}

#[cfg(not(feature = "tracing"))]
#[inline]
pub(crate) fn retired(_ring: &'static str, _position: u64) {}

/// A consumer observed end-of-stream.
#[cfg(feature = "tracing")]
#[inline]
pub(crate) fn end_of_stream(ring: &'static str, position: u64) {
    tracing::trace!(ring, position, "end of stream");
}

#[cfg(not(feature = "tracing"))]
#[inline]
pub(crate) fn end_of_stream(_ring: &'static str, _position: u64) {}
