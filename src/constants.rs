//! Tuning constants for the ring buffers.

/// Cache line size for alignment (64 bytes on most CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

/// Cursor isolation span. Two cache lines, because adjacent-line prefetchers
/// on Intel/AMD pull pairs of lines.
pub const CURSOR_PAD_SIZE: usize = 2 * CACHE_LINE_SIZE;

/// Minimum ring capacity
pub const MIN_RING_SIZE: usize = 2;

/// Maximum handles delivered by a single `consume` call before it returns.
///
/// Bounds the time a consumer spends inside one call while staying large
/// enough that a post-close drain of a few hundred slots finishes in one
/// pass. Tuning parameter, not part of the public contract.
pub const CONSUME_BATCH_LIMIT: usize = 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_are_powers_of_two() {
        assert!(CACHE_LINE_SIZE.is_power_of_two());
        assert!(CURSOR_PAD_SIZE.is_power_of_two());
        assert!(MIN_RING_SIZE.is_power_of_two());
    }

    #[test]
    fn test_batch_limit_is_bounded() {
        assert!(CONSUME_BATCH_LIMIT >= 1);
        assert!(CONSUME_BATCH_LIMIT <= 64 * 1024);
    }
}
