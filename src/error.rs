//! Error types and handling for the surge library

use thiserror::Error;

/// Result type alias for surge operations
pub type Result<T> = std::result::Result<T, SurgeError>;

/// Main error type for the surge library
///
/// Runtime queue operations carry no error channel: `pop` signals
/// end-of-stream by returning `None` and `push` on a closed ring is a silent
/// drop. Errors therefore only surface at construction time.
#[derive(Error, Debug)]
pub enum SurgeError {
    /// Ring capacity is not a power of two, or too small
    #[error("invalid ring capacity {size}: must be a power of two and at least 2")]
    InvalidCapacity {
        /// The capacity that was requested
        size: usize,
    },

    /// Memory-mapped slot allocation failed
    #[error("memory map failed: {message}")]
    Mmap {
        /// Error message describing the mapping failure
        message: String,
    },
}

impl SurgeError {
    /// Create a capacity error for the given requested size
    pub fn capacity(size: usize) -> Self {
        Self::InvalidCapacity { size }
    }

    /// Create a memory-mapping error
    pub fn mmap(message: impl Into<String>) -> Self {
        Self::Mmap {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = SurgeError::capacity(1000);
        assert!(matches!(err, SurgeError::InvalidCapacity { size: 1000 }));

        let err = SurgeError::mmap("mmap failed");
        assert!(matches!(err, SurgeError::Mmap { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = SurgeError::capacity(7);
        let message = err.to_string();
        assert!(message.contains('7'));
        assert!(message.contains("power of two"));
    }
}
