//! Index error types.

use thiserror::Error;

/// Errors that can occur during index operations.
///
/// Every public operation returns one of these as a typed result; none of
/// them terminates the host process.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Vector length does not match the index dimensionality
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Vector content is unusable (non-finite component, or zero norm
    /// under the cosine metric)
    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    /// Index is at capacity and emergency pruning is disabled or did not
    /// free room
    #[error("Index capacity reached: {capacity}")]
    ResourceExhausted { capacity: u64 },

    /// Writer path did not become available before the insert deadline
    #[error("Writer busy: insert deadline elapsed")]
    Busy,

    /// Too many inserts already waiting on the writer path
    #[error("Insert queue full: {pending} pending")]
    Backpressure { pending: usize },

    /// Snapshot failed format or integrity validation
    #[error("Corrupted snapshot: {0}")]
    Corrupted(String),

    /// Search was cancelled cooperatively or exceeded its deadline
    #[error("Search cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
