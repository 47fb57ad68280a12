//! Error types for queue operations

use std::io;

/// Errors surfaced by [`crate::DurableQueue`] operations.
///
/// Failed mutations are complete no-ops: in-memory state only advances
/// after the on-disk header commit succeeds, so after any error the queue
/// still observes its pre-operation contents and remains usable.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The stored file length exceeds the actual on-disk size.
    #[error("file is truncated: expected length {expected}, actual length {actual}")]
    Truncated {
        /// File length recorded in the header.
        expected: u32,
        /// Actual size of the file on disk.
        actual: u64,
    },

    /// `remove()` was called on an empty queue.
    #[error("queue is empty")]
    Empty,

    /// A record too large to ever fit in the file was passed to `add()`.
    #[error("record of {length} bytes exceeds maximum of {max} bytes")]
    RecordTooLarge {
        /// Length of the rejected record.
        length: usize,
        /// Largest record length the queue can store.
        max: u32,
    },

    /// Growth by doubling would exceed the maximum file size.
    #[error("queue needs {needed} bytes, exceeding the {max} byte file size limit")]
    CapacityExceeded {
        /// File length the doubling loop would have reached.
        needed: u64,
        /// Configured maximum file length.
        max: u32,
    },
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
