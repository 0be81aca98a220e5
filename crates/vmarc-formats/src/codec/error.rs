//! Codec error types

use thiserror::Error;

/// Errors raised while encoding or decoding subfile payloads
#[derive(Debug, Error)]
pub enum CodecError {
    /// Compressed data does not match what the codec can produce
    #[error("invalid compressed input data: {0}")]
    BadData(&'static str),

    /// The payload ended in the middle of a record
    #[error("additional bytes expected, possibly corrupt input file")]
    Truncated,

    /// An input record does not fit the subfile's record length
    #[error("record of {length} bytes exceeds record length {limit}")]
    RecordTooLong {
        /// Record length found in the input
        length: usize,
        /// Declared record length
        limit: u32,
    },

    /// A decoded record is longer than the subfile header allows
    #[error("output record of {length} bytes overflows record length {limit}")]
    OutputOverflow {
        /// Bytes in the record so far
        length: u64,
        /// Largest acceptable record
        limit: u64,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;
