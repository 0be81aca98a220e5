//! Character map error types

use thiserror::Error;

/// Errors raised while loading character maps
#[derive(Debug, Error)]
pub enum CharmapError {
    /// The character map file could not be opened or read
    #[error("unable to open UCM: {0}")]
    Open(#[from] std::io::Error),

    /// The map declares a class other than `"SBCS"`, or starts its
    /// `CHARMAP` block before declaring any class
    #[error("only single byte character sets are supported (line {line})")]
    NotSingleByte {
        /// 1-based line number of the offending directive
        line: usize,
    },

    /// The `<subchar>` directive does not carry a `\xNN` value
    #[error("UCM subchar is invalid (line {line})")]
    BadSubchar {
        /// 1-based line number of the offending directive
        line: usize,
    },

    /// A mapping line is malformed, or the block is missing or unterminated
    #[error("missing or bad character map in UCM: {reason}")]
    BadCharmap {
        /// What went wrong
        reason: String,
    },
}

/// Result type for character map operations
pub type CharmapResult<T> = Result<T, CharmapError>;
