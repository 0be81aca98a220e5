//! Header error types

use thiserror::Error;

/// Errors raised while reading or writing subfile headers
#[derive(Debug, Error)]
pub enum HeaderError {
    /// The stream contains the ASCII spelling of the header marker, so the
    /// archive was transferred with character conversion
    #[error("input file appears to be in ASCII format (marker at offset {offset})")]
    AsciiEncoded {
        /// Offset just past the marker
        offset: u64,
    },

    /// A decoded field holds a value the format cannot represent
    #[error("invalid header field {field}: {value}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Offending value
        value: String,
    },

    /// Only years 1900 through 2099 fit the two-digit year with Y2K flag
    #[error("year {0} cannot be stored in a subfile header")]
    YearOutOfRange(u16),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary parsing error
    #[error("binary parsing error: {0}")]
    BinRw(#[from] binrw::Error),
}

/// Result type for header operations
pub type HeaderResult<T> = Result<T, HeaderError>;
