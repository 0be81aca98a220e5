//! Archive errors and the numeric status table
//!
//! Every operation returns [`ArchiveResult`]. Callers that need the legacy
//! numeric status take [`ArchiveError::status`]; `0` is reserved for
//! success and [`strerror`] turns any status back into its fixed message.

use std::path::PathBuf;

use thiserror::Error;
use vmarc_formats::charmap::CharmapError;
use vmarc_formats::codec::CodecError;
use vmarc_formats::header::HeaderError;

use crate::registry::SubfileId;

/// Numeric status codes, in their historical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StatusCode {
    /// Success
    Ok = 0,
    /// Read error
    ReadError = 1,
    /// Write error
    WriteError = 2,
    /// Decoded record longer than the subfile allows
    OutputOverflow = 3,
    /// No active subfile
    NoActive = 4,
    /// Input file could not be opened
    OpenInput = 5,
    /// Output file could not be opened
    OpenOutput = 6,
    /// Temporary file could not be created
    OpenTemp = 7,
    /// Allocation failure
    OutOfMemory = 8,
    /// Repositioning failed
    Seek = 9,
    /// Bad argument
    BadArgument = 10,
    /// Iteration is exhausted
    NoMore = 11,
    /// Subfile not in the archive
    NotFound = 12,
    /// Input ended early
    NeedMore = 13,
    /// Character map could not be opened
    CharmapOpen = 14,
    /// Character map is not single-byte
    CharmapNotSingleByte = 15,
    /// Character map substitution byte invalid
    CharmapSubchar = 16,
    /// Character map block missing or malformed
    CharmapInvalid = 17,
    /// Record length too large
    RecordLength = 18,
    /// Archive appears to be in ASCII
    AsciiArchive = 19,
    /// Compressed data invalid
    BadData = 20,
    /// File name invalid
    BadName = 21,
    /// File type invalid
    BadType = 22,
    /// File mode invalid
    BadMode = 23,
    /// Year invalid
    BadYear = 24,
    /// Month invalid
    BadMonth = 25,
    /// Day invalid
    BadDay = 26,
    /// Hour invalid
    BadHour = 27,
    /// Minutes invalid
    BadMinute = 28,
    /// Seconds invalid
    BadSecond = 29,
    /// Field frozen once written
    NotModifiable = 30,
    /// Record format invalid
    BadRecordFormat = 31,
    /// Record length invalid
    BadRecordLength = 32,
    /// File name missing
    BadFile = 33,
    /// A subfile is already retained
    AlreadyRetained = 34,
    /// Release without retain
    NotRetained = 35,
    /// Commit could not rename the merged archive
    RenameRequired = 36,
}

static MESSAGES: [&str; 37] = [
    "No error",
    "read error",
    "write error",
    "Internal error - output buffer overflow",
    "caller error - no active subfile",
    "failed to open input file",
    "failed to open output file",
    "failed to open temp file",
    "not enough memory",
    "repositioning within input file failed",
    "caller error - bad argument passed to library function",
    "no more entries",
    "subfile not found",
    "additional bytes expected, possibly corrupt input file",
    "unable to open UCM",
    "only single byte character sets are supported",
    "UCM subchar is invalid",
    "missing or bad character map in UCM",
    "record length too large for z/OS and kin",
    "input file appears to be in ASCII format",
    "invalid compressed input data",
    "file name limited to 8 characters",
    "file type limited to 8 characters",
    "file mode limited to 1 alpha and 1 numeric character",
    "year must be greater than or equal to 1900",
    "month must be within 1-12",
    "day must be within 1-31",
    "hour must be within 0-23",
    "minutes must be within 0-59",
    "seconds must be within 0-59",
    "field not modifiable once written to archive",
    "record format must be F or V",
    "record length must be 1 to 65535",
    "filename pointer is NULL",
    "subfile already retained",
    "subfile not previously retained",
    "rename failed...manual rename required",
];

impl StatusCode {
    /// Fixed message for this status
    pub fn message(self) -> &'static str {
        MESSAGES[self as usize]
    }

    /// Numeric value
    pub const fn code(self) -> u32 {
        self as u32
    }
}

/// Message for a numeric status, `"unknown error"` when out of range
pub fn strerror(code: u32) -> &'static str {
    usize::try_from(code)
        .ok()
        .and_then(|index| MESSAGES.get(index))
        .copied()
        .unwrap_or("unknown error")
}

/// Errors raised by archive operations
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Read or other I/O failure
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),

    /// Writing the merged archive or an output file failed
    #[error("write error: {0}")]
    Write(#[source] std::io::Error),

    /// Repositioning within an input file failed
    #[error("repositioning within input file failed: {0}")]
    Seek(#[source] std::io::Error),

    /// The operation needs an active subfile
    #[error("caller error - no active subfile")]
    NoActive,

    /// Input file could not be opened
    #[error("failed to open input file {}: {source}", path.display())]
    OpenInput {
        /// File being opened
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Output file could not be created
    #[error("failed to open output file {}: {source}", path.display())]
    OpenOutput {
        /// File being created
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Staging or merge file could not be created
    #[error("failed to open temp file in {}: {source}", dir.display())]
    OpenTemp {
        /// Directory the file was created in
        dir: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Argument rejected
    #[error("caller error - bad argument: {0}")]
    BadArgument(&'static str),

    /// No subfile with this id
    #[error("subfile {0} not found")]
    NotFound(SubfileId),

    /// Empty file name
    #[error("file name is empty")]
    BadFile,

    /// Invalid file name
    #[error("file name {0:?} invalid: 1-8 characters from A-Z a-z 0-9 $#@+-:_")]
    BadName(String),

    /// Invalid file type
    #[error("file type {0:?} invalid: 1-8 characters from A-Z a-z 0-9 $#@+-:_")]
    BadType(String),

    /// Invalid file mode
    #[error("file mode {0:?} invalid: one letter A-Z and one digit")]
    BadMode(String),

    /// Year out of range
    #[error("year {0} must be within 1900-2099")]
    BadYear(u16),

    /// Month out of range
    #[error("month {0} must be within 1-12")]
    BadMonth(u8),

    /// Day out of range
    #[error("day {0} must be within 1-31")]
    BadDay(u8),

    /// Hour out of range
    #[error("hour {0} must be within 0-23")]
    BadHour(u8),

    /// Minute out of range
    #[error("minutes {0} must be within 0-59")]
    BadMinute(u8),

    /// Second out of range
    #[error("seconds {0} must be within 0-59")]
    BadSecond(u8),

    /// Record format letter other than `F` or `V`
    #[error("record format {0:?} must be F or V")]
    BadRecordFormat(char),

    /// Record length out of range
    #[error("record length {0} must be 1 to 65535")]
    BadRecordLength(u32),

    /// Record format, length or method changed after the subfile was written
    #[error("field not modifiable once written to archive")]
    NotModifiable,

    /// Retain while a snapshot is held
    #[error("subfile already retained")]
    AlreadyRetained,

    /// Release without a matching retain
    #[error("subfile not previously retained")]
    NotRetained,

    /// Options could not be parsed
    #[error("invalid options: {0}")]
    Options(#[from] serde_json::Error),

    /// Character map loading failed
    #[error(transparent)]
    Charmap(#[from] CharmapError),

    /// Header scanning or encoding failed
    #[error(transparent)]
    Header(#[from] HeaderError),

    /// Payload encoding or decoding failed
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The merged archive was written but could not be renamed
    ///
    /// Nothing is lost: the archive now lives at `path` and the handle
    /// keeps working there.
    #[error("rename failed...manual rename required: archive is now {}: {source}", path.display())]
    RenameRequired {
        /// Where the merged archive was left
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
}

impl ArchiveError {
    /// Legacy status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Io(_) => StatusCode::ReadError,
            Self::Write(_) => StatusCode::WriteError,
            Self::Seek(_) => StatusCode::Seek,
            Self::NoActive => StatusCode::NoActive,
            Self::OpenInput { .. } => StatusCode::OpenInput,
            Self::OpenOutput { .. } => StatusCode::OpenOutput,
            Self::OpenTemp { .. } => StatusCode::OpenTemp,
            Self::BadArgument(_) | Self::Options(_) => StatusCode::BadArgument,
            Self::NotFound(_) => StatusCode::NotFound,
            Self::BadFile => StatusCode::BadFile,
            Self::BadName(_) => StatusCode::BadName,
            Self::BadType(_) => StatusCode::BadType,
            Self::BadMode(_) => StatusCode::BadMode,
            Self::BadYear(_) => StatusCode::BadYear,
            Self::BadMonth(_) => StatusCode::BadMonth,
            Self::BadDay(_) => StatusCode::BadDay,
            Self::BadHour(_) => StatusCode::BadHour,
            Self::BadMinute(_) => StatusCode::BadMinute,
            Self::BadSecond(_) => StatusCode::BadSecond,
            Self::BadRecordFormat(_) => StatusCode::BadRecordFormat,
            Self::BadRecordLength(_) => StatusCode::BadRecordLength,
            Self::NotModifiable => StatusCode::NotModifiable,
            Self::AlreadyRetained => StatusCode::AlreadyRetained,
            Self::NotRetained => StatusCode::NotRetained,
            Self::Charmap(err) => match err {
                CharmapError::Open(_) => StatusCode::CharmapOpen,
                CharmapError::NotSingleByte { .. } => StatusCode::CharmapNotSingleByte,
                CharmapError::BadSubchar { .. } => StatusCode::CharmapSubchar,
                CharmapError::BadCharmap { .. } => StatusCode::CharmapInvalid,
            },
            Self::Header(err) => match err {
                HeaderError::AsciiEncoded { .. } => StatusCode::AsciiArchive,
                HeaderError::InvalidField { .. } => StatusCode::BadData,
                HeaderError::YearOutOfRange(_) => StatusCode::BadYear,
                HeaderError::Io(_) | HeaderError::BinRw(_) => StatusCode::ReadError,
            },
            Self::Codec(err) => match err {
                CodecError::BadData(_) => StatusCode::BadData,
                CodecError::Truncated => StatusCode::NeedMore,
                CodecError::RecordTooLong { .. } => StatusCode::RecordLength,
                CodecError::OutputOverflow { .. } => StatusCode::OutputOverflow,
                CodecError::Io(_) => StatusCode::ReadError,
            },
            Self::RenameRequired { .. } => StatusCode::RenameRequired,
        }
    }

    /// Whether the handle is unusable after this error
    ///
    /// Only a failed final rename is recoverable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::RenameRequired { .. })
    }
}

/// Result type for archive operations
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Numeric status of a result: `0` on success
pub fn status_of<T>(result: &ArchiveResult<T>) -> u32 {
    result.as_ref().map_or_else(|err| err.status().code(), |_| StatusCode::Ok.code())
}
