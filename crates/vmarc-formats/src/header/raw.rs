//! On-disk header layout

use binrw::{BinRead, BinWrite};

use super::HeaderFlags;

/// Header bytes following the 8-byte marker
///
/// All multi-byte integers are big-endian. Date and time fields are packed
/// decimal, text fields are EBCDIC.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct RawHeader {
    /// Creator version
    pub version: u8,
    /// Creator release
    pub release: u8,
    /// File name, blank padded
    pub name: [u8; 8],
    /// File type, blank padded
    pub file_type: [u8; 8],
    /// File mode letter and digit
    pub mode: [u8; 2],
    /// Record length (superseded by the extended header when present)
    pub record_length: u16,
    /// Two-digit year
    pub year: u8,
    /// Month
    pub month: u8,
    /// Day
    pub day: u8,
    /// Hour
    pub hour: u8,
    /// Minute
    pub minute: u8,
    /// Second
    pub second: u8,
    /// Record format letter
    pub record_format: u8,
    /// Method and layout flags
    pub flags: u8,
    /// Extended tail, present when [`HeaderFlags::EXTENDED`] is set
    #[br(if(flags & HeaderFlags::EXTENDED.bits() != 0))]
    pub extended: Option<ExtendedTail>,
}

/// Extended header tail carrying a 32-bit record length
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct ExtendedTail {
    /// Record length
    pub record_length: u32,
    /// Reserved, written as zeros
    pub reserved: [u8; 8],
}

impl RawHeader {
    /// Size of the fixed part of the header
    pub const BASE_SIZE: usize = 30;

    /// Size of the header with the extended tail
    pub const EXTENDED_SIZE: usize = 42;

    /// Encoded size of this header
    pub fn encoded_size(&self) -> usize {
        if self.extended.is_some() {
            Self::EXTENDED_SIZE
        } else {
            Self::BASE_SIZE
        }
    }
}
