//! Subfile header codec
//!
//! Every subfile starts with the marker `:CFF    ` in EBCDIC followed by a
//! 30-byte header, or 42 bytes when the extended flag is set:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0  | 1 | version (always 1) |
//! | 1  | 1 | release (0-2) |
//! | 2  | 8 | file name |
//! | 10 | 8 | file type |
//! | 18 | 2 | file mode |
//! | 20 | 2 | record length |
//! | 22 | 6 | year, month, day, hour, minute, second (packed decimal) |
//! | 28 | 1 | record format (`F` or `V`) |
//! | 29 | 1 | flags |
//! | 30 | 4 | record length (extended header only) |
//! | 34 | 8 | reserved (extended header only) |

mod error;
mod raw;
mod scanner;

pub use error::{HeaderError, HeaderResult};
pub use raw::{ExtendedTail, RawHeader};
pub use scanner::locate_next;

use std::fmt;
use std::io::{Cursor, Write};

use binrw::{BinRead, BinWrite};
use serde::{Deserialize, Serialize};

use crate::charmap::tables::{ARCHIVE_TO_HOST, HOST_TO_ARCHIVE};

/// Header marker in EBCDIC (`:CFF    `)
pub const MAGIC: [u8; 8] = [0x7A, 0xC3, 0xC6, 0xC6, 0x40, 0x40, 0x40, 0x40];

/// Header marker as it appears after an ASCII-converting transfer
pub const ASCII_MAGIC: [u8; 8] = *b":CFF    ";

/// Payloads are padded with zeros to a multiple of this size
pub const CARD_SIZE: u64 = 80;

/// Largest record length that fits the base header
pub const MAX_BASE_RECORD_LENGTH: u32 = 0xFFFF;

/// Compression method of a subfile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// Length-prefixed records, no compression
    Asis,
    /// 12-bit LZW
    Lzw,
    /// String-doubling binary tree
    S2,
}

impl Method {
    /// Method encoded by a header flags byte
    pub fn from_flags(flags: HeaderFlags) -> Self {
        if flags.contains(HeaderFlags::ASIS) {
            Self::Asis
        } else if flags.contains(HeaderFlags::S2) {
            Self::S2
        } else {
            Self::Lzw
        }
    }

    /// Flags announcing this method
    pub fn flags(self) -> HeaderFlags {
        match self {
            Self::Asis => HeaderFlags::ASIS,
            Self::Lzw => HeaderFlags::empty(),
            Self::S2 => HeaderFlags::S2,
        }
    }

    /// Display name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asis => "ASIS",
            Self::Lzw => "LZW",
            Self::S2 => "S2",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record format of a subfile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordFormat {
    /// Every record is exactly `lrecl` bytes
    Fixed,
    /// Records vary in length up to `lrecl`
    Variable,
}

impl RecordFormat {
    /// Parse a host format letter
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'F' => Some(Self::Fixed),
            'V' => Some(Self::Variable),
            _ => None,
        }
    }

    /// Host format letter
    pub fn as_char(self) -> char {
        match self {
            Self::Fixed => 'F',
            Self::Variable => 'V',
        }
    }
}

impl fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Header flags byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HeaderFlags(u8);

impl HeaderFlags {
    /// Payload is S2 compressed
    pub const S2: Self = Self(0x80);
    /// Payload is stored as is
    pub const ASIS: Self = Self(0x40);
    /// Two-digit year is relative to 2000
    pub const Y2K: Self = Self(0x20);
    /// Header carries the extended tail
    pub const EXTENDED: Self = Self(0x01);

    const KNOWN: u8 = 0x80 | 0x40 | 0x20 | 0x01;

    /// No flags
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Wrap a raw byte if it sets no undefined bits
    pub const fn from_bits(bits: u8) -> Option<Self> {
        if bits & !Self::KNOWN == 0 {
            Some(Self(bits))
        } else {
            None
        }
    }

    /// Raw byte
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether all bits of `other` are set
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for HeaderFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for HeaderFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Packed decimal byte to value (`0x59` -> 59)
pub const fn from_packed(byte: u8) -> u8 {
    (byte >> 4) * 10 + (byte & 0x0F)
}

/// Value below 100 to packed decimal (59 -> `0x59`)
pub const fn to_packed(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

/// Decoded subfile header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubfileHeader {
    /// Creator version
    pub version: u8,
    /// Creator release
    pub release: u8,
    /// File name (host encoding, no padding)
    pub name: String,
    /// File type (host encoding, no padding)
    pub file_type: String,
    /// File mode (letter and digit)
    pub mode: String,
    /// Logical record length
    pub record_length: u32,
    /// Four-digit year
    pub year: u16,
    /// Month 1-12
    pub month: u8,
    /// Day 1-31
    pub day: u8,
    /// Hour 0-23
    pub hour: u8,
    /// Minute 0-59
    pub minute: u8,
    /// Second 0-59
    pub second: u8,
    /// Record format
    pub record_format: RecordFormat,
    /// Compression method
    pub method: Method,
}

impl SubfileHeader {
    /// Decode the raw on-disk layout
    pub fn from_raw(raw: &RawHeader) -> HeaderResult<Self> {
        let flags = HeaderFlags::from_bits(raw.flags).ok_or_else(|| HeaderError::InvalidField {
            field: "flags",
            value: format!("{:#04x}", raw.flags),
        })?;

        let recfm = char::from(ARCHIVE_TO_HOST[usize::from(raw.record_format)]);
        let record_format =
            RecordFormat::from_char(recfm).ok_or_else(|| HeaderError::InvalidField {
                field: "record format",
                value: recfm.to_string(),
            })?;

        let mut year = u16::from(from_packed(raw.year)) + 1900;
        if flags.contains(HeaderFlags::Y2K) {
            year += 100;
        }
        if year < 1960 {
            year += 100;
        }

        let record_length = raw
            .extended
            .map_or(u32::from(raw.record_length), |tail| tail.record_length);

        Ok(Self {
            version: raw.version,
            release: raw.release,
            name: host_text(&raw.name),
            file_type: host_text(&raw.file_type),
            mode: host_text(&raw.mode),
            record_length,
            year,
            month: from_packed(raw.month),
            day: from_packed(raw.day),
            hour: from_packed(raw.hour),
            minute: from_packed(raw.minute),
            second: from_packed(raw.second),
            record_format,
            method: Method::from_flags(flags),
        })
    }

    /// Encode to the raw on-disk layout
    pub fn to_raw(&self) -> HeaderResult<RawHeader> {
        if !(1900..=2099).contains(&self.year) {
            return Err(HeaderError::YearOutOfRange(self.year));
        }

        let mut flags = self.method.flags();
        let mut year = self.year - 1900;
        if year >= 100 {
            flags |= HeaderFlags::Y2K;
            year -= 100;
        }

        let extended = (self.record_length > MAX_BASE_RECORD_LENGTH).then(|| {
            flags |= HeaderFlags::EXTENDED;
            ExtendedTail {
                record_length: self.record_length,
                reserved: [0; 8],
            }
        });

        Ok(RawHeader {
            version: self.version,
            release: self.release,
            name: archive_text(&self.name),
            file_type: archive_text(&self.file_type),
            mode: archive_text(&self.mode),
            record_length: self.record_length.min(MAX_BASE_RECORD_LENGTH) as u16,
            year: to_packed(year as u8),
            month: to_packed(self.month),
            day: to_packed(self.day),
            hour: to_packed(self.hour),
            minute: to_packed(self.minute),
            second: to_packed(self.second),
            record_format: HOST_TO_ARCHIVE[usize::from(self.record_format.as_char() as u8)],
            flags: flags.bits(),
            extended,
        })
    }

    /// Encode marker and header
    pub fn to_bytes(&self) -> HeaderResult<Vec<u8>> {
        let raw = self.to_raw()?;
        let mut cursor = Cursor::new(Vec::with_capacity(MAGIC.len() + raw.encoded_size()));
        cursor.write_all(&MAGIC)?;
        raw.write(&mut cursor)?;
        Ok(cursor.into_inner())
    }

    /// Decode header bytes that follow the marker
    pub fn from_bytes(bytes: &[u8]) -> HeaderResult<Self> {
        let raw = RawHeader::read(&mut Cursor::new(bytes))?;
        Self::from_raw(&raw)
    }
}

/// Translate an EBCDIC field to host text, stopping at the first blank
fn host_text(field: &[u8]) -> String {
    field
        .iter()
        .map(|&b| ARCHIVE_TO_HOST[usize::from(b)])
        .take_while(|&b| b != b' ')
        .map(char::from)
        .collect()
}

/// Translate host text into a blank-padded EBCDIC field
fn archive_text<const N: usize>(text: &str) -> [u8; N] {
    let mut field = [HOST_TO_ARCHIVE[usize::from(b' ')]; N];
    for (slot, b) in field.iter_mut().zip(text.bytes()) {
        *slot = HOST_TO_ARCHIVE[usize::from(b)];
    }
    field
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> SubfileHeader {
        SubfileHeader {
            version: 1,
            release: 1,
            name: "PROFILE".to_string(),
            file_type: "EXEC".to_string(),
            mode: "A1".to_string(),
            record_length: 80,
            year: 1998,
            month: 7,
            day: 14,
            hour: 9,
            minute: 30,
            second: 5,
            record_format: RecordFormat::Fixed,
            method: Method::Asis,
        }
    }

    #[test]
    fn test_packed_decimal() {
        assert_eq!(from_packed(0x59), 59);
        assert_eq!(from_packed(0x00), 0);
        assert_eq!(to_packed(7), 0x07);
        assert_eq!(to_packed(99), 0x99);
        for v in 0..100 {
            assert_eq!(from_packed(to_packed(v)), v);
        }
    }

    #[test]
    fn test_known_layout() {
        let bytes = sample().to_bytes().expect("Test operation should succeed");
        assert_eq!(bytes.len(), 8 + RawHeader::BASE_SIZE);
        assert_eq!(&bytes[..8], &MAGIC);
        assert_eq!(bytes[8], 1);
        assert_eq!(bytes[9], 1);
        // "PROFILE " in EBCDIC
        assert_eq!(&bytes[10..18], &[0xD7, 0xD9, 0xD6, 0xC6, 0xC9, 0xD3, 0xC5, 0x40]);
        assert_eq!(&bytes[26..28], &[0xC1, 0xF1]);
        assert_eq!(&bytes[28..30], &[0x00, 0x50]);
        assert_eq!(&bytes[30..36], &[0x98, 0x07, 0x14, 0x09, 0x30, 0x05]);
        assert_eq!(bytes[36], 0xC6);
        assert_eq!(bytes[37], 0x40);
    }

    #[test]
    fn test_decode_encoded() {
        let header = sample();
        let bytes = header.to_bytes().expect("Test operation should succeed");
        let decoded = SubfileHeader::from_bytes(&bytes[8..]).expect("Test operation should succeed");
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_y2k_flag() {
        let mut header = sample();
        header.year = 2024;
        header.method = Method::Lzw;
        let raw = header.to_raw().expect("Test operation should succeed");
        assert_eq!(raw.year, 0x24);
        assert_eq!(raw.flags, HeaderFlags::Y2K.bits());

        let decoded = SubfileHeader::from_raw(&raw).expect("Test operation should succeed");
        assert_eq!(decoded.year, 2024);
        assert_eq!(decoded.method, Method::Lzw);
    }

    #[test]
    fn test_two_digit_year_window() {
        let mut raw = sample().to_raw().expect("Test operation should succeed");
        raw.year = 0x05;
        assert_eq!(SubfileHeader::from_raw(&raw).unwrap().year, 2005);
        raw.year = 0x60;
        assert_eq!(SubfileHeader::from_raw(&raw).unwrap().year, 1960);
    }

    #[test]
    fn test_year_out_of_range() {
        let mut header = sample();
        header.year = 2100;
        assert!(matches!(header.to_raw(), Err(HeaderError::YearOutOfRange(2100))));
    }

    #[test]
    fn test_extended_header() {
        let mut header = sample();
        header.record_length = 200_000;
        header.record_format = RecordFormat::Variable;
        let bytes = header.to_bytes().expect("Test operation should succeed");
        assert_eq!(bytes.len(), 8 + RawHeader::EXTENDED_SIZE);
        assert_eq!(bytes[37] & HeaderFlags::EXTENDED.bits(), HeaderFlags::EXTENDED.bits());
        assert_eq!(&bytes[38..42], &200_000u32.to_be_bytes());

        let decoded = SubfileHeader::from_bytes(&bytes[8..]).expect("Test operation should succeed");
        assert_eq!(decoded.record_length, 200_000);
    }

    #[test]
    fn test_method_flags() {
        assert_eq!(Method::from_flags(HeaderFlags::ASIS), Method::Asis);
        assert_eq!(Method::from_flags(HeaderFlags::S2), Method::S2);
        assert_eq!(Method::from_flags(HeaderFlags::Y2K), Method::Lzw);
        assert_eq!(HeaderFlags::from_bits(0x02), None);
    }
}
