//! Subfile metadata and field validation

use std::fmt;
use std::time::SystemTime;

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use vmarc_formats::codec::{DataType, RecordLayout};
use vmarc_formats::header::{MAX_BASE_RECORD_LENGTH, Method, RecordFormat, SubfileHeader};

use crate::error::{ArchiveError, ArchiveResult};

/// Longest file name or file type
pub const MAX_NAME_LEN: usize = 8;

/// Largest record length accepted for new subfiles
pub const MAX_RECORD_LENGTH: u32 = MAX_BASE_RECORD_LENGTH;

/// Subfile date and time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
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
}

impl Timestamp {
    /// Date given to subfiles that were never dated
    pub const EPOCH: Self = Self {
        year: 1900,
        month: 1,
        day: 1,
        hour: 0,
        minute: 0,
        second: 0,
    };

    /// Interpret as local time
    ///
    /// Returns `None` for dates the calendar rejects (February 30th) or
    /// times skipped by a daylight saving change.
    pub fn to_local(self) -> Option<chrono::DateTime<Local>> {
        Local
            .with_ymd_and_hms(
                i32::from(self.year),
                u32::from(self.month),
                u32::from(self.day),
                u32::from(self.hour),
                u32::from(self.minute),
                u32::from(self.second),
            )
            .earliest()
    }

    /// Interpret as local time and convert to a file time
    pub fn to_system_time(self) -> Option<SystemTime> {
        self.to_local().map(SystemTime::from)
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::EPOCH
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// Public view of one subfile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subfile {
    /// Creator version
    pub version: u8,
    /// Creator release
    pub release: u8,
    /// Compression method
    pub method: Method,
    /// File name
    pub name: String,
    /// File type
    pub file_type: String,
    /// File mode
    pub mode: String,
    /// Logical record length
    pub record_length: u32,
    /// Date and time
    pub timestamp: Timestamp,
    /// Record format
    pub record_format: RecordFormat,
    /// Payload bytes in the archive
    pub compressed: u64,
    /// Bytes an extraction yields, or source bytes read when added
    pub uncompressed: u64,
    /// Content classification
    pub data_type: DataType,
}

impl Subfile {
    /// `NAME TYPE MODE` as CMS shows it
    pub fn file_id(&self) -> String {
        format!("{} {} {}", self.name, self.file_type, self.mode)
    }

    /// Record layout used by the codecs
    pub fn layout(&self) -> RecordLayout {
        RecordLayout {
            format: self.record_format,
            record_length: self.record_length,
        }
    }
}

/// Whether `name` is usable as a file name or file type
pub fn is_valid_name(name: &str) -> bool {
    (1..=MAX_NAME_LEN).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"$#@+-:_".contains(&b))
}

/// Whether `mode` is a letter followed by a digit
pub fn is_valid_mode(mode: &str) -> bool {
    matches!(mode.as_bytes(), [letter, digit] if letter.is_ascii_uppercase() && digit.is_ascii_digit())
}

pub(crate) fn check_date(year: u16, month: u8, day: u8) -> ArchiveResult<()> {
    if !(1900..=2099).contains(&year) {
        return Err(ArchiveError::BadYear(year));
    }
    if !(1..=12).contains(&month) {
        return Err(ArchiveError::BadMonth(month));
    }
    if !(1..=31).contains(&day) {
        return Err(ArchiveError::BadDay(day));
    }
    Ok(())
}

pub(crate) fn check_time(hour: u8, minute: u8, second: u8) -> ArchiveResult<()> {
    if hour > 23 {
        return Err(ArchiveError::BadHour(hour));
    }
    if minute > 59 {
        return Err(ArchiveError::BadMinute(minute));
    }
    if second > 59 {
        return Err(ArchiveError::BadSecond(second));
    }
    Ok(())
}

/// Release number written for a method
pub(crate) fn release_for(method: Method) -> u8 {
    u8::from(method == Method::Asis)
}

/// Registry record: the public subfile plus storage bookkeeping
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) subfile: Subfile,
    /// Payload offset in the committed archive, or in staging when `staged`
    pub(crate) data_offset: u64,
    pub(crate) populated: bool,
    pub(crate) staged: bool,
    pub(crate) dirty: bool,
    /// Record format, length and method are frozen
    pub(crate) locked: bool,
}

impl Entry {
    /// Fresh entry awaiting data
    pub(crate) fn new(method: Method) -> Self {
        Self {
            subfile: Subfile {
                version: 1,
                release: release_for(method),
                method,
                name: "TEMPNAME".to_string(),
                file_type: "$DEFAULT".to_string(),
                mode: "A1".to_string(),
                record_length: MAX_RECORD_LENGTH,
                timestamp: Timestamp::EPOCH,
                record_format: RecordFormat::Variable,
                compressed: 0,
                uncompressed: 0,
                data_type: DataType::Unknown,
            },
            data_offset: 0,
            populated: false,
            staged: false,
            dirty: false,
            locked: false,
        }
    }

    /// Entry for a subfile found in a committed archive
    pub(crate) fn from_header(header: SubfileHeader, data_offset: u64) -> Self {
        Self {
            subfile: Subfile {
                version: header.version,
                release: header.release,
                method: header.method,
                name: header.name,
                file_type: header.file_type,
                mode: header.mode,
                record_length: header.record_length,
                timestamp: Timestamp {
                    year: header.year,
                    month: header.month,
                    day: header.day,
                    hour: header.hour,
                    minute: header.minute,
                    second: header.second,
                },
                record_format: header.record_format,
                compressed: 0,
                uncompressed: 0,
                data_type: DataType::Unknown,
            },
            data_offset,
            populated: true,
            staged: false,
            dirty: false,
            locked: true,
        }
    }

    /// Header to write for this entry
    pub(crate) fn header(&self) -> SubfileHeader {
        let sf = &self.subfile;
        SubfileHeader {
            version: sf.version,
            release: sf.release,
            name: sf.name.clone(),
            file_type: sf.file_type.clone(),
            mode: sf.mode.clone(),
            record_length: sf.record_length,
            year: sf.timestamp.year,
            month: sf.timestamp.month,
            day: sf.timestamp.day,
            hour: sf.timestamp.hour,
            minute: sf.timestamp.minute,
            second: sf.timestamp.second,
            record_format: sf.record_format,
            method: sf.method,
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_name_validation() {
        assert!(is_valid_name("PROFILE"));
        assert!(is_valid_name("$DEFAULT"));
        assert!(is_valid_name("a@b#c+-:"));
        assert!(is_valid_name("X_1"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("TOOLONGNAME"));
        assert!(!is_valid_name("HAS SPACE"));
        assert!(!is_valid_name("DOT.TED"));
        assert!(!is_valid_name("ÄÖÜ"));
    }

    #[test]
    fn test_mode_validation() {
        assert!(is_valid_mode("A1"));
        assert!(is_valid_mode("Z0"));
        assert!(!is_valid_mode("a1"));
        assert!(!is_valid_mode("A"));
        assert!(!is_valid_mode("AA"));
        assert!(!is_valid_mode("A12"));
        assert!(!is_valid_mode("11"));
    }

    #[test]
    fn test_date_and_time_ranges() {
        assert!(check_date(1900, 1, 1).is_ok());
        assert!(check_date(2099, 12, 31).is_ok());
        assert!(matches!(check_date(1899, 1, 1), Err(ArchiveError::BadYear(1899))));
        assert!(matches!(check_date(2100, 1, 1), Err(ArchiveError::BadYear(2100))));
        assert!(matches!(check_date(2000, 13, 1), Err(ArchiveError::BadMonth(13))));
        assert!(matches!(check_date(2000, 0, 1), Err(ArchiveError::BadMonth(0))));
        assert!(matches!(check_date(2000, 1, 32), Err(ArchiveError::BadDay(32))));

        assert!(check_time(23, 59, 59).is_ok());
        assert!(matches!(check_time(24, 0, 0), Err(ArchiveError::BadHour(24))));
        assert!(matches!(check_time(0, 60, 0), Err(ArchiveError::BadMinute(60))));
        assert!(matches!(check_time(0, 0, 60), Err(ArchiveError::BadSecond(60))));
    }

    #[test]
    fn test_new_entry_defaults() {
        let entry = Entry::new(Method::Asis);
        assert_eq!(entry.subfile.file_id(), "TEMPNAME $DEFAULT A1");
        assert_eq!(entry.subfile.release, 1);
        assert_eq!(entry.subfile.record_length, 65535);
        assert_eq!(entry.subfile.record_format, RecordFormat::Variable);
        assert_eq!(entry.subfile.timestamp, Timestamp::EPOCH);
        assert!(!entry.locked);
        assert!(!entry.populated);

        let entry = Entry::new(Method::Lzw);
        assert_eq!(entry.subfile.release, 0);
    }

    #[test]
    fn test_header_round_trip() {
        let mut entry = Entry::new(Method::Lzw);
        entry.subfile.name = "NOTES".to_string();
        entry.subfile.timestamp = Timestamp {
            year: 2023,
            month: 7,
            day: 4,
            hour: 9,
            minute: 30,
            second: 15,
        };
        let restored = Entry::from_header(entry.header(), 128);
        assert_eq!(restored.subfile.name, "NOTES");
        assert_eq!(restored.subfile.timestamp, entry.subfile.timestamp);
        assert_eq!(restored.subfile.method, Method::Lzw);
        assert_eq!(restored.data_offset, 128);
        assert!(restored.locked);
    }

    #[test]
    fn test_timestamp_display_and_local_time() {
        let ts = Timestamp {
            year: 1999,
            month: 12,
            day: 31,
            hour: 12,
            minute: 0,
            second: 0,
        };
        assert_eq!(ts.to_string(), "1999-12-31 12:00:00");
        assert!(ts.to_system_time().is_some());

        let impossible = Timestamp {
            month: 2,
            day: 31,
            ..ts
        };
        assert!(impossible.to_local().is_none());
    }
}
