//! Resynchronizing header scanner
//!
//! Archives have no directory: subfiles are found by scanning for the
//! header marker. A marker found inside payload bytes is only accepted if
//! the header behind it validates field by field; otherwise the bytes read
//! past the marker are pushed back and the search resumes right after it.

use std::io::BufRead;

use tracing::{debug, trace};

use super::{
    ASCII_MAGIC, HeaderError, HeaderFlags, HeaderResult, MAGIC, RawHeader, SubfileHeader,
    from_packed,
};
use crate::charmap::tables::ARCHIVE_TO_HOST;
use crate::stream::PushbackReader;

/// Incremental matcher for one marker
#[derive(Debug)]
struct MarkerMatcher {
    needle: &'static [u8; 8],
    failure: [usize; 8],
    matched: usize,
}

impl MarkerMatcher {
    fn new(needle: &'static [u8; 8]) -> Self {
        let mut failure = [0usize; 8];
        let mut k = 0;
        for i in 1..needle.len() {
            while k > 0 && needle[i] != needle[k] {
                k = failure[k - 1];
            }
            if needle[i] == needle[k] {
                k += 1;
            }
            failure[i] = k;
        }
        Self {
            needle,
            failure,
            matched: 0,
        }
    }

    /// Feed one byte, returning true when the whole marker has been seen
    fn advance(&mut self, byte: u8) -> bool {
        while self.matched > 0 && self.needle[self.matched] != byte {
            self.matched = self.failure[self.matched - 1];
        }
        if self.needle[self.matched] == byte {
            self.matched += 1;
        }
        if self.matched == self.needle.len() {
            self.matched = 0;
            return true;
        }
        false
    }

    fn reset(&mut self) {
        self.matched = 0;
    }
}

/// Header bytes read speculatively after a marker
struct Candidate<'a, R> {
    input: &'a mut PushbackReader<R>,
    bytes: Vec<u8>,
}

impl<R: BufRead> Candidate<'_, R> {
    /// Read `len` bytes and check each with `valid`; false on mismatch or end of input
    fn field(&mut self, len: usize, valid: impl Fn(u8) -> bool) -> std::io::Result<bool> {
        for _ in 0..len {
            let Some(byte) = self.input.get()? else {
                return Ok(false);
            };
            self.bytes.push(byte);
            if !valid(byte) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn last(&self) -> u8 {
        self.bytes.last().copied().unwrap_or_default()
    }
}

fn printable(byte: u8) -> bool {
    (0x20..=0x7E).contains(&ARCHIVE_TO_HOST[usize::from(byte)])
}

fn in_range(low: u8, high: u8) -> impl Fn(u8) -> bool {
    move |byte| (low..=high).contains(&from_packed(byte))
}

fn any(_: u8) -> bool {
    true
}

/// Read and validate the header following a marker
///
/// Returns the header bytes on success. On failure every byte read is
/// pushed back onto `input`.
fn read_candidate<R: BufRead>(input: &mut PushbackReader<R>) -> std::io::Result<Option<Vec<u8>>> {
    let mut c = Candidate {
        input,
        bytes: Vec::with_capacity(RawHeader::EXTENDED_SIZE),
    };

    let valid = c.field(1, |b| b == 1)?
        && c.field(1, |b| b <= 2)?
        && c.field(16, printable)?
        && c.field(1, |b| ARCHIVE_TO_HOST[usize::from(b)].is_ascii_alphabetic())?
        && c.field(1, |b| ARCHIVE_TO_HOST[usize::from(b)].is_ascii_digit())?
        && c.field(2, any)?
        && c.field(1, any)?
        && c.field(1, in_range(1, 12))?
        && c.field(1, in_range(1, 31))?
        && c.field(1, in_range(0, 23))?
        && c.field(1, in_range(0, 59))?
        && c.field(1, in_range(0, 59))?
        && c.field(1, |b| matches!(ARCHIVE_TO_HOST[usize::from(b)], b'F' | b'V'))?
        && c.field(1, |b| HeaderFlags::from_bits(b).is_some())?
        && ((c.last() & HeaderFlags::EXTENDED.bits()) == 0
            || c.field(RawHeader::EXTENDED_SIZE - RawHeader::BASE_SIZE, any)?);

    if valid {
        Ok(Some(c.bytes))
    } else {
        c.input.unget(&c.bytes);
        Ok(None)
    }
}

/// Scan forward to the next valid subfile header
///
/// On success the reader is left at the first payload byte. Returns `None`
/// when the input ends without another header.
pub fn locate_next<R: BufRead>(input: &mut PushbackReader<R>) -> HeaderResult<Option<SubfileHeader>> {
    let mut native = MarkerMatcher::new(&MAGIC);
    let mut ascii = MarkerMatcher::new(&ASCII_MAGIC);

    while let Some(byte) = input.get()? {
        if ascii.advance(byte) {
            return Err(HeaderError::AsciiEncoded {
                offset: input.position(),
            });
        }
        if !native.advance(byte) {
            continue;
        }

        let marker_end = input.position();
        if let Some(bytes) = read_candidate(input)? {
            let header = SubfileHeader::from_bytes(&bytes)?;
            trace!(
                "header {} {} {} at offset {}",
                header.name,
                header.file_type,
                header.mode,
                marker_end - MAGIC.len() as u64
            );
            return Ok(Some(header));
        }

        debug!("rejected header candidate at offset {marker_end}, resuming scan");
        native.reset();
        ascii.reset();
    }

    Ok(None)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::header::{Method, RecordFormat};
    use std::io::Cursor;

    fn header(name: &str) -> SubfileHeader {
        SubfileHeader {
            version: 1,
            release: 1,
            name: name.to_string(),
            file_type: "DATA".to_string(),
            mode: "B2".to_string(),
            record_length: 80,
            year: 2001,
            month: 12,
            day: 31,
            hour: 23,
            minute: 59,
            second: 59,
            record_format: RecordFormat::Variable,
            method: Method::Asis,
        }
    }

    #[test]
    fn test_marker_matcher_restarts_on_partial_prefix() {
        let mut matcher = MarkerMatcher::new(&ASCII_MAGIC);
        let input = b"::CF:CFF    ";
        let hits: Vec<bool> = input.iter().map(|&b| matcher.advance(b)).collect();
        assert_eq!(hits.iter().filter(|&&h| h).count(), 1);
        assert!(hits[input.len() - 1]);
    }

    #[test]
    fn test_locates_header_after_noise() {
        let mut data = vec![0x00, 0x7A, 0xC3, 0x11, 0x40];
        let start = data.len() as u64;
        data.extend(header("FIRST").to_bytes().unwrap());
        data.extend([0xAA, 0xBB]);

        let mut input = PushbackReader::new(Cursor::new(data));
        let found = locate_next(&mut input).unwrap().expect("header present");
        assert_eq!(found.name, "FIRST");
        assert_eq!(input.position(), start + 8 + RawHeader::BASE_SIZE as u64);
        assert_eq!(input.get().unwrap(), Some(0xAA));
    }

    #[test]
    fn test_recovers_from_false_marker() {
        // a marker followed by an invalid version byte, then a real header
        let mut data = MAGIC.to_vec();
        data.extend([0x07, 0x00, 0x12]);
        data.extend(header("REAL").to_bytes().unwrap());

        let mut input = PushbackReader::new(Cursor::new(data));
        let found = locate_next(&mut input).unwrap().expect("header present");
        assert_eq!(found.name, "REAL");
        assert_eq!(locate_next(&mut input).unwrap(), None);
    }

    #[test]
    fn test_false_marker_containing_real_header() {
        // the bytes after a bad marker hold the start of a real header
        let mut data = MAGIC.to_vec();
        data.push(0x01);
        data.push(0x09);
        data.extend(header("INNER").to_bytes().unwrap());

        let mut input = PushbackReader::new(Cursor::new(data));
        let found = locate_next(&mut input).unwrap().expect("header present");
        assert_eq!(found.name, "INNER");
    }

    #[test]
    fn test_bad_month_rejected() {
        let mut bytes = header("BAD").to_bytes().unwrap();
        bytes[31] = 0x13;
        let mut input = PushbackReader::new(Cursor::new(bytes));
        assert_eq!(locate_next(&mut input).unwrap(), None);
    }

    #[test]
    fn test_truncated_header() {
        let bytes = header("CUT").to_bytes().unwrap();
        let mut input = PushbackReader::new(Cursor::new(bytes[..20].to_vec()));
        assert_eq!(locate_next(&mut input).unwrap(), None);
    }

    #[test]
    fn test_ascii_marker_is_an_error() {
        let mut data = b"garbage".to_vec();
        data.extend(ASCII_MAGIC);
        let mut input = PushbackReader::new(Cursor::new(data));
        assert!(matches!(
            locate_next(&mut input),
            Err(HeaderError::AsciiEncoded { offset: 15 })
        ));
    }

    #[test]
    fn test_empty_input() {
        let mut input = PushbackReader::new(Cursor::new(Vec::new()));
        assert_eq!(locate_next(&mut input).unwrap(), None);
    }
}
