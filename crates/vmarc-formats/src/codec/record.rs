//! Record framing between host byte streams and coded symbols
//!
//! Decoders emit coded symbols into a [`RecordSink`]; encoders pull
//! records out of a [`RecordSource`]. Both sides apply the subfile's record
//! format and the requested [`Conversion`].

use std::io::{BufRead, Read, Write};

use serde::{Deserialize, Serialize};

use super::error::{CodecError, CodecResult};
use crate::charmap::TranslationTables;
use crate::header::{Method, RecordFormat};

/// Coded symbol marking the end of a record
pub const END_OF_RECORD: u16 = 0;

/// Largest coded symbol (byte 255)
pub const MAX_SYMBOL: u16 = 256;

/// Number of leading bytes inspected to classify data
pub const SNIFF_LEN: u64 = 1024;

/// Slack allowed past the record length of variable records
const VARIABLE_SLACK: u64 = 4;

/// How bytes are converted between host and archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Conversion {
    /// Bytes pass through unchanged
    Binary,
    /// Bytes are translated, record boundaries are not marked
    Translate,
    /// Bytes are translated and records map to lines
    Text,
}

impl Conversion {
    fn translates(self) -> bool {
        !matches!(self, Self::Binary)
    }
}

/// Host line terminator written after each text record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineEnding {
    /// `\n`
    Lf,
    /// `\r\n`
    CrLf,
}

impl Default for LineEnding {
    fn default() -> Self {
        if cfg!(windows) {
            Self::CrLf
        } else {
            Self::Lf
        }
    }
}

impl LineEnding {
    /// Terminator bytes
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::Lf => b"\n",
            Self::CrLf => b"\r\n",
        }
    }
}

/// Best-effort classification of payload content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataType {
    /// Not yet determined
    #[default]
    Unknown,
    /// Printable characters and whitespace only
    Text,
    /// Contains control bytes
    Binary,
}

impl DataType {
    /// Classify a host byte sample
    pub fn sniff(sample: &[u8]) -> Self {
        if sample.iter().any(|&b| is_control(b)) {
            Self::Binary
        } else {
            Self::Text
        }
    }
}

fn is_control(byte: u8) -> bool {
    byte < 0x20 && !matches!(byte, b'\t' | b'\r' | b'\n')
}

/// Record format and length of a subfile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    /// Fixed or variable records
    pub format: RecordFormat,
    /// Logical record length
    pub record_length: u32,
}

/// Whether a decoder should keep feeding symbols
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// More symbols are expected
    Continue,
    /// The end of the subfile has been reached
    Finished,
}

/// Counters gathered while decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeStats {
    /// Payload bytes consumed
    pub consumed: u64,
    /// Data bytes produced, excluding line terminators
    pub data_bytes: u64,
    /// Completed records
    pub records: u64,
    /// Bytes written to the output, including line terminators
    pub produced: u64,
    /// Classification of the leading data bytes
    pub data_type: DataType,
}

impl DecodeStats {
    /// Size of the subfile once extracted as `data_type` with `line_ending`
    pub fn extracted_size(&self, line_ending: LineEnding) -> u64 {
        match self.data_type {
            DataType::Text => self.data_bytes + self.records * line_ending.as_bytes().len() as u64,
            DataType::Unknown | DataType::Binary => self.data_bytes,
        }
    }
}

/// Consumer of decoded symbols
#[derive(Debug)]
pub struct RecordSink<'t, W> {
    out: Option<W>,
    layout: RecordLayout,
    conversion: Conversion,
    tables: &'t TranslationTables,
    line_ending: LineEnding,
    scan_limit: Option<u64>,
    end_markers: u8,
    record_len: u64,
    stats: DecodeStats,
}

impl<'t, W: Write> RecordSink<'t, W> {
    /// Sink writing decoded bytes to `out`, or counting only when `out` is `None`
    pub fn new(
        out: Option<W>,
        layout: RecordLayout,
        conversion: Conversion,
        tables: &'t TranslationTables,
    ) -> Self {
        Self {
            out,
            layout,
            conversion,
            tables,
            line_ending: LineEnding::default(),
            scan_limit: None,
            end_markers: 0,
            record_len: 0,
            stats: DecodeStats {
                data_type: DataType::Text,
                ..DecodeStats::default()
            },
        }
    }

    /// Use `ending` after text records
    #[must_use]
    pub fn with_line_ending(mut self, ending: LineEnding) -> Self {
        self.line_ending = ending;
        self
    }

    /// Stop once `limit` payload bytes have been consumed
    #[must_use]
    pub fn with_scan_limit(mut self, limit: u64) -> Self {
        self.scan_limit = Some(limit);
        self
    }

    /// Record format of the subfile being decoded
    pub fn layout(&self) -> RecordLayout {
        self.layout
    }

    /// Whether a scanning pass has seen enough input
    pub fn scan_satisfied(&self, consumed: u64) -> bool {
        self.scan_limit.is_some_and(|limit| consumed >= limit)
    }

    /// Whether the last symbol closed a record
    pub fn at_record_boundary(&self) -> bool {
        self.end_markers > 0
    }

    /// Accept one coded symbol
    pub fn put(&mut self, symbol: u16) -> CodecResult<Flow> {
        if symbol == END_OF_RECORD {
            self.end_markers = self.end_markers.saturating_add(1);
            if self.end_markers > 1 || self.layout.format == RecordFormat::Fixed {
                return Ok(Flow::Finished);
            }
            self.end_record()?;
            return Ok(Flow::Continue);
        }
        self.end_markers = 0;

        let byte = u8::try_from(symbol - 1).map_err(|_| CodecError::BadData("symbol out of range"))?;

        let limit = u64::from(self.layout.record_length);
        if self.layout.format == RecordFormat::Fixed && limit > 0 && self.record_len == limit {
            self.end_record()?;
        }

        let byte = if self.conversion.translates() {
            self.tables.to_host(byte)
        } else {
            byte
        };

        self.stats.data_bytes += 1;
        if self.stats.data_bytes <= SNIFF_LEN && is_control(byte) {
            self.stats.data_type = DataType::Binary;
        }
        self.record_len += 1;

        if let Some(out) = self.out.as_mut() {
            let max = match self.layout.format {
                RecordFormat::Fixed => limit,
                RecordFormat::Variable => limit + VARIABLE_SLACK,
            };
            if self.record_len > max {
                return Err(CodecError::OutputOverflow {
                    length: self.record_len,
                    limit: max,
                });
            }
            out.write_all(&[byte])?;
            self.stats.produced += 1;
        }
        Ok(Flow::Continue)
    }

    fn end_record(&mut self) -> CodecResult<()> {
        self.stats.records += 1;
        self.record_len = 0;
        if self.conversion == Conversion::Text
            && let Some(out) = self.out.as_mut()
        {
            let ending = self.line_ending.as_bytes();
            out.write_all(ending)?;
            self.stats.produced += ending.len() as u64;
        }
        Ok(())
    }

    /// Close a trailing partial record, flush the output and return the counters
    pub fn finish(mut self, consumed: u64) -> CodecResult<(DecodeStats, Option<W>)> {
        if self.record_len > 0 {
            self.end_record()?;
        }
        if let Some(out) = self.out.as_mut() {
            out.flush()?;
        }
        self.stats.consumed = consumed;
        Ok((self.stats, self.out))
    }
}

/// Counters gathered while encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeStats {
    /// Host bytes read
    pub bytes_read: u64,
    /// Payload bytes written
    pub written: u64,
    /// Longest record produced
    pub longest_record: u32,
    /// Method actually used to encode
    pub method: Method,
}

/// Splits host input into archive records
#[derive(Debug)]
pub struct RecordSource<'t, R> {
    input: R,
    layout: RecordLayout,
    conversion: Conversion,
    tables: &'t TranslationTables,
    bytes_read: u64,
    longest: usize,
    line: Vec<u8>,
}

impl<'t, R: BufRead> RecordSource<'t, R> {
    /// Read records from `input`
    pub fn new(
        input: R,
        layout: RecordLayout,
        conversion: Conversion,
        tables: &'t TranslationTables,
    ) -> Self {
        Self {
            input,
            layout,
            conversion,
            tables,
            bytes_read: 0,
            longest: 0,
            line: Vec::new(),
        }
    }

    /// Record format being produced
    pub fn layout(&self) -> RecordLayout {
        self.layout
    }

    /// Host bytes read so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Longest record produced so far
    pub fn longest_record(&self) -> u32 {
        u32::try_from(self.longest).unwrap_or(u32::MAX)
    }

    /// Fill `record` with the next record in archive encoding
    ///
    /// Returns false once the input is exhausted.
    pub fn next_record(&mut self, record: &mut Vec<u8>) -> CodecResult<bool> {
        record.clear();
        let more = if self.conversion == Conversion::Text {
            self.next_line(record)?
        } else {
            self.next_chunk(record)?
        };
        if more {
            self.longest = self.longest.max(record.len());
        }
        Ok(more)
    }

    fn next_line(&mut self, record: &mut Vec<u8>) -> CodecResult<bool> {
        self.line.clear();
        let n = self.input.read_until(b'\n', &mut self.line)?;
        if n == 0 {
            return Ok(false);
        }
        self.bytes_read += n as u64;

        record.extend(
            self.line
                .iter()
                .filter(|&&b| b != b'\r' && b != b'\n')
                .map(|&b| self.tables.to_archive(b)),
        );
        if record.is_empty() {
            record.push(self.tables.to_archive(b' '));
        }

        let limit = self.layout.record_length;
        if record.len() > limit as usize {
            return Err(CodecError::RecordTooLong {
                length: record.len(),
                limit,
            });
        }
        if self.layout.format == RecordFormat::Fixed {
            record.resize(limit as usize, self.tables.to_archive(b' '));
        }
        Ok(true)
    }

    fn next_chunk(&mut self, record: &mut Vec<u8>) -> CodecResult<bool> {
        let want = self.layout.record_length.max(1) as usize;
        record.resize(want, 0);
        let mut filled = 0;
        while filled < want {
            let n = self.input.read(&mut record[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        record.truncate(filled);
        self.bytes_read += filled as u64;

        if self.conversion.translates() {
            for b in record.iter_mut() {
                *b = self.tables.to_archive(*b);
            }
        }
        Ok(filled > 0)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn variable(lrecl: u32) -> RecordLayout {
        RecordLayout {
            format: RecordFormat::Variable,
            record_length: lrecl,
        }
    }

    fn fixed(lrecl: u32) -> RecordLayout {
        RecordLayout {
            format: RecordFormat::Fixed,
            record_length: lrecl,
        }
    }

    fn records<R: BufRead>(mut source: RecordSource<'_, R>) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut record = Vec::new();
        while source.next_record(&mut record).unwrap() {
            out.push(record.clone());
        }
        out
    }

    #[test]
    fn test_sniff() {
        assert_eq!(DataType::sniff(b"hello\r\n\tworld\n"), DataType::Text);
        assert_eq!(DataType::sniff(b"PK\x03\x04"), DataType::Binary);
        assert_eq!(DataType::sniff(b""), DataType::Text);
    }

    #[test]
    fn test_text_lines_become_records() {
        let tables = TranslationTables::default();
        let source = RecordSource::new(
            Cursor::new(b"AB\r\n\nC".to_vec()),
            variable(80),
            Conversion::Text,
            &tables,
        );
        assert_eq!(
            records(source),
            vec![vec![0xC1, 0xC2], vec![0x40], vec![0xC3]]
        );
    }

    #[test]
    fn test_text_line_too_long() {
        let tables = TranslationTables::default();
        let mut source = RecordSource::new(
            Cursor::new(b"ABCDE\n".to_vec()),
            variable(4),
            Conversion::Text,
            &tables,
        );
        let mut record = Vec::new();
        assert!(matches!(
            source.next_record(&mut record),
            Err(CodecError::RecordTooLong { length: 5, limit: 4 })
        ));
    }

    #[test]
    fn test_fixed_text_is_padded() {
        let tables = TranslationTables::default();
        let source = RecordSource::new(
            Cursor::new(b"A\nBC\n".to_vec()),
            fixed(3),
            Conversion::Text,
            &tables,
        );
        assert_eq!(
            records(source),
            vec![vec![0xC1, 0x40, 0x40], vec![0xC2, 0xC3, 0x40]]
        );
    }

    #[test]
    fn test_binary_chunks() {
        let tables = TranslationTables::default();
        let mut source = RecordSource::new(
            Cursor::new((0u8..10).collect::<Vec<_>>()),
            fixed(4),
            Conversion::Binary,
            &tables,
        );
        let mut record = Vec::new();
        let mut chunks = Vec::new();
        while source.next_record(&mut record).unwrap() {
            chunks.push(record.clone());
        }
        assert_eq!(chunks, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]]);
        assert_eq!(source.bytes_read(), 10);
        assert_eq!(source.longest_record(), 4);
    }

    #[test]
    fn test_sink_variable_text() {
        let tables = TranslationTables::default();
        let mut sink = RecordSink::new(Some(Vec::new()), variable(10), Conversion::Text, &tables);
        for symbol in [0xC1 + 1, END_OF_RECORD, 0xC2 + 1, END_OF_RECORD] {
            assert_eq!(sink.put(symbol).unwrap(), Flow::Continue);
        }
        assert_eq!(sink.put(END_OF_RECORD).unwrap(), Flow::Finished);
        let (stats, out) = sink.finish(9).unwrap();
        assert_eq!(out.unwrap(), b"A\nB\n".to_vec());
        assert_eq!(stats.records, 2);
        assert_eq!(stats.data_bytes, 2);
        assert_eq!(stats.produced, 4);
        assert_eq!(stats.consumed, 9);
        assert_eq!(stats.extracted_size(LineEnding::Lf), 4);
    }

    #[test]
    fn test_sink_fixed_counts_records() {
        let tables = TranslationTables::default();
        let mut sink = RecordSink::new(Some(Vec::new()), fixed(2), Conversion::Text, &tables)
            .with_line_ending(LineEnding::CrLf);
        for b in [0xC1u16, 0xC2, 0xC3] {
            sink.put(b + 1).unwrap();
        }
        assert_eq!(sink.put(END_OF_RECORD).unwrap(), Flow::Finished);
        let (stats, out) = sink.finish(0).unwrap();
        assert_eq!(out.unwrap(), b"AB\r\nC\r\n".to_vec());
        assert_eq!(stats.records, 2);
    }

    #[test]
    fn test_sink_binary_classification() {
        let tables = TranslationTables::default();
        let mut sink = RecordSink::new(None::<Vec<u8>>, variable(10), Conversion::Binary, &tables);
        sink.put(0x01 + 1).unwrap();
        let (stats, _) = sink.finish(0).unwrap();
        assert_eq!(stats.data_type, DataType::Binary);
    }

    #[test]
    fn test_sink_overflow() {
        let tables = TranslationTables::default();
        let mut sink = RecordSink::new(Some(Vec::new()), variable(1), Conversion::Binary, &tables);
        for _ in 0..5 {
            sink.put(0x41).unwrap();
        }
        assert!(matches!(
            sink.put(0x41),
            Err(CodecError::OutputOverflow { length: 6, limit: 5 })
        ));
    }

    #[test]
    fn test_sink_rejects_large_symbol() {
        let tables = TranslationTables::default();
        let mut sink = RecordSink::new(None::<Vec<u8>>, variable(10), Conversion::Binary, &tables);
        assert!(matches!(sink.put(MAX_SYMBOL + 1), Err(CodecError::BadData(_))));
    }
}
