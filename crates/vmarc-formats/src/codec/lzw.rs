//! 12-bit LZW with reference-counted slot reuse
//!
//! The string table holds 4096 entries. Entries 0-256 are the single
//! coded symbols and are never replaced; the rest are recycled in a
//! circular sweep that picks the next entry no other entry extends.
//! Encoder and decoder run the same sweep, so their tables stay in step
//! as long as both see the same code sequence.

use std::io::{BufRead, Write};

use tracing::trace;

use super::error::{CodecError, CodecResult};
use super::record::{END_OF_RECORD, Flow, MAX_SYMBOL, RecordSink, RecordSource};
use crate::header::RecordFormat;
use crate::stream::{CodeReader, CodeWriter, PushbackReader};

/// Entries in the string table
pub const TABLE_SIZE: usize = 4096;

/// Buckets in the (predecessor, symbol) hash
const HASH_SIZE: u64 = 5003;

/// First entry that may be recycled
const FIRST_REUSABLE: usize = MAX_SYMBOL as usize + 1;

/// Last usable entry
const LAST_SLOT: usize = TABLE_SIZE - 1;

/// Predecessor of a single-symbol string
const ROOT: u16 = u16::MAX - 1;

/// Predecessor of an entry that has never been assigned
const UNSET: u16 = u16::MAX;

/// End of a hash chain
const NIL: u16 = u16::MAX;

#[derive(Debug, Clone, Copy)]
struct Entry {
    pred: u16,
    symbol: u16,
    refs: u16,
    next: u16,
    prev: u16,
    linked: bool,
}

impl Entry {
    const EMPTY: Self = Self {
        pred: UNSET,
        symbol: 0,
        refs: 0,
        next: NIL,
        prev: NIL,
        linked: false,
    };
}

/// LZW string table shared by the encoder and decoder
#[derive(Debug)]
pub struct LzwTable {
    entries: Vec<Entry>,
    buckets: Vec<u16>,
    cursor: usize,
    chain: Vec<u16>,
    symbols: Vec<u16>,
}

impl Default for LzwTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LzwTable {
    /// Table holding only the single-symbol strings
    pub fn new() -> Self {
        let mut table = Self {
            entries: vec![Entry::EMPTY; TABLE_SIZE],
            buckets: vec![NIL; HASH_SIZE as usize],
            cursor: 0,
            chain: Vec::with_capacity(TABLE_SIZE),
            symbols: Vec::with_capacity(TABLE_SIZE),
        };
        table.reset();
        table
    }

    /// Drop every learned string
    pub fn reset(&mut self) {
        self.entries.fill(Entry::EMPTY);
        self.buckets.fill(NIL);
        for symbol in 0..=MAX_SYMBOL {
            let slot = usize::from(symbol);
            self.entries[slot] = Entry {
                pred: ROOT,
                symbol,
                refs: 1,
                ..Entry::EMPTY
            };
            self.link(slot);
        }
        self.cursor = FIRST_REUSABLE - 1;
    }

    fn bucket(pred: u16, symbol: u16) -> usize {
        let key = u64::from((u32::from(pred) << 9) ^ u32::from(symbol));
        ((key * key) % HASH_SIZE) as usize
    }

    fn link(&mut self, slot: usize) {
        let entry = self.entries[slot];
        let bucket = Self::bucket(entry.pred, entry.symbol);
        let head = self.buckets[bucket];
        if head != NIL {
            self.entries[usize::from(head)].prev = slot as u16;
        }
        let entry = &mut self.entries[slot];
        entry.next = head;
        entry.prev = NIL;
        entry.linked = true;
        self.buckets[bucket] = slot as u16;
    }

    fn unlink(&mut self, slot: usize) {
        let entry = self.entries[slot];
        if !entry.linked {
            return;
        }
        if entry.prev == NIL {
            self.buckets[Self::bucket(entry.pred, entry.symbol)] = entry.next;
        } else {
            self.entries[usize::from(entry.prev)].next = entry.next;
        }
        if entry.next != NIL {
            self.entries[usize::from(entry.next)].prev = entry.prev;
        }
        let entry = &mut self.entries[slot];
        entry.next = NIL;
        entry.prev = NIL;
        entry.linked = false;
    }

    /// Entry for `pred` extended by `symbol`
    pub fn find(&self, pred: u16, symbol: u16) -> Option<u16> {
        let mut at = self.buckets[Self::bucket(pred, symbol)];
        while at != NIL {
            let entry = &self.entries[usize::from(at)];
            if entry.pred == pred && entry.symbol == symbol {
                return Some(at);
            }
            at = entry.next;
        }
        None
    }

    /// Next recyclable entry after the cursor, sweeping the table at most once past its end
    fn claim_slot(&self) -> Option<usize> {
        let mut slot = self.cursor;
        let mut wrapped = false;
        loop {
            slot += 1;
            if slot > LAST_SLOT {
                if wrapped {
                    return None;
                }
                wrapped = true;
                slot = FIRST_REUSABLE;
            }
            if self.entries[slot].refs == 0 {
                return Some(slot);
            }
        }
    }

    /// Detach a recycled entry from the string it used to extend
    fn release(&mut self, slot: usize) {
        let old = self.entries[slot].pred;
        if usize::from(old) < TABLE_SIZE {
            let refs = &mut self.entries[usize::from(old)].refs;
            *refs = refs.saturating_sub(1);
        }
        self.unlink(slot);
    }

    /// Reserve an entry that will extend `pred`
    ///
    /// Returns `None` when every entry is in use, in which case nothing
    /// changes.
    fn extend(&mut self, pred: u16) -> Option<usize> {
        self.entries[usize::from(pred)].refs += 1;
        let Some(slot) = self.claim_slot() else {
            self.entries[usize::from(pred)].refs -= 1;
            trace!("LZW table saturated, skipping entry");
            return None;
        };
        self.release(slot);
        self.entries[slot].pred = pred;
        self.cursor = slot;
        Some(slot)
    }

    /// Learn `pred` + `symbol`; returns false if the table had no room
    pub fn insert(&mut self, pred: u16, symbol: u16) -> bool {
        let Some(slot) = self.extend(pred) else {
            return false;
        };
        let entry = &mut self.entries[slot];
        entry.symbol = symbol;
        entry.refs = 0;
        self.link(slot);
        true
    }

    /// Symbols of the string for `code`, first to last
    ///
    /// `pending` is the entry still waiting for its final symbol, which is
    /// the first symbol of this string.
    fn expand(&mut self, code: u16, pending: Option<usize>) -> CodecResult<&[u16]> {
        self.chain.clear();
        let mut at = code;
        while at != ROOT {
            let entry = self
                .entries
                .get(usize::from(at))
                .ok_or(CodecError::BadData("LZW code chain out of range"))?;
            if entry.pred == UNSET {
                return Err(CodecError::BadData("LZW code refers to an unused entry"));
            }
            if self.chain.len() >= TABLE_SIZE {
                return Err(CodecError::BadData("LZW code chain loops"));
            }
            self.chain.push(at);
            at = entry.pred;
        }

        let first = self
            .chain
            .last()
            .map(|&root| self.entries[usize::from(root)].symbol)
            .ok_or(CodecError::BadData("empty LZW string"))?;
        if let Some(slot) = pending {
            self.entries[slot].symbol = first;
        }

        self.symbols.clear();
        self.symbols.extend(
            self.chain
                .iter()
                .rev()
                .map(|&at| self.entries[usize::from(at)].symbol),
        );
        Ok(&self.symbols)
    }
}

/// Decode an LZW payload into `sink`
pub fn decode<R: BufRead, W: Write>(
    input: &mut PushbackReader<R>,
    sink: &mut RecordSink<'_, W>,
) -> CodecResult<()> {
    let mut table = LzwTable::new();
    let mut codes = CodeReader::new(input);

    // The first code completes a placeholder entry that is recycled at once
    let mut pending = Some(FIRST_REUSABLE);
    table.entries[FIRST_REUSABLE].pred = ROOT;

    loop {
        if sink.scan_satisfied(codes.consumed()) {
            return Ok(());
        }
        let Some(code) = codes.read_code()? else {
            return if sink.at_record_boundary() {
                Ok(())
            } else {
                Err(CodecError::Truncated)
            };
        };

        for &symbol in table.expand(code, pending)? {
            if sink.put(symbol)? == Flow::Finished {
                return Ok(());
            }
        }
        pending = table.extend(code);
    }
}

struct Encoder<W> {
    table: LzwTable,
    codes: CodeWriter<W>,
    prefix: Option<u16>,
    last_symbol: Option<u16>,
}

impl<W: Write> Encoder<W> {
    fn push(&mut self, symbol: u16) -> std::io::Result<()> {
        self.last_symbol = Some(symbol);
        let Some(prefix) = self.prefix else {
            self.prefix = Some(symbol);
            return Ok(());
        };
        if let Some(longer) = self.table.find(prefix, symbol) {
            self.prefix = Some(longer);
        } else {
            self.table.insert(prefix, symbol);
            self.codes.write_code(prefix)?;
            self.prefix = Some(symbol);
        }
        Ok(())
    }
}

/// Compress every record of `source` into `out`, returning the bytes written
///
/// Variable-format streams always end with two end-of-record codes so the
/// decoder stops without reading past the payload.
pub fn encode<R: BufRead, W: Write>(
    source: &mut RecordSource<'_, R>,
    out: &mut W,
) -> CodecResult<u64> {
    let variable = source.layout().format == RecordFormat::Variable;
    let mut encoder = Encoder {
        table: LzwTable::new(),
        codes: CodeWriter::new(out),
        prefix: None,
        last_symbol: None,
    };

    let mut record = Vec::new();
    while source.next_record(&mut record)? {
        for &byte in &record {
            encoder.push(u16::from(byte) + 1)?;
        }
        if variable {
            encoder.push(END_OF_RECORD)?;
        }
    }

    if let Some(prefix) = encoder.prefix {
        encoder.codes.write_code(prefix)?;
    }
    encoder.codes.write_code(END_OF_RECORD)?;
    if variable && encoder.last_symbol != Some(END_OF_RECORD) {
        encoder.codes.write_code(END_OF_RECORD)?;
    }
    Ok(encoder.codes.finish()?)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::charmap::TranslationTables;
    use crate::codec::record::{Conversion, RecordLayout};
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn layout(format: RecordFormat, record_length: u32) -> RecordLayout {
        RecordLayout {
            format,
            record_length,
        }
    }

    fn compress(data: &[u8], layout: RecordLayout, conversion: Conversion) -> Vec<u8> {
        let tables = TranslationTables::default();
        let mut source = RecordSource::new(Cursor::new(data.to_vec()), layout, conversion, &tables);
        let mut out = Vec::new();
        let written = encode(&mut source, &mut out).unwrap();
        assert_eq!(written, out.len() as u64);
        out
    }

    fn expand(payload: &[u8], layout: RecordLayout, conversion: Conversion) -> (Vec<u8>, u64) {
        let tables = TranslationTables::default();
        let mut input = PushbackReader::new(Cursor::new(payload.to_vec()));
        let mut sink = RecordSink::new(Some(Vec::new()), layout, conversion, &tables)
            .with_line_ending(crate::codec::LineEnding::Lf);
        decode(&mut input, &mut sink).unwrap();
        let (stats, out) = sink.finish(input.consumed()).unwrap();
        (out.unwrap(), stats.consumed)
    }

    #[test]
    fn test_base_entries() {
        let table = LzwTable::new();
        assert_eq!(table.find(ROOT, 0), Some(0));
        assert_eq!(table.find(ROOT, 0x42), Some(0x42));
        assert_eq!(table.find(ROOT, MAX_SYMBOL), Some(MAX_SYMBOL));
        assert_eq!(table.find(0x42, 0x43), None);
    }

    #[test]
    fn test_insert_and_find() {
        let mut table = LzwTable::new();
        assert!(table.insert(0x42, 0x43));
        assert_eq!(table.find(0x42, 0x43), Some(FIRST_REUSABLE as u16));
        assert!(table.insert(FIRST_REUSABLE as u16, 0x44));
        assert_eq!(table.find(FIRST_REUSABLE as u16, 0x44), Some(FIRST_REUSABLE as u16 + 1));
    }

    #[test]
    fn test_saturated_table_skips_insert() {
        let mut table = LzwTable::new();
        // one long chain: every entry extends the one before it
        let mut pred = 0x42u16;
        for _ in FIRST_REUSABLE..=LAST_SLOT {
            assert!(table.insert(pred, 0x42));
            pred = table.find(pred, 0x42).unwrap();
        }
        assert!(!table.insert(pred, 0x43));
        assert_eq!(table.find(pred, 0x43), None);
    }

    #[test]
    fn test_known_stream() {
        // "AAA" as one binary record: codes A, AA, EOR, EOR
        let payload = compress(
            b"AAA",
            layout(RecordFormat::Variable, 80),
            Conversion::Binary,
        );
        assert_eq!(payload, vec![0x04, 0x21, 0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_round_trip_binary() {
        let data: Vec<u8> = (0..20_000u32).map(|i| (i * 7 % 251) as u8).collect();
        let layout = layout(RecordFormat::Variable, 4096);
        let payload = compress(&data, layout, Conversion::Binary);
        let (out, consumed) = expand(&payload, layout, Conversion::Binary);
        assert_eq!(out, data);
        assert_eq!(consumed, payload.len() as u64);
    }

    #[test]
    fn test_round_trip_text() {
        let mut text = String::new();
        for i in 0..3000 {
            text.push_str(&format!("line {i} of the sample member, repeated words words words\n"));
        }
        let layout = layout(RecordFormat::Variable, 255);
        let payload = compress(text.as_bytes(), layout, Conversion::Text);
        assert!(payload.len() < text.len());
        let (out, consumed) = expand(&payload, layout, Conversion::Text);
        assert_eq!(String::from_utf8(out).unwrap(), text);
        assert_eq!(consumed, payload.len() as u64);
    }

    #[test]
    fn test_round_trip_fixed() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 13) as u8).collect();
        let layout = layout(RecordFormat::Fixed, 80);
        let payload = compress(&data, layout, Conversion::Binary);
        let (out, _) = expand(&payload, layout, Conversion::Binary);
        assert_eq!(out, data);
    }

    #[test]
    fn test_empty_input() {
        let layout = layout(RecordFormat::Variable, 80);
        let payload = compress(b"", layout, Conversion::Binary);
        let (out, consumed) = expand(&payload, layout, Conversion::Binary);
        assert!(out.is_empty());
        assert_eq!(consumed, payload.len() as u64);
    }

    #[test]
    fn test_unused_code_is_bad_data() {
        let tables = TranslationTables::default();
        // code 0x500 has never been assigned
        let mut input = PushbackReader::new(Cursor::new(vec![0x50, 0x00]));
        let mut sink = RecordSink::new(
            None::<Vec<u8>>,
            layout(RecordFormat::Variable, 80),
            Conversion::Binary,
            &tables,
        );
        assert!(matches!(
            decode(&mut input, &mut sink),
            Err(CodecError::BadData(_))
        ));
    }

    #[test]
    fn test_truncated_stream() {
        let tables = TranslationTables::default();
        let mut input = PushbackReader::new(Cursor::new(vec![0x04, 0x20]));
        let mut sink = RecordSink::new(
            None::<Vec<u8>>,
            layout(RecordFormat::Variable, 80),
            Conversion::Binary,
            &tables,
        );
        assert!(matches!(decode(&mut input, &mut sink), Err(CodecError::Truncated)));
    }
}
