//! ASIS: records stored uncompressed behind a 2-byte big-endian length
//!
//! A zero length ends the subfile. Decoding always closes with an
//! end-of-record, so an empty variable-format subfile yields one empty
//! record, as LZW does.

use std::io::{BufRead, Write};

use super::error::{CodecError, CodecResult};
use super::record::{END_OF_RECORD, Flow, RecordSink, RecordSource};
use crate::header::RecordFormat;
use crate::stream::PushbackReader;

/// Decode frames from `input` into `sink`
pub fn decode<R: BufRead, W: Write>(
    input: &mut PushbackReader<R>,
    sink: &mut RecordSink<'_, W>,
) -> CodecResult<()> {
    let variable = sink.layout().format == RecordFormat::Variable;

    loop {
        if sink.scan_satisfied(input.consumed()) {
            return Ok(());
        }
        let Some(high) = input.get()? else {
            break;
        };
        let low = input.get()?.ok_or(CodecError::Truncated)?;
        let length = u16::from_be_bytes([high, low]);
        if length == 0 {
            break;
        }

        for _ in 0..length {
            let byte = input.get()?.ok_or(CodecError::Truncated)?;
            if sink.put(u16::from(byte) + 1)? == Flow::Finished {
                return Ok(());
            }
        }
        if variable && sink.put(END_OF_RECORD)? == Flow::Finished {
            return Ok(());
        }
    }

    sink.put(END_OF_RECORD)?;
    Ok(())
}

/// Frame every record of `source` into `out`, returning the bytes written
///
/// The 2-byte frame length caps records at 65535 bytes; a longer record
/// (only possible with an extended record length) fails with
/// [`CodecError::RecordTooLong`] and is never split across frames.
pub fn encode<R: BufRead, W: Write>(
    source: &mut RecordSource<'_, R>,
    out: &mut W,
) -> CodecResult<u64> {
    let mut record = Vec::new();
    let mut written = 0u64;

    while source.next_record(&mut record)? {
        let length = u16::try_from(record.len()).map_err(|_| CodecError::RecordTooLong {
            length: record.len(),
            limit: u32::from(u16::MAX),
        })?;
        out.write_all(&length.to_be_bytes())?;
        out.write_all(&record)?;
        written += 2 + record.len() as u64;
    }

    out.write_all(&[0, 0])?;
    Ok(written + 2)
}
