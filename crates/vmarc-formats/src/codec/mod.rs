//! Subfile payload codecs
//!
//! Three methods share one record model:
//!
//! - **ASIS**: length-prefixed uncompressed records
//! - **LZW**: 12-bit dictionary codes with least-recently-used reuse
//! - **S2**: string-doubling codes (decode only; encoding falls back to LZW)
//!
//! Decoders feed symbols into a [`RecordSink`] and encoders read records from
//! a [`RecordSource`], so conversion, line endings and record limits live in
//! one place.

pub mod asis;
pub mod error;
pub mod lzw;
pub mod record;
pub mod s2;

use std::io::{BufRead, Write};

use tracing::{debug, warn};

use crate::header::Method;
use crate::stream::PushbackReader;

pub use error::{CodecError, CodecResult};
pub use record::{
    Conversion, DataType, DecodeStats, END_OF_RECORD, EncodeStats, Flow, LineEnding, MAX_SYMBOL,
    RecordLayout, RecordSink, RecordSource, SNIFF_LEN,
};

/// Decode one payload compressed with `method` into `sink`
///
/// Reading stops at the payload's end marker, so `input` is left positioned
/// at whatever follows it.
pub fn decode<R: BufRead, W: Write>(
    method: Method,
    input: &mut PushbackReader<R>,
    sink: &mut RecordSink<'_, W>,
) -> CodecResult<()> {
    match method {
        Method::Asis => asis::decode(input, sink),
        Method::Lzw => lzw::decode(input, sink),
        Method::S2 => s2::decode(input, sink),
    }
}

/// Encode every record of `source` into `out` using `method`
///
/// S2 has no encoder; such requests are written as LZW and the returned
/// stats say so.
pub fn encode<R: BufRead, W: Write>(
    method: Method,
    source: &mut RecordSource<'_, R>,
    out: &mut W,
) -> CodecResult<EncodeStats> {
    let used = match method {
        Method::S2 => {
            warn!("S2 compression unavailable, using LZW");
            Method::Lzw
        }
        other => other,
    };

    let written = match used {
        Method::Asis => asis::encode(source, out)?,
        Method::Lzw | Method::S2 => lzw::encode(source, out)?,
    };

    let stats = EncodeStats {
        bytes_read: source.bytes_read(),
        written,
        longest_record: source.longest_record(),
        method: used,
    };
    debug!(
        method = %used,
        bytes_read = stats.bytes_read,
        written = stats.written,
        "encoded payload"
    );
    Ok(stats)
}
