//! Format layer for VMARC archives
//!
#![allow(clippy::cast_possible_truncation)] // Code and byte packing
#![allow(clippy::cast_lossless)] // Sometimes clearer than From
#![allow(clippy::doc_markdown)] // VMARC, EBCDIC and CMS terms
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
#![allow(clippy::similar_names)] // left/right, pred/prev in the tables
#![allow(clippy::use_self)] // Type clarity
#![allow(clippy::return_self_not_must_use)] // Builder patterns
//! VMARC is the archive format used by VM/CMS systems. An archive is a
//! sequence of subfiles, each a header followed by a payload, padded out
//! to 80-byte cards.
//!
//! This crate handles everything below the archive level:
//!
//! - **charmap**: host/archive character translation, built in or from UCM files
//! - **header**: subfile header parsing, building and resilient scanning
//! - **stream**: pushback byte reader and 12-bit code packing
//! - **codec**: ASIS, LZW and S2 payload codecs over a shared record model
//!
//! # Example
//!
//! ```
//! use std::io::Cursor;
//! use vmarc_formats::charmap::TranslationTables;
//! use vmarc_formats::codec::{self, Conversion, RecordLayout, RecordSink, RecordSource};
//! use vmarc_formats::header::{Method, RecordFormat};
//! use vmarc_formats::stream::PushbackReader;
//!
//! let tables = TranslationTables::default();
//! let layout = RecordLayout { format: RecordFormat::Variable, record_length: 80 };
//!
//! let mut source = RecordSource::new(Cursor::new(&b"hello\n"[..]), layout, Conversion::Text, &tables);
//! let mut payload = Vec::new();
//! codec::encode(Method::Lzw, &mut source, &mut payload).unwrap();
//!
//! let mut input = PushbackReader::new(Cursor::new(payload));
//! let mut sink = RecordSink::new(Some(Vec::new()), layout, Conversion::Text, &tables)
//!     .with_line_ending(codec::LineEnding::Lf);
//! codec::decode(Method::Lzw, &mut input, &mut sink).unwrap();
//! let (_, out) = sink.finish(input.consumed()).unwrap();
//! assert_eq!(out.unwrap(), b"hello\n");
//! ```

#![warn(missing_docs)]

pub mod charmap;
pub mod codec;
pub mod header;
pub mod stream;

pub use charmap::TranslationTables;
pub use codec::{CodecError, CodecResult, Conversion, DataType, LineEnding};
pub use header::{HeaderError, HeaderResult, Method, RecordFormat, SubfileHeader};
pub use stream::PushbackReader;
