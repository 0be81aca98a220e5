//! VMARC archive access
//!
#![allow(clippy::doc_markdown)] // VMARC, CMS and EBCDIC terms
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
#![allow(clippy::missing_errors_doc)] // Every operation returns ArchiveError
#![allow(clippy::must_use_candidate)] // Accessors
//! An [`Archive`] is a handle on one archive file. Opening scans every
//! subfile; edits, additions and deletions are held in memory and in a
//! staging file until [`Archive::commit`] writes a merged archive and
//! renames it over the original.
//!
//! Every error maps onto the legacy numeric status table through
//! [`ArchiveError::status`], and [`strerror`] gives the matching message.
//!
//! # Example
//!
//! ```no_run
//! use vmarc_archive::{Archive, TransferMode};
//!
//! # fn main() -> vmarc_archive::ArchiveResult<()> {
//! let mut archive = Archive::open("sources.vmarc")?;
//! archive.set_transfer_mode(TransferMode::Text);
//!
//! let id = archive.create_subfile();
//! {
//!     let mut editor = archive.edit(id)?;
//!     editor.set_file_id(Some("PROFILE"), Some("EXEC"), Some("A1"))?;
//!     editor.set_record_format('V')?;
//! }
//! archive.add_to(id, "profile.exec")?;
//! archive.commit()?;
//!
//! for (id, subfile) in archive.subfiles() {
//!     println!("{id} {} {} bytes", subfile.file_id(), subfile.uncompressed);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod archive;
mod commit;
pub mod config;
pub mod error;
pub mod registry;
mod staging;
pub mod subfile;

pub use archive::{Archive, CommitOutcome, SubfileEditor};
pub use config::{ArchiveOptions, CharmapPaths, TransferMode};
pub use error::{ArchiveError, ArchiveResult, StatusCode, status_of, strerror};
pub use registry::SubfileId;
pub use subfile::{Subfile, Timestamp, is_valid_mode, is_valid_name};

pub use vmarc_formats::{DataType, LineEnding, Method, RecordFormat};
