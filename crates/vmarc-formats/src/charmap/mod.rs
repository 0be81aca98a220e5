//! Character conversion between the host encoding and the archive encoding
//!
//! Archives are written in an EBCDIC code page. A [`TranslationTables`]
//! pair holds two 256-entry byte tables:
//!
//! - `to_host`: archive byte to host byte, used when extracting
//! - `to_archive`: host byte to archive byte, used when adding
//!
//! The built-in tables convert between IBM-1047 and ISO-8859-1. Custom
//! tables are derived from two UCM character maps by joining them on
//! Unicode scalar value.
//!
//! # Example
//!
//! ```
//! use vmarc_formats::charmap::TranslationTables;
//!
//! let tables = TranslationTables::default();
//! assert_eq!(tables.to_archive(b'A'), 0xC1);
//! assert_eq!(tables.to_host(0xC1), b'A');
//! ```

mod error;
pub mod tables;
mod ucm;

pub use error::{CharmapError, CharmapResult};
pub use ucm::{CharacterMap, DEFAULT_SUBCHAR};

use std::path::Path;

/// Forward and reverse byte translation tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationTables {
    to_host: [u8; 256],
    to_archive: [u8; 256],
}

impl Default for TranslationTables {
    fn default() -> Self {
        Self {
            to_host: tables::ARCHIVE_TO_HOST,
            to_archive: tables::HOST_TO_ARCHIVE,
        }
    }
}

impl TranslationTables {
    /// Build tables from an archive-side map (`from`) and a host-side map (`to`)
    ///
    /// Every byte of one map is looked up by scalar value in the other.
    /// Bytes without a counterpart resolve to the substitution byte of the
    /// map being translated into.
    pub fn from_maps(from: &CharacterMap, to: &CharacterMap) -> Self {
        Self {
            to_host: join(from, to),
            to_archive: join(to, from),
        }
    }

    /// Load both character maps and build the tables
    ///
    /// Nothing is returned unless both files parse cleanly.
    pub fn load(from: impl AsRef<Path>, to: impl AsRef<Path>) -> CharmapResult<Self> {
        let from = CharacterMap::load(from)?;
        let to = CharacterMap::load(to)?;
        Ok(Self::from_maps(&from, &to))
    }

    /// Translate an archive byte to the host encoding
    #[inline]
    pub fn to_host(&self, byte: u8) -> u8 {
        self.to_host[usize::from(byte)]
    }

    /// Translate a host byte to the archive encoding
    #[inline]
    pub fn to_archive(&self, byte: u8) -> u8 {
        self.to_archive[usize::from(byte)]
    }

    /// Archive-to-host table
    pub fn host_table(&self) -> &[u8; 256] {
        &self.to_host
    }

    /// Host-to-archive table
    pub fn archive_table(&self) -> &[u8; 256] {
        &self.to_archive
    }
}

fn join(source: &CharacterMap, target: &CharacterMap) -> [u8; 256] {
    let sorted = target.sorted_by_scalar();
    let substitution = target.substitution();
    let mut table = [substitution; 256];

    for (slot, byte) in table.iter_mut().zip(0..=255u8) {
        let Some(scalar) = source.scalar(byte) else {
            continue;
        };
        let at = sorted.partition_point(|&(u, _)| u < scalar);
        if let Some(&(u, mapped)) = sorted.get(at)
            && u == scalar
        {
            *slot = mapped;
        }
    }
    table
}
