//! Staging file for payloads added since the last commit
//!
//! Created on first use beside the archive as `<archive>.XXXXXX` with
//! exclusive-create semantics. Payloads are appended without headers; the
//! file is removed when the staging area is dropped.

use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, SeekFrom};
use std::path::Path;

use tempfile::{Builder, NamedTempFile};
use tracing::debug;

use crate::error::{ArchiveError, ArchiveResult};

#[derive(Debug)]
pub(crate) struct Staging {
    file: NamedTempFile,
}

/// Directory and file name prefix for temp files beside `archive`
pub(crate) fn sibling_prefix(archive: &Path, suffix: &str) -> (std::path::PathBuf, String) {
    let dir = archive
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| Path::new(".").to_path_buf(), Path::to_path_buf);
    let name = archive
        .file_name()
        .map_or_else(|| "archive".to_string(), |n| n.to_string_lossy().into_owned());
    (dir, format!("{name}{suffix}"))
}

impl Staging {
    pub(crate) fn create(archive: &Path) -> ArchiveResult<Self> {
        let (dir, prefix) = sibling_prefix(archive, ".");
        let file = Builder::new()
            .prefix(&prefix)
            .rand_bytes(6)
            .tempfile_in(&dir)
            .map_err(|source| ArchiveError::OpenTemp { dir, source })?;
        debug!("created staging file {}", file.path().display());
        Ok(Self { file })
    }

    pub(crate) fn path(&self) -> &Path {
        self.file.path()
    }

    /// Writer positioned at the end, with the offset it starts at
    pub(crate) fn append(&mut self) -> ArchiveResult<(u64, BufWriter<&mut File>)> {
        let file = self.file.as_file_mut();
        let offset = file.seek(SeekFrom::End(0)).map_err(ArchiveError::Seek)?;
        Ok((offset, BufWriter::new(file)))
    }

    /// Independent reader positioned at `offset`
    pub(crate) fn reader_at(&self, offset: u64) -> ArchiveResult<BufReader<File>> {
        let mut file = self.file.reopen()?;
        file.seek(SeekFrom::Start(offset)).map_err(ArchiveError::Seek)?;
        Ok(BufReader::new(file))
    }
}
