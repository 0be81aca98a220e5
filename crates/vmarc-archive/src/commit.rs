//! Merge rewrite of an archive
//!
//! A commit never touches the committed archive in place. Every surviving
//! subfile is written, freshly headed, into `<archive>.merged.XXXXXX`
//! beside it and padded to the 80-byte card boundary. Only once that file
//! is complete is the original removed and the merged file renamed over
//! it. If the rename fails the merged file stays where it is.

use std::fs;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::{Builder, NamedTempFile};
use tracing::{debug, warn};
use vmarc_formats::charmap::TranslationTables;
use vmarc_formats::codec::{self, Conversion, RecordSource};
use vmarc_formats::header::CARD_SIZE;

use crate::error::{ArchiveError, ArchiveResult};
use crate::staging::sibling_prefix;
use crate::subfile::Entry;

/// Moves a finished file into place
pub(crate) type RenameFn = fn(&Path, &Path) -> io::Result<()>;

/// Where each subfile's payload ended up in the merged file
#[derive(Debug, Clone, Copy)]
pub(crate) struct Placement {
    pub(crate) data_offset: u64,
    pub(crate) compressed: u64,
}

/// A fully written merged archive that has not been moved into place
#[derive(Debug)]
pub(crate) struct MergedArchive {
    pub(crate) file: NamedTempFile,
    pub(crate) placements: Vec<Placement>,
    pub(crate) bytes: u64,
}

/// Byte counting writer
struct Counted<W> {
    inner: W,
    written: u64,
}

impl<W: Write> Write for Counted<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn pad_to_card<W: Write>(out: &mut Counted<W>) -> io::Result<()> {
    let rem = out.written % CARD_SIZE;
    if rem != 0 {
        let fill = [0u8; CARD_SIZE as usize];
        out.write_all(&fill[..(CARD_SIZE - rem) as usize])?;
    }
    Ok(())
}

/// Write every entry, in order, into a new file beside `archive`
///
/// `open` supplies a reader positioned at an entry's payload. Entries that
/// never received data get an empty payload in their own method.
pub(crate) fn write_merged<'e, I, F, R>(archive: &Path, entries: I, mut open: F) -> ArchiveResult<MergedArchive>
where
    I: IntoIterator<Item = &'e Entry>,
    F: FnMut(&Entry) -> ArchiveResult<R>,
    R: BufRead,
{
    let (dir, prefix) = sibling_prefix(archive, ".merged.");
    let file = Builder::new()
        .prefix(&prefix)
        .rand_bytes(6)
        .tempfile_in(&dir)
        .map_err(|source| ArchiveError::OpenTemp { dir, source })?;

    if let Ok(meta) = fs::metadata(archive)
        && let Err(err) = fs::set_permissions(file.path(), meta.permissions())
    {
        debug!("could not copy archive permissions: {err}");
    }

    let mut out = Counted {
        inner: BufWriter::new(file.as_file()),
        written: 0,
    };
    let mut placements = Vec::new();
    let tables = TranslationTables::default();

    for entry in entries {
        let header = entry.header().to_bytes()?;
        out.write_all(&header).map_err(ArchiveError::Write)?;
        let data_offset = out.written;

        if entry.populated {
            let mut payload = open(entry)?.take(entry.subfile.compressed);
            let copied = io::copy(&mut payload, &mut out)?;
            if copied != entry.subfile.compressed {
                return Err(ArchiveError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("payload of {} ends early", entry.subfile.file_id()),
                )));
            }
        } else {
            let mut empty = RecordSource::new(io::empty(), entry.subfile.layout(), Conversion::Binary, &tables);
            codec::encode(entry.subfile.method, &mut empty, &mut out)?;
        }

        placements.push(Placement {
            data_offset,
            compressed: out.written - data_offset,
        });
        pad_to_card(&mut out).map_err(ArchiveError::Write)?;
    }

    out.flush().map_err(ArchiveError::Write)?;
    let bytes = out.written;
    drop(out);
    file.as_file().sync_all().map_err(ArchiveError::Write)?;

    Ok(MergedArchive {
        file,
        placements,
        bytes,
    })
}

/// Detach the merged file so it outlives the handle that created it
pub(crate) fn persist(merged: NamedTempFile) -> ArchiveResult<PathBuf> {
    merged
        .into_temp_path()
        .keep()
        .map_err(|err| ArchiveError::Write(err.error))
}

/// Replace `archive` with the merged file at `merged`
///
/// Returns the path the archive now lives at. A failed rename is reported
/// as [`ArchiveError::RenameRequired`] with the merged file left in place.
pub(crate) fn replace(merged: PathBuf, archive: &Path, rename: RenameFn) -> ArchiveResult<PathBuf> {
    match fs::remove_file(archive) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!("could not remove {}: {err}", archive.display()),
    }

    match rename(&merged, archive) {
        Ok(()) => Ok(archive.to_path_buf()),
        Err(source) => {
            warn!(
                "rename of {} to {} failed, archive kept under the merged name",
                merged.display(),
                archive.display()
            );
            Err(ArchiveError::RenameRequired {
                path: merged,
                source,
            })
        }
    }
}
