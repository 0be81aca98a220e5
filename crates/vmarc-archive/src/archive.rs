//! Archive handle
//!
//! An [`Archive`] owns everything tied to one archive path: translation
//! tables, the subfile registry, the committed file, the staging file and
//! the dirty flag. Nothing is shared between handles.
//!
//! Subfiles are addressed by [`SubfileId`]. The active-subfile cursor is
//! kept for callers that work "on the current subfile": [`Archive::first`],
//! [`Archive::next`] and [`Archive::set_active`] move it, and the
//! `*_active` variants of the operations act on it.

use std::fs::{self, File, FileTimes};
use std::io::{self, BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace, warn};
use vmarc_formats::charmap::TranslationTables;
use vmarc_formats::codec::{
    self, Conversion, DataType, DecodeStats, RecordSink, RecordSource, SNIFF_LEN,
};
use vmarc_formats::header::{self, Method, RecordFormat};
use vmarc_formats::stream::PushbackReader;

use crate::commit::{self, RenameFn};
use crate::config::{ArchiveOptions, TransferMode};
use crate::error::{ArchiveError, ArchiveResult};
use crate::registry::{Registry, SubfileId};
use crate::staging::Staging;
use crate::subfile::{
    Entry, MAX_RECORD_LENGTH, Subfile, Timestamp, check_date, check_time, is_valid_mode,
    is_valid_name, release_for,
};

/// Result of [`Archive::commit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Nothing was pending; no file was touched
    Clean,
    /// A merged archive replaced the old one
    Written {
        /// Subfiles written
        subfiles: usize,
        /// Size of the new archive
        bytes: u64,
    },
}

fn rename_file(from: &Path, to: &Path) -> io::Result<()> {
    fs::rename(from, to)
}

/// Open VMARC archive
#[derive(Debug)]
pub struct Archive {
    path: PathBuf,
    options: ArchiveOptions,
    tables: TranslationTables,
    registry: Registry,
    dirty: bool,
    committed: Option<File>,
    staging: Option<Staging>,
    rename: RenameFn,
}

impl Archive {
    /// Open `path` with default options
    ///
    /// A path that does not exist yet opens as an empty archive.
    pub fn open<P: AsRef<Path>>(path: P) -> ArchiveResult<Self> {
        Self::open_with(path, ArchiveOptions::default())
    }

    /// Open `path`, scanning every subfile header and payload
    pub fn open_with<P: AsRef<Path>>(path: P, options: ArchiveOptions) -> ArchiveResult<Self> {
        let path = path.as_ref().to_path_buf();
        if path.as_os_str().is_empty() {
            return Err(ArchiveError::BadFile);
        }

        let tables = match &options.charmaps {
            Some(maps) => TranslationTables::load(&maps.from, &maps.to)?,
            None => TranslationTables::default(),
        };

        let mut archive = Self {
            path,
            options,
            tables,
            registry: Registry::new(),
            dirty: false,
            committed: None,
            staging: None,
            rename: rename_file,
        };

        match File::open(&archive.path) {
            Ok(file) => archive.load(file)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("{} does not exist, starting empty", archive.path.display());
            }
            Err(source) => {
                return Err(ArchiveError::OpenInput {
                    path: archive.path,
                    source,
                });
            }
        }

        info!(
            "opened {} with {} subfiles",
            archive.path.display(),
            archive.registry.len()
        );
        Ok(archive)
    }

    /// Enumerate subfiles, decoding each payload once to learn its sizes
    fn load(&mut self, file: File) -> ArchiveResult<()> {
        let mut input = PushbackReader::new(BufReader::new(file.try_clone()?));

        while let Some(found) = header::locate_next(&mut input)? {
            let data_offset = input.position();
            let mut entry = Entry::from_header(found, data_offset);

            input.reset_consumed();
            let mut sink = RecordSink::new(
                None::<io::Sink>,
                entry.subfile.layout(),
                Conversion::Text,
                &self.tables,
            );
            codec::decode(entry.subfile.method, &mut input, &mut sink)?;
            let (stats, _) = sink.finish(input.consumed())?;

            entry.subfile.compressed = stats.consumed;
            entry.subfile.data_type = stats.data_type;
            entry.subfile.uncompressed = stats.extracted_size(self.options.line_ending);
            trace!(
                "{} at {data_offset}: {} -> {} bytes",
                entry.subfile.file_id(),
                entry.subfile.compressed,
                entry.subfile.uncompressed
            );
            self.registry.push(entry);
        }

        self.registry.clear_active();
        self.committed = Some(file);
        Ok(())
    }

    /// Release the handle; uncommitted changes are dropped
    pub fn close(self) {
        if self.dirty {
            warn!("closing {} with uncommitted changes", self.path.display());
        }
    }

    /// Path the archive currently lives at
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Options in effect
    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    /// Conversion used by extract and add
    pub fn transfer_mode(&self) -> TransferMode {
        self.options.transfer_mode
    }

    /// Change the conversion used by extract and add
    pub fn set_transfer_mode(&mut self, mode: TransferMode) {
        self.options.transfer_mode = mode;
    }

    /// Active translation tables
    pub fn tables(&self) -> &TranslationTables {
        &self.tables
    }

    /// Load translation tables from two character maps, or restore the
    /// built-in tables when both are `None`
    ///
    /// On failure the current tables stay in place.
    pub fn set_conversion(&mut self, from: Option<&Path>, to: Option<&Path>) -> ArchiveResult<()> {
        self.tables = match (from, to) {
            (None, None) => {
                debug!("using built-in translation tables");
                TranslationTables::default()
            }
            (Some(from), Some(to)) => {
                let tables = TranslationTables::load(from, to)?;
                info!(
                    "loaded translation tables from {} and {}",
                    from.display(),
                    to.display()
                );
                tables
            }
            _ => return Err(ArchiveError::BadArgument("both character maps are required")),
        };
        Ok(())
    }

    /// Number of subfiles
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Whether the archive has no subfiles
    pub fn is_empty(&self) -> bool {
        self.registry.len() == 0
    }

    /// Subfiles in archive order
    pub fn subfiles(&self) -> impl Iterator<Item = (SubfileId, &Subfile)> {
        self.registry.iter().map(|(id, entry)| (id, &entry.subfile))
    }

    /// Subfile `id`
    pub fn subfile(&self, id: SubfileId) -> ArchiveResult<&Subfile> {
        Ok(&self.registry.get(id)?.subfile)
    }

    /// Whether record format, length and method of `id` are frozen
    pub fn is_locked(&self, id: SubfileId) -> ArchiveResult<bool> {
        Ok(self.registry.get(id)?.locked)
    }

    /// Id of the active subfile
    pub fn active_id(&self) -> Option<SubfileId> {
        self.registry.active()
    }

    /// The active subfile
    pub fn active(&self) -> Option<&Subfile> {
        let id = self.registry.active()?;
        self.registry.get(id).ok().map(|entry| &entry.subfile)
    }

    /// Make `id` the active subfile
    pub fn set_active(&mut self, id: SubfileId) -> ArchiveResult<()> {
        self.registry.set_active(id)
    }

    /// Activate the first subfile; `None` for an empty archive
    pub fn first(&mut self) -> Option<SubfileId> {
        self.registry.first()
    }

    /// Activate the subfile after the active one; `None` past the end
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> ArchiveResult<Option<SubfileId>> {
        self.registry.next()
    }

    /// Whether there are uncommitted changes
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Append a new, empty subfile and make it active
    pub fn create_subfile(&mut self) -> SubfileId {
        let id = self.registry.push(Entry::new(self.options.default_method));
        self.dirty = true;
        debug!("created subfile {id}");
        id
    }

    /// Editor for the active subfile
    pub fn edit_active(&mut self) -> ArchiveResult<SubfileEditor<'_>> {
        let id = self.registry.require_active()?;
        self.edit(id)
    }

    /// Editor for subfile `id`
    pub fn edit(&mut self, id: SubfileId) -> ArchiveResult<SubfileEditor<'_>> {
        let (entry, retain_guard) = self.registry.get_tracked(id)?;
        Ok(SubfileEditor {
            entry,
            archive_dirty: &mut self.dirty,
            retain_guard,
        })
    }

    /// Delete the active subfile
    pub fn delete_active(&mut self) -> ArchiveResult<()> {
        let id = self.registry.require_active()?;
        self.delete(id)
    }

    /// Delete subfile `id`; its bytes are dropped at the next commit
    pub fn delete(&mut self, id: SubfileId) -> ArchiveResult<()> {
        let entry = self.registry.remove(id)?;
        self.dirty = true;
        debug!("deleted subfile {id} ({})", entry.subfile.file_id());
        Ok(())
    }

    /// Snapshot the active subfile
    pub fn retain(&mut self) -> ArchiveResult<()> {
        self.registry.retain(self.dirty)
    }

    /// End a retain; with `discard` the edits made since are rolled back
    pub fn release(&mut self, discard: bool) -> ArchiveResult<()> {
        if let Some(dirty) = self.registry.release(discard)? {
            self.dirty = dirty;
        }
        Ok(())
    }

    fn require_fresh(&self, id: SubfileId) -> ArchiveResult<()> {
        if self.registry.get(id)?.populated {
            return Err(ArchiveError::BadArgument("subfile already holds data"));
        }
        Ok(())
    }

    /// Fill the active subfile from the file at `path`
    pub fn add<P: AsRef<Path>>(&mut self, path: P) -> ArchiveResult<()> {
        let id = self.registry.require_active()?;
        self.add_to(id, path)
    }

    /// Fill subfile `id` from the file at `path`
    pub fn add_to<P: AsRef<Path>>(&mut self, id: SubfileId, path: P) -> ArchiveResult<()> {
        let path = path.as_ref();
        self.require_fresh(id)?;
        if path.as_os_str().is_empty() {
            return Err(ArchiveError::BadFile);
        }
        let file = File::open(path).map_err(|source| ArchiveError::OpenInput {
            path: path.to_path_buf(),
            source,
        })?;
        self.add_from_reader(id, file)
    }

    /// Fill subfile `id` from `reader`
    ///
    /// The payload goes to the staging file. The subfile's record format,
    /// length and method are frozen afterwards; variable-format subfiles
    /// take the longest record seen as their record length.
    pub fn add_from_reader<R: Read>(&mut self, id: SubfileId, mut reader: R) -> ArchiveResult<()> {
        self.require_fresh(id)?;
        let entry = self.registry.get(id)?;
        let layout = entry.subfile.layout();
        let method = entry.subfile.method;

        let mut sample = Vec::new();
        (&mut reader).take(SNIFF_LEN).read_to_end(&mut sample)?;
        let mode = self.options.transfer_mode;
        let data_type = match mode {
            TransferMode::Auto => DataType::sniff(&sample),
            other => other.data_type(),
        };
        let input = Cursor::new(sample).chain(BufReader::new(reader));

        if self.staging.is_none() {
            self.staging = Some(Staging::create(&self.path)?);
        }
        let Some(staging) = self.staging.as_mut() else {
            return Err(ArchiveError::BadArgument("staging file unavailable"));
        };

        let (data_offset, mut writer) = staging.append()?;
        let mut source = RecordSource::new(input, layout, mode.conversion(data_type), &self.tables);
        let stats = codec::encode(method, &mut source, &mut writer)?;
        writer.flush().map_err(ArchiveError::Write)?;
        drop(writer);

        let entry = self.registry.get_mut(id)?;
        let sf = &mut entry.subfile;
        sf.method = stats.method;
        sf.release = release_for(stats.method);
        sf.data_type = data_type;
        if sf.record_format == RecordFormat::Variable {
            sf.record_length = stats.longest_record.max(1);
        }
        sf.compressed = stats.written;
        sf.uncompressed = stats.bytes_read;

        entry.data_offset = data_offset;
        entry.populated = true;
        entry.staged = true;
        entry.locked = true;
        entry.dirty = true;
        self.dirty = true;

        info!(
            "added {} ({} {}): {} -> {} bytes",
            entry.subfile.file_id(),
            entry.subfile.method,
            entry.subfile.record_format,
            stats.bytes_read,
            stats.written
        );
        self.registry.note_unrestorable();
        Ok(())
    }

    /// Reader over the stored payload of `entry`
    fn payload_file(&self, entry: &Entry) -> ArchiveResult<BufReader<File>> {
        if entry.staged {
            let staging = self
                .staging
                .as_ref()
                .ok_or(ArchiveError::BadArgument("staged payload without a staging file"))?;
            return staging.reader_at(entry.data_offset);
        }

        let mut file = self
            .committed
            .as_ref()
            .ok_or(ArchiveError::BadArgument("archive has not been committed"))?
            .try_clone()?;
        file.seek(SeekFrom::Start(entry.data_offset))
            .map_err(ArchiveError::Seek)?;
        Ok(BufReader::new(file))
    }

    fn payload_reader(&self, entry: &Entry) -> ArchiveResult<PushbackReader<BufReader<File>>> {
        let file = self.payload_file(entry)?;
        Ok(PushbackReader::at_position(file, entry.data_offset))
    }

    /// Classify a subfile from the start of its payload
    fn scan(&self, entry: &Entry) -> ArchiveResult<DataType> {
        let mut input = self.payload_reader(entry)?;
        let mut sink = RecordSink::new(
            None::<io::Sink>,
            entry.subfile.layout(),
            Conversion::Text,
            &self.tables,
        )
        .with_scan_limit(self.options.scan_limit);
        codec::decode(entry.subfile.method, &mut input, &mut sink)?;
        let (stats, _) = sink.finish(input.consumed())?;
        Ok(stats.data_type)
    }

    /// Conversion for extracting `id` in the current transfer mode
    fn resolve_conversion(&mut self, id: SubfileId) -> ArchiveResult<Conversion> {
        let mode = self.options.transfer_mode;
        let entry = self.registry.get(id)?;
        if !entry.populated {
            return Err(ArchiveError::BadArgument("subfile holds no data"));
        }

        let mut data_type = entry.subfile.data_type;
        if mode == TransferMode::Auto && data_type == DataType::Unknown {
            data_type = self.scan(entry)?;
            debug!("classified subfile {id} as {data_type:?}");
            self.registry.get_mut(id)?.subfile.data_type = data_type;
        }
        Ok(mode.conversion(data_type))
    }

    fn decode_into<W: Write>(
        &self,
        id: SubfileId,
        conversion: Conversion,
        out: W,
    ) -> ArchiveResult<DecodeStats> {
        let entry = self.registry.get(id)?;
        let mut input = self.payload_reader(entry)?;
        let mut sink = RecordSink::new(Some(out), entry.subfile.layout(), conversion, &self.tables)
            .with_line_ending(self.options.line_ending);
        codec::decode(entry.subfile.method, &mut input, &mut sink)?;
        let (stats, _) = sink.finish(input.consumed())?;
        Ok(stats)
    }

    /// Extract the active subfile to `path`
    pub fn extract<P: AsRef<Path>>(&mut self, path: P) -> ArchiveResult<DecodeStats> {
        let id = self.registry.require_active()?;
        self.extract_to(id, path)
    }

    /// Extract subfile `id` to `path`
    ///
    /// On success the file's access and modification times are set to the
    /// subfile's date and time when the options ask for it.
    pub fn extract_to<P: AsRef<Path>>(
        &mut self,
        id: SubfileId,
        path: P,
    ) -> ArchiveResult<DecodeStats> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(ArchiveError::BadFile);
        }
        let conversion = self.resolve_conversion(id)?;

        let file = File::create(path).map_err(|source| ArchiveError::OpenOutput {
            path: path.to_path_buf(),
            source,
        })?;
        let mut out = BufWriter::new(file);
        let stats = self.decode_into(id, conversion, &mut out)?;
        out.flush().map_err(ArchiveError::Write)?;
        drop(out);

        if self.options.set_file_times {
            stamp_file_times(path, self.registry.get(id)?.subfile.timestamp);
        }
        debug!(
            "extracted subfile {id} to {}: {} bytes",
            path.display(),
            stats.produced
        );
        Ok(stats)
    }

    /// Extract subfile `id` into `out`
    pub fn extract_to_writer<W: Write>(
        &mut self,
        id: SubfileId,
        out: W,
    ) -> ArchiveResult<DecodeStats> {
        let conversion = self.resolve_conversion(id)?;
        self.decode_into(id, conversion, out)
    }

    /// Write all pending changes
    ///
    /// A clean archive is left alone. Otherwise a merged archive is
    /// written beside the original and renamed over it. If that rename
    /// fails the handle switches to the merged file's name and returns
    /// [`ArchiveError::RenameRequired`]; nothing is lost.
    pub fn commit(&mut self) -> ArchiveResult<CommitOutcome> {
        if !self.dirty {
            debug!("{} has no pending changes", self.path.display());
            return Ok(CommitOutcome::Clean);
        }

        info!(
            "committing {} subfiles to {}",
            self.registry.len(),
            self.path.display()
        );
        let merged = commit::write_merged(
            &self.path,
            self.registry.iter().map(|(_, entry)| entry),
            |entry| self.payload_file(entry),
        )?;
        let bytes = merged.bytes;
        let subfiles = merged.placements.len();
        let merged_path = commit::persist(merged.file)?;

        for (entry, placement) in self.registry.entries_mut().zip(&merged.placements) {
            entry.data_offset = placement.data_offset;
            entry.subfile.compressed = placement.compressed;
            entry.populated = true;
            entry.staged = false;
            entry.dirty = false;
            entry.locked = true;
        }
        self.dirty = false;
        if let Some(staging) = self.staging.take() {
            debug!("dropping staging file {}", staging.path().display());
        }
        self.committed = None;

        match commit::replace(merged_path, &self.path, self.rename) {
            Ok(path) => {
                self.reopen(path)?;
                info!("committed {} ({bytes} bytes)", self.path.display());
                Ok(CommitOutcome::Written { subfiles, bytes })
            }
            Err(ArchiveError::RenameRequired { path, source }) => {
                self.reopen(path.clone())?;
                Err(ArchiveError::RenameRequired { path, source })
            }
            Err(err) => Err(err),
        }
    }

    fn reopen(&mut self, path: PathBuf) -> ArchiveResult<()> {
        let file = File::open(&path).map_err(|source| ArchiveError::OpenInput {
            path: path.clone(),
            source,
        })?;
        self.committed = Some(file);
        self.path = path;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn set_rename_hook(&mut self, hook: RenameFn) {
        self.rename = hook;
    }
}

fn stamp_file_times(path: &Path, timestamp: Timestamp) {
    let Some(time) = timestamp.to_system_time() else {
        debug!("{timestamp} has no local time, leaving file times alone");
        return;
    };
    let times = FileTimes::new().set_accessed(time).set_modified(time);
    let result = File::options()
        .write(true)
        .open(path)
        .and_then(|file| file.set_times(times));
    if let Err(err) = result {
        debug!("could not set file times on {}: {err}", path.display());
    }
}

/// Field mutators for one subfile
///
/// Every setter validates its input and fails with a field-specific
/// error. Record format, record length and method can only change before
/// the subfile has been written.
#[derive(Debug)]
pub struct SubfileEditor<'a> {
    entry: &'a mut Entry,
    archive_dirty: &'a mut bool,
    // set when a retain snapshot of another subfile is held
    retain_guard: Option<&'a mut bool>,
}

impl SubfileEditor<'_> {
    /// Current field values
    pub fn subfile(&self) -> &Subfile {
        &self.entry.subfile
    }

    fn touch(&mut self) {
        self.entry.dirty = true;
        *self.archive_dirty = true;
        if let Some(guard) = self.retain_guard.as_deref_mut() {
            *guard = true;
        }
    }

    fn unlocked(&self) -> ArchiveResult<()> {
        if self.entry.locked {
            Err(ArchiveError::NotModifiable)
        } else {
            Ok(())
        }
    }

    /// Set any of name, type and mode; nothing changes unless all are valid
    pub fn set_file_id(
        &mut self,
        name: Option<&str>,
        file_type: Option<&str>,
        mode: Option<&str>,
    ) -> ArchiveResult<()> {
        if let Some(name) = name.filter(|n| !is_valid_name(n)) {
            return Err(ArchiveError::BadName(name.to_string()));
        }
        if let Some(file_type) = file_type.filter(|t| !is_valid_name(t)) {
            return Err(ArchiveError::BadType(file_type.to_string()));
        }
        if let Some(mode) = mode.filter(|m| !is_valid_mode(m)) {
            return Err(ArchiveError::BadMode(mode.to_string()));
        }

        let sf = &mut self.entry.subfile;
        let fields = [
            (name, &mut sf.name),
            (file_type, &mut sf.file_type),
            (mode, &mut sf.mode),
        ];
        let mut changed = false;
        for (value, field) in fields {
            if let Some(value) = value {
                value.clone_into(field);
                changed = true;
            }
        }
        if changed {
            self.touch();
        }
        Ok(())
    }

    /// Set the file name
    pub fn set_name(&mut self, name: &str) -> ArchiveResult<()> {
        self.set_file_id(Some(name), None, None)
    }

    /// Set the file type
    pub fn set_type(&mut self, file_type: &str) -> ArchiveResult<()> {
        self.set_file_id(None, Some(file_type), None)
    }

    /// Set the file mode
    pub fn set_mode(&mut self, mode: &str) -> ArchiveResult<()> {
        self.set_file_id(None, None, Some(mode))
    }

    /// Set the date
    pub fn set_date(&mut self, year: u16, month: u8, day: u8) -> ArchiveResult<()> {
        check_date(year, month, day)?;
        let ts = &mut self.entry.subfile.timestamp;
        ts.year = year;
        ts.month = month;
        ts.day = day;
        self.touch();
        Ok(())
    }

    /// Set the time of day
    pub fn set_time(&mut self, hour: u8, minute: u8, second: u8) -> ArchiveResult<()> {
        check_time(hour, minute, second)?;
        let ts = &mut self.entry.subfile.timestamp;
        ts.hour = hour;
        ts.minute = minute;
        ts.second = second;
        self.touch();
        Ok(())
    }

    /// Set the record format from its letter, `F` or `V`
    pub fn set_record_format(&mut self, recfm: char) -> ArchiveResult<()> {
        let format = RecordFormat::from_char(recfm).ok_or(ArchiveError::BadRecordFormat(recfm))?;
        self.unlocked()?;
        self.entry.subfile.record_format = format;
        self.touch();
        Ok(())
    }

    /// Set the logical record length
    pub fn set_record_length(&mut self, lrecl: u32) -> ArchiveResult<()> {
        if !(1..=MAX_RECORD_LENGTH).contains(&lrecl) {
            return Err(ArchiveError::BadRecordLength(lrecl));
        }
        self.unlocked()?;
        self.entry.subfile.record_length = lrecl;
        self.touch();
        Ok(())
    }

    /// Set the compression method
    pub fn set_method(&mut self, method: Method) -> ArchiveResult<()> {
        self.unlocked()?;
        let sf = &mut self.entry.subfile;
        sf.method = method;
        sf.release = release_for(method);
        self.touch();
        Ok(())
    }
}
