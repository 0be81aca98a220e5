//! Ordered subfile registry with an active cursor
//!
//! Entries keep the order they were found on disk or created in, and are
//! addressed by a [`SubfileId`] that stays valid until the entry is
//! deleted. Ids only grow, so the list is always sorted by id.
//!
//! The registry also holds the single retain slot: a copy of the active
//! subfile taken by `retain` and either dropped or written back by
//! `release`. Moving the cursor clears the slot. Changes the snapshot
//! cannot undo (edits to other subfiles, deletions, staged payloads) are
//! noted on it so a discard leaves the archive dirty.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, ArchiveResult};
use crate::subfile::{Entry, Subfile};

/// Stable handle for one subfile of an open archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubfileId(u32);

impl fmt::Display for SubfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Snapshot {
    id: SubfileId,
    subfile: Subfile,
    entry_dirty: bool,
    archive_dirty: bool,
    /// A change outside the snapshot happened since `retain`
    unrestorable: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: Vec<(SubfileId, Entry)>,
    next_id: u32,
    active: Option<SubfileId>,
    retained: Option<Snapshot>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn index_of(&self, id: SubfileId) -> Option<usize> {
        self.entries.binary_search_by_key(&id, |(key, _)| *key).ok()
    }

    pub(crate) fn get(&self, id: SubfileId) -> ArchiveResult<&Entry> {
        self.index_of(id)
            .map(|i| &self.entries[i].1)
            .ok_or(ArchiveError::NotFound(id))
    }

    pub(crate) fn get_mut(&mut self, id: SubfileId) -> ArchiveResult<&mut Entry> {
        match self.index_of(id) {
            Some(i) => Ok(&mut self.entries[i].1),
            None => Err(ArchiveError::NotFound(id)),
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (SubfileId, &Entry)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    pub(crate) fn entries_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.entries.iter_mut().map(|(_, entry)| entry)
    }

    /// Append `entry` and make it active
    pub(crate) fn push(&mut self, entry: Entry) -> SubfileId {
        let id = SubfileId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, entry));
        self.move_cursor(Some(id));
        id
    }

    /// Remove `id`, clearing the cursor if it pointed there
    pub(crate) fn remove(&mut self, id: SubfileId) -> ArchiveResult<Entry> {
        let index = self.index_of(id).ok_or(ArchiveError::NotFound(id))?;
        let (_, entry) = self.entries.remove(index);
        if self.active == Some(id) {
            self.move_cursor(None);
        }
        if self.retained.as_ref().is_some_and(|snap| snap.id == id) {
            self.retained = None;
        }
        self.note_unrestorable();
        Ok(entry)
    }

    /// Entry `id` plus the flag to raise when it changes outside the snapshot
    pub(crate) fn get_tracked(
        &mut self,
        id: SubfileId,
    ) -> ArchiveResult<(&mut Entry, Option<&mut bool>)> {
        let index = self.index_of(id).ok_or(ArchiveError::NotFound(id))?;
        let tracker = self
            .retained
            .as_mut()
            .filter(|snap| snap.id != id)
            .map(|snap| &mut snap.unrestorable);
        Ok((&mut self.entries[index].1, tracker))
    }

    /// Record a change a discard cannot roll back
    pub(crate) fn note_unrestorable(&mut self) {
        if let Some(snap) = self.retained.as_mut() {
            snap.unrestorable = true;
        }
    }

    fn move_cursor(&mut self, to: Option<SubfileId>) {
        self.active = to;
        self.retained = None;
    }

    pub(crate) fn active(&self) -> Option<SubfileId> {
        self.active
    }

    pub(crate) fn require_active(&self) -> ArchiveResult<SubfileId> {
        self.active.ok_or(ArchiveError::NoActive)
    }

    pub(crate) fn set_active(&mut self, id: SubfileId) -> ArchiveResult<()> {
        self.get(id)?;
        self.move_cursor(Some(id));
        Ok(())
    }

    pub(crate) fn clear_active(&mut self) {
        self.move_cursor(None);
    }

    /// Make the first entry active
    pub(crate) fn first(&mut self) -> Option<SubfileId> {
        let first = self.entries.first().map(|(id, _)| *id);
        self.move_cursor(first);
        first
    }

    /// Advance the cursor; `None` once the list is exhausted
    pub(crate) fn next(&mut self) -> ArchiveResult<Option<SubfileId>> {
        let current = self.require_active()?;
        let index = self.index_of(current).ok_or(ArchiveError::NotFound(current))?;
        let next = self.entries.get(index + 1).map(|(id, _)| *id);
        self.move_cursor(next);
        Ok(next)
    }

    /// Snapshot the active entry
    pub(crate) fn retain(&mut self, archive_dirty: bool) -> ArchiveResult<()> {
        if self.retained.is_some() {
            return Err(ArchiveError::AlreadyRetained);
        }
        let id = self.require_active()?;
        let entry = self.get(id)?;
        self.retained = Some(Snapshot {
            id,
            subfile: entry.subfile.clone(),
            entry_dirty: entry.dirty,
            archive_dirty,
            unrestorable: false,
        });
        Ok(())
    }

    /// Drop the snapshot, or with `discard` restore it
    ///
    /// Returns the archive dirty state to restore when discarding: the
    /// state at `retain` unless something the snapshot does not cover
    /// changed meanwhile.
    /// Record format, length and method only come back while the entry is
    /// still unlocked; payload sizes and data type are never rolled back.
    pub(crate) fn release(&mut self, discard: bool) -> ArchiveResult<Option<bool>> {
        let id = self.require_active()?;
        let snapshot = match self.retained.take() {
            Some(snap) if snap.id == id => snap,
            other => {
                self.retained = other;
                return Err(ArchiveError::NotRetained);
            }
        };
        if !discard {
            return Ok(None);
        }

        let entry = self.get_mut(id)?;
        let saved = snapshot.subfile;
        let current = &mut entry.subfile;
        current.name = saved.name;
        current.file_type = saved.file_type;
        current.mode = saved.mode;
        current.timestamp = saved.timestamp;
        if !entry.locked {
            current.record_format = saved.record_format;
            current.record_length = saved.record_length;
            current.method = saved.method;
            current.release = saved.release;
        }
        entry.dirty = snapshot.entry_dirty;
        Ok(Some(snapshot.archive_dirty || snapshot.unrestorable))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use vmarc_formats::header::{Method, RecordFormat};

    fn registry_with(n: usize) -> (Registry, Vec<SubfileId>) {
        let mut registry = Registry::new();
        let ids = (0..n).map(|_| registry.push(Entry::new(Method::Asis))).collect();
        registry.clear_active();
        (registry, ids)
    }

    #[test]
    fn test_iteration_order() {
        let (mut registry, ids) = registry_with(3);
        assert_eq!(registry.first(), Some(ids[0]));
        assert_eq!(registry.next().unwrap(), Some(ids[1]));
        assert_eq!(registry.next().unwrap(), Some(ids[2]));
        assert_eq!(registry.next().unwrap(), None);
        assert_eq!(registry.active(), None);
        assert!(matches!(registry.next(), Err(ArchiveError::NoActive)));
    }

    #[test]
    fn test_empty_registry() {
        let mut registry = Registry::new();
        assert_eq!(registry.first(), None);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_remove_keeps_ids_stable() {
        let (mut registry, ids) = registry_with(3);
        registry.set_active(ids[1]).unwrap();
        registry.remove(ids[1]).unwrap();
        assert_eq!(registry.active(), None);
        assert!(matches!(registry.get(ids[1]), Err(ArchiveError::NotFound(_))));
        assert!(registry.get(ids[2]).is_ok());

        let added = registry.push(Entry::new(Method::Lzw));
        assert!(added > ids[2]);
        let order: Vec<SubfileId> = registry.iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec![ids[0], ids[2], added]);
    }

    #[test]
    fn test_set_active_unknown() {
        let (mut registry, ids) = registry_with(1);
        registry.remove(ids[0]).unwrap();
        assert!(matches!(registry.set_active(ids[0]), Err(ArchiveError::NotFound(_))));
    }

    #[test]
    fn test_retain_protocol() {
        let (mut registry, ids) = registry_with(2);
        assert!(matches!(registry.retain(false), Err(ArchiveError::NoActive)));

        registry.set_active(ids[0]).unwrap();
        assert!(matches!(registry.release(false), Err(ArchiveError::NotRetained)));
        registry.retain(false).unwrap();
        assert!(matches!(registry.retain(false), Err(ArchiveError::AlreadyRetained)));
        assert_eq!(registry.release(false).unwrap(), None);
        assert!(matches!(registry.release(false), Err(ArchiveError::NotRetained)));
    }

    #[test]
    fn test_cursor_move_drops_snapshot() {
        let (mut registry, ids) = registry_with(2);
        registry.set_active(ids[0]).unwrap();
        registry.retain(false).unwrap();
        registry.set_active(ids[0]).unwrap();
        assert!(matches!(registry.release(true), Err(ArchiveError::NotRetained)));
    }

    #[test]
    fn test_discard_restores_fields() {
        let (mut registry, ids) = registry_with(1);
        registry.set_active(ids[0]).unwrap();
        registry.retain(true).unwrap();
        {
            let entry = registry.get_mut(ids[0]).unwrap();
            entry.subfile.name = "CHANGED".to_string();
            entry.subfile.record_format = RecordFormat::Fixed;
            entry.dirty = true;
        }
        assert_eq!(registry.release(true).unwrap(), Some(true));
        let entry = registry.get(ids[0]).unwrap();
        assert_eq!(entry.subfile.name, "TEMPNAME");
        assert_eq!(entry.subfile.record_format, RecordFormat::Variable);
        assert!(!entry.dirty);
    }

    #[test]
    fn test_discard_after_other_removal_stays_dirty() {
        let (mut registry, ids) = registry_with(2);
        registry.set_active(ids[0]).unwrap();
        registry.retain(false).unwrap();
        registry.remove(ids[1]).unwrap();
        assert_eq!(registry.release(true).unwrap(), Some(true));
    }

    #[test]
    fn test_tracked_entry_flags_other_subfiles_only() {
        let (mut registry, ids) = registry_with(2);
        registry.set_active(ids[0]).unwrap();
        registry.retain(false).unwrap();

        let (_, tracker) = registry.get_tracked(ids[0]).unwrap();
        assert!(tracker.is_none());
        assert_eq!(registry.release(true).unwrap(), Some(false));

        registry.retain(false).unwrap();
        let (_, tracker) = registry.get_tracked(ids[1]).unwrap();
        *tracker.unwrap() = true;
        assert_eq!(registry.release(true).unwrap(), Some(true));
    }

    #[test]
    fn test_discard_keeps_locked_fields() {
        let (mut registry, ids) = registry_with(1);
        registry.set_active(ids[0]).unwrap();
        registry.retain(false).unwrap();
        {
            let entry = registry.get_mut(ids[0]).unwrap();
            entry.subfile.name = "ADDED".to_string();
            entry.subfile.record_length = 72;
            entry.subfile.compressed = 500;
            entry.locked = true;
        }
        registry.release(true).unwrap();
        let entry = registry.get(ids[0]).unwrap();
        assert_eq!(entry.subfile.name, "TEMPNAME");
        assert_eq!(entry.subfile.record_length, 72);
        assert_eq!(entry.subfile.compressed, 500);
    }
}
