//! Per-session change tracking.
//!
//! # Responsibility
//! - Remember every entity a session has loaded or staged, with its state.
//! - Keep the original version token used for optimistic concurrency.
//!
//! # Invariants
//! - At most one entry per persisted `(table, id)`.
//! - Entries keep staging order; `save` flushes them in that order.
//! - `Added` entries carry identity `0` until their insert commits.

use crate::model::entity::{EntityId, EntitySchema, Record, UNSET_ID};
use rusqlite::types::Value;

/// Lifecycle state of an entity relative to one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Unchanged,
    Added,
    Modified,
    Deleted,
    /// Not known to the session.
    Detached,
}

/// Stable handle to a tracked entry, valid for the lifetime of its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryRef(u64);

#[derive(Debug, Clone)]
pub(crate) struct TrackedEntry {
    pub(crate) serial: u64,
    pub(crate) schema: &'static EntitySchema,
    pub(crate) state: EntityState,
    pub(crate) current: Record,
    /// Version token the store must still hold at commit time.
    pub(crate) original_version: Option<i64>,
}

impl TrackedEntry {
    pub(crate) fn id(&self) -> EntityId {
        self.schema.id_of(&self.current)
    }

    fn matches(&self, schema: &EntitySchema, id: EntityId) -> bool {
        id != UNSET_ID && self.schema.table == schema.table && self.id() == id
    }
}

#[derive(Debug, Default)]
pub(crate) struct ChangeTracker {
    entries: Vec<TrackedEntry>,
    next_serial: u64,
}

impl ChangeTracker {
    pub(crate) fn entries(&self) -> &[TrackedEntry] {
        &self.entries
    }

    pub(crate) fn get(&self, entry: EntryRef) -> Option<&TrackedEntry> {
        self.entries.iter().find(|tracked| tracked.serial == entry.0)
    }

    pub(crate) fn find(&self, schema: &EntitySchema, id: EntityId) -> Option<&TrackedEntry> {
        self.entries.iter().find(|tracked| tracked.matches(schema, id))
    }

    fn position(&self, schema: &EntitySchema, id: EntityId) -> Option<usize> {
        self.entries
            .iter()
            .position(|tracked| tracked.matches(schema, id))
    }

    pub(crate) fn state_of(&self, schema: &EntitySchema, id: EntityId) -> EntityState {
        self.find(schema, id)
            .map_or(EntityState::Detached, |tracked| tracked.state)
    }

    /// Number of entries `save` would flush.
    pub(crate) fn pending(&self) -> usize {
        self.entries
            .iter()
            .filter(|tracked| tracked.state != EntityState::Unchanged)
            .count()
    }

    /// Identities of `schema` rows staged for deletion, in staging order.
    pub(crate) fn deleted_ids(&self, schema: &EntitySchema) -> Vec<EntityId> {
        self.entries
            .iter()
            .filter(|tracked| {
                tracked.state == EntityState::Deleted && tracked.schema.table == schema.table
            })
            .map(TrackedEntry::id)
            .collect()
    }

    fn push(
        &mut self,
        schema: &'static EntitySchema,
        current: Record,
        state: EntityState,
        original_version: Option<i64>,
    ) -> EntryRef {
        let serial = self.next_serial;
        self.next_serial += 1;
        self.entries.push(TrackedEntry {
            serial,
            schema,
            state,
            current,
            original_version,
        });
        EntryRef(serial)
    }

    /// Starts tracking a freshly loaded row as `Unchanged`.
    ///
    /// When the row is already tracked the tracked values win, matching what
    /// the session has staged so far. Returns `None` for rows staged for
    /// deletion.
    pub(crate) fn track_loaded(
        &mut self,
        schema: &'static EntitySchema,
        persisted: Record,
    ) -> Option<Record> {
        let id = schema.id_of(&persisted);
        match self.find(schema, id) {
            Some(tracked) if tracked.state == EntityState::Deleted => None,
            Some(tracked) => Some(tracked.current.clone()),
            None => {
                let version = schema.version_of(&persisted);
                self.push(schema, persisted.clone(), EntityState::Unchanged, version);
                Some(persisted)
            }
        }
    }

    pub(crate) fn add(&mut self, schema: &'static EntitySchema, record: Record) -> EntryRef {
        self.push(schema, record, EntityState::Added, None)
    }

    /// Marks a record `Modified`, attaching it first when detached.
    ///
    /// `original_version` overrides the snapshot used for the commit-time
    /// comparison; `None` keeps the tracked snapshot (or the record's own
    /// token when attaching).
    pub(crate) fn mark_modified(
        &mut self,
        schema: &'static EntitySchema,
        record: Record,
        original_version: Option<i64>,
    ) -> EntryRef {
        let id = schema.id_of(&record);
        match self.position(schema, id) {
            Some(index) => {
                let tracked = &mut self.entries[index];
                tracked.current = record;
                if original_version.is_some() {
                    tracked.original_version = original_version;
                }
                if tracked.state != EntityState::Added {
                    tracked.state = EntityState::Modified;
                }
                EntryRef(tracked.serial)
            }
            None => {
                let version = original_version.or_else(|| schema.version_of(&record));
                self.push(schema, record, EntityState::Modified, version)
            }
        }
    }

    /// Marks a record `Deleted`, attaching it first when detached.
    ///
    /// An entry that was only staged for insert is forgotten instead.
    pub(crate) fn mark_deleted(&mut self, schema: &'static EntitySchema, record: Record) {
        let id = schema.id_of(&record);
        match self.position(schema, id) {
            Some(index) if self.entries[index].state == EntityState::Added => {
                self.entries.remove(index);
            }
            Some(index) => self.entries[index].state = EntityState::Deleted,
            None => {
                let version = schema.version_of(&record);
                self.push(schema, record, EntityState::Deleted, version);
            }
        }
    }

    /// Records a committed insert: assigns identity and the initial version.
    pub(crate) fn complete_insert(&mut self, serial: u64, id: EntityId) {
        if let Some(tracked) = self.entries.iter_mut().find(|t| t.serial == serial) {
            tracked.current.insert(tracked.schema.key, Value::Integer(id));
            if let Some(column) = tracked.schema.version_column() {
                tracked.current.insert(column, Value::Integer(1));
                tracked.original_version = Some(1);
            }
            tracked.state = EntityState::Unchanged;
        }
    }

    /// Records a committed update: the store bumped the version by one.
    pub(crate) fn complete_update(&mut self, serial: u64) {
        if let Some(tracked) = self.entries.iter_mut().find(|t| t.serial == serial) {
            if let Some(column) = tracked.schema.version_column() {
                // Unguarded writes leave the new token unknown until reloaded.
                let persisted = tracked.original_version.map(|version| version + 1);
                tracked.original_version = persisted;
                tracked
                    .current
                    .insert(column, Value::Integer(persisted.unwrap_or(0)));
            }
            tracked.state = EntityState::Unchanged;
        }
    }

    /// Overwrites an entry with what the store holds right now.
    ///
    /// Caller-staged values are lost; the entry becomes `Unchanged`.
    pub(crate) fn refresh(&mut self, serial: u64, persisted: Record) {
        if let Some(tracked) = self.entries.iter_mut().find(|t| t.serial == serial) {
            tracked.original_version = tracked.schema.version_of(&persisted);
            tracked.current = persisted;
            tracked.state = EntityState::Unchanged;
        }
    }

    pub(crate) fn complete_delete(&mut self, serial: u64) {
        self.entries.retain(|tracked| tracked.serial != serial);
    }

    pub(crate) fn forget(&mut self, serial: u64) {
        self.entries.retain(|tracked| tracked.serial != serial);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeTracker, EntityState};
    use crate::model::dev_test::DevTest;
    use crate::model::entity::Entity;

    fn persisted(id: i64, version: i64) -> DevTest {
        DevTest {
            id,
            row_version: version,
            ..DevTest::new("tracked")
        }
    }

    #[test]
    fn update_of_detached_entity_attaches_as_modified() {
        let mut tracker = ChangeTracker::default();
        let schema = DevTest::SCHEMA;

        tracker.mark_modified(schema, persisted(4, 2).to_record(), None);

        let entry = tracker.find(schema, 4).unwrap();
        assert_eq!(entry.state, EntityState::Modified);
        assert_eq!(entry.original_version, Some(2));
    }

    #[test]
    fn update_of_loaded_entity_keeps_loaded_version() {
        let mut tracker = ChangeTracker::default();
        let schema = DevTest::SCHEMA;
        tracker.track_loaded(schema, persisted(4, 2).to_record());

        tracker.mark_modified(schema, persisted(4, 9).to_record(), None);

        let entry = tracker.find(schema, 4).unwrap();
        assert_eq!(entry.state, EntityState::Modified);
        assert_eq!(entry.original_version, Some(2));
    }

    #[test]
    fn deleting_an_added_entry_forgets_it() {
        let mut tracker = ChangeTracker::default();
        let schema = DevTest::SCHEMA;
        let entry = tracker.add(schema, persisted(21, 0).to_record());
        assert_eq!(tracker.pending(), 1);

        tracker.mark_deleted(schema, persisted(21, 0).to_record());

        assert!(tracker.get(entry).is_none());
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn committed_insert_can_be_staged_for_delete() {
        let mut tracker = ChangeTracker::default();
        let schema = DevTest::SCHEMA;
        let entry = tracker.add(schema, persisted(0, 0).to_record());
        let serial = tracker.get(entry).unwrap().serial;
        tracker.complete_insert(serial, 11);

        assert_eq!(tracker.state_of(schema, 11), EntityState::Unchanged);
        assert_eq!(tracker.pending(), 0);

        tracker.mark_deleted(schema, persisted(11, 1).to_record());
        assert_eq!(tracker.state_of(schema, 11), EntityState::Deleted);
        assert_eq!(tracker.pending(), 1);

        tracker.complete_delete(serial);
        assert_eq!(tracker.state_of(schema, 11), EntityState::Detached);
    }

    #[test]
    fn loaded_rows_staged_for_delete_are_hidden() {
        let mut tracker = ChangeTracker::default();
        let schema = DevTest::SCHEMA;
        tracker.mark_deleted(schema, persisted(3, 1).to_record());

        assert!(tracker.track_loaded(schema, persisted(3, 1).to_record()).is_none());
    }

    #[test]
    fn deleted_ids_lists_only_staged_deletes() {
        let mut tracker = ChangeTracker::default();
        let schema = DevTest::SCHEMA;
        tracker.track_loaded(schema, persisted(1, 1).to_record());
        tracker.track_loaded(schema, persisted(2, 1).to_record());
        tracker.mark_deleted(schema, persisted(2, 1).to_record());
        tracker.add(schema, persisted(0, 0).to_record());

        assert_eq!(tracker.deleted_ids(schema), vec![2]);
    }
}
