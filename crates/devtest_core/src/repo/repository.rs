//! Generic repository over one entity kind.
//!
//! # Responsibility
//! - Query rows through lazy `Query` values and paged filters.
//! - Stage inserts, updates and deletes in the owning unit of work.
//! - Offer the audit update path (merge onto the persisted row, compare
//!   the caller's version token on commit).
//!
//! # Invariants
//! - Writes validate the entity before anything is staged.
//! - A repository borrows its unit of work and cannot outlive it.
//! - `_async` methods have the same effect as their sync twins and run
//!   store work on tokio's blocking pool.

use crate::model::entity::{Entity, EntityId, Record, UNSET_ID};
use crate::model::identity::IdentityMap;
use crate::repo::query::{count_in, load_in, page_in, Page, Predicate, Query};
use crate::repo::tracker::{EntityState, EntryRef};
use crate::repo::unit_of_work::{Session, UnitOfWork};
use crate::repo::{RepoError, RepoResult};
use log::debug;
use rusqlite::types::Value;
use std::marker::PhantomData;

/// Data-access facade for entities of type `T`.
pub struct Repository<'uow, T: Entity> {
    uow: &'uow UnitOfWork,
    identity_field: Option<String>,
    _entity: PhantomData<fn() -> T>,
}

impl<'uow, T: Entity> Repository<'uow, T> {
    /// Creates a repository bound to `uow`.
    ///
    /// `identities` is consulted once for `T`'s identity field; it is only
    /// needed by the audit update path.
    pub fn new(uow: &'uow UnitOfWork, identities: &IdentityMap) -> Self {
        Self {
            uow,
            identity_field: identities.resolve(T::SCHEMA.type_name).map(str::to_string),
            _entity: PhantomData,
        }
    }

    pub fn unit_of_work(&self) -> &'uow UnitOfWork {
        self.uow
    }

    pub fn identity_field(&self) -> Option<&str> {
        self.identity_field.as_deref()
    }

    /// Every row, lazily.
    pub fn all(&self) -> Query<'uow, T> {
        Query::new(self.uow, Predicate::Always)
    }

    /// Rows matching `predicate`, lazily.
    pub fn filter(&self, predicate: Predicate) -> Query<'uow, T> {
        Query::new(self.uow, predicate)
    }

    /// One zero-based page of matches plus the total match count.
    pub fn filter_paged(
        &self,
        predicate: Predicate,
        page_index: u64,
        page_size: u64,
    ) -> RepoResult<Page<T>> {
        self.uow
            .with_session(|session| page_in::<T>(session, &predicate, page_index, page_size))
    }

    pub async fn filter_paged_async(
        &self,
        predicate: Predicate,
        page_index: u64,
        page_size: u64,
    ) -> RepoResult<Page<T>> {
        self.uow
            .run_blocking(move |session| page_in::<T>(session, &predicate, page_index, page_size))
            .await
    }

    /// Number of rows matching `predicate`.
    pub fn count(&self, predicate: Predicate) -> RepoResult<u64> {
        self.uow
            .with_session(|session| count_in::<T>(session, &predicate))
    }

    /// First match by key order; no match is `Ok(None)`.
    pub fn first_or_default(&self, predicate: Predicate) -> RepoResult<Option<T>> {
        self.filter(predicate).first()
    }

    pub async fn first_or_default_async(&self, predicate: Predicate) -> RepoResult<Option<T>> {
        self.uow
            .run_blocking(move |session| {
                load_in::<T>(session, &predicate, 0, Some(1)).map(|items| items.into_iter().next())
            })
            .await
    }

    /// Looks `id` up in the session first, then in the store.
    ///
    /// Absence is `Ok(None)`, never an error.
    pub fn get_by_id(&self, id: EntityId) -> RepoResult<Option<T>> {
        self.uow.with_session(|session| get_by_id_in::<T>(session, id))
    }

    pub async fn get_by_id_async(&self, id: EntityId) -> RepoResult<Option<T>> {
        self.uow
            .run_blocking(move |session| get_by_id_in::<T>(session, id))
            .await
    }

    /// Current tracked value of a staged entry, including any identity
    /// assigned by a committed insert.
    pub fn tracked(&self, entry: EntryRef) -> RepoResult<Option<T>> {
        self.uow.with_session(|session| {
            let (_, tracker) = session.parts()?;
            tracker
                .get(entry)
                .map(|tracked| T::from_record(&tracked.current))
                .transpose()
                .map_err(RepoError::from)
        })
    }

    /// Stages `entity` as `Added`. Nothing is written before `save`.
    pub fn insert(&self, entity: T) -> RepoResult<EntryRef> {
        self.uow.with_session(|session| insert_in(session, entity))
    }

    pub async fn insert_async(&self, entity: T) -> RepoResult<EntryRef> {
        self.uow
            .run_blocking(move |session| insert_in(session, entity))
            .await
    }

    /// Stages every entity as `Added`; stages none if any fails validation.
    pub fn insert_many(&self, entities: impl IntoIterator<Item = T>) -> RepoResult<Vec<EntryRef>> {
        let entities: Vec<T> = entities.into_iter().collect();
        self.uow
            .with_session(|session| insert_many_in(session, entities))
    }

    pub async fn insert_many_async(&self, entities: Vec<T>) -> RepoResult<Vec<EntryRef>> {
        self.uow
            .run_blocking(move |session| insert_many_in(session, entities))
            .await
    }

    /// Stages deletion of the row with identity `id`.
    ///
    /// # Errors
    /// - `NotFound` when no such row exists.
    pub fn delete_by_id(&self, id: EntityId) -> RepoResult<()> {
        self.uow
            .with_session(|session| delete_by_id_in::<T>(session, id))
    }

    pub async fn delete_by_id_async(&self, id: EntityId) -> RepoResult<()> {
        self.uow
            .run_blocking(move |session| delete_by_id_in::<T>(session, id))
            .await
    }

    /// Stages deletion of every match and returns how many were staged.
    ///
    /// Loads all matches first; expensive on large tables.
    pub fn delete_where(&self, predicate: Predicate) -> RepoResult<usize> {
        self.uow
            .with_session(|session| delete_where_in::<T>(session, &predicate))
    }

    pub async fn delete_where_async(&self, predicate: Predicate) -> RepoResult<usize> {
        self.uow
            .run_blocking(move |session| delete_where_in::<T>(session, &predicate))
            .await
    }

    /// Stages deletion of `entity`, attaching it first when detached.
    pub fn delete(&self, entity: &T) -> RepoResult<()> {
        let record = entity.to_record();
        self.uow
            .with_session(|session| delete_entity_in::<T>(session, record))
    }

    pub async fn delete_async(&self, entity: &T) -> RepoResult<()> {
        let record = entity.to_record();
        self.uow
            .run_blocking(move |session| delete_entity_in::<T>(session, record))
            .await
    }

    /// Stages `entity` as `Modified`.
    ///
    /// A non-zero version token on `entity` is what the store must still
    /// hold on commit; `0` writes unguarded.
    ///
    /// With `perform_audit`, the persisted row is loaded and `entity` is
    /// merged onto it while `entity`'s version token becomes the value the
    /// store must still hold on commit. Any audit failure silently falls
    /// back to the plain attach-and-modify path.
    pub fn update(&self, entity: T, perform_audit: bool) -> RepoResult<EntryRef> {
        let identity_field = self.audit_field(perform_audit);
        self.uow
            .with_session(|session| update_in(session, entity, identity_field))
    }

    pub async fn update_async(&self, entity: T, perform_audit: bool) -> RepoResult<EntryRef> {
        let identity_field = self.audit_field(perform_audit);
        self.uow
            .run_blocking(move |session| update_in(session, entity, identity_field))
            .await
    }

    /// `None` disables audit; `Some("")` requests audit without a resolvable field.
    fn audit_field(&self, perform_audit: bool) -> Option<String> {
        perform_audit.then(|| self.identity_field.clone().unwrap_or_default())
    }
}

fn get_by_id_in<T: Entity>(session: &mut Session, id: EntityId) -> RepoResult<Option<T>> {
    let (context, tracker) = session.parts()?;
    if let Some(tracked) = tracker.find(T::SCHEMA, id) {
        if tracked.state == EntityState::Deleted {
            return Ok(None);
        }
        return Ok(Some(T::from_record(&tracked.current)?));
    }

    let Some(persisted) = context.set::<T>().find(id)? else {
        return Ok(None);
    };
    tracker
        .track_loaded(T::SCHEMA, persisted)
        .map(|record| T::from_record(&record))
        .transpose()
        .map_err(RepoError::from)
}

fn insert_in<T: Entity>(session: &mut Session, entity: T) -> RepoResult<EntryRef> {
    entity.validate()?;
    let (_, tracker) = session.parts()?;
    Ok(tracker.add(T::SCHEMA, entity.to_record()))
}

fn insert_many_in<T: Entity>(session: &mut Session, entities: Vec<T>) -> RepoResult<Vec<EntryRef>> {
    for entity in &entities {
        entity.validate()?;
    }
    let (_, tracker) = session.parts()?;
    Ok(entities
        .into_iter()
        .map(|entity| tracker.add(T::SCHEMA, entity.to_record()))
        .collect())
}

fn delete_entity_in<T: Entity>(session: &mut Session, record: Record) -> RepoResult<()> {
    let id = T::SCHEMA.id_of(&record);
    if id == UNSET_ID {
        return Err(RepoError::NotFound {
            entity: T::SCHEMA.type_name,
            id,
        });
    }
    let (_, tracker) = session.parts()?;
    tracker.mark_deleted(T::SCHEMA, record);
    Ok(())
}

fn delete_by_id_in<T: Entity>(session: &mut Session, id: EntityId) -> RepoResult<()> {
    let entity = get_by_id_in::<T>(session, id)?.ok_or(RepoError::NotFound {
        entity: T::SCHEMA.type_name,
        id,
    })?;
    delete_entity_in::<T>(session, entity.to_record())
}

fn delete_where_in<T: Entity>(session: &mut Session, predicate: &Predicate) -> RepoResult<usize> {
    let matches = load_in::<T>(session, predicate, 0, None)?;
    for entity in &matches {
        delete_entity_in::<T>(session, entity.to_record())?;
    }
    debug!(
        "event=repo_delete_where module=repo status=ok entity={} staged={}",
        T::SCHEMA.type_name,
        matches.len()
    );
    Ok(matches.len())
}

fn update_in<T: Entity>(
    session: &mut Session,
    entity: T,
    audit_field: Option<String>,
) -> RepoResult<EntryRef> {
    entity.validate()?;

    if let Some(field) = audit_field {
        match audit_merge(session, &entity, &field) {
            Ok(entry) => return Ok(entry),
            Err(err) => debug!(
                "event=repo_update module=repo status=audit_skipped entity={} reason={}",
                T::SCHEMA.type_name,
                err
            ),
        }
    }

    let record = entity.to_record();
    let expected_version = T::SCHEMA.version_of(&record);
    let (_, tracker) = session.parts()?;
    Ok(tracker.mark_modified(T::SCHEMA, record, expected_version))
}

/// Loads the persisted row for `incoming`, merges `incoming` onto it and
/// stages it with `incoming`'s version token as the commit-time original.
fn audit_merge<T: Entity>(
    session: &mut Session,
    incoming: &T,
    identity_field: &str,
) -> RepoResult<EntryRef> {
    let schema = T::SCHEMA;
    let field_not_found = || RepoError::FieldNotFound {
        entity: schema.type_name,
        field: identity_field.to_string(),
    };
    if identity_field.is_empty() {
        return Err(field_not_found());
    }

    let record = incoming.to_record();
    let id = match record.get(identity_field) {
        Some(Value::Integer(id)) => *id,
        _ => return Err(field_not_found()),
    };

    let mut persisted = get_by_id_in::<T>(session, id)?.ok_or(RepoError::NotFound {
        entity: schema.type_name,
        id,
    })?;
    persisted.merge_from(incoming);

    let (_, tracker) = session.parts()?;
    Ok(tracker.mark_modified(
        schema,
        persisted.to_record(),
        schema.version_of(&record),
    ))
}
