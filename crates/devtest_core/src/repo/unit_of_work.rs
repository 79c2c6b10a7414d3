//! Unit of work: session ownership and transactional commit.
//!
//! # Responsibility
//! - Own one persistence context and its change tracker.
//! - Flush every staged change in a single SQLite transaction.
//! - Reload the conflicting entry on an optimistic-concurrency failure and
//!   re-raise the conflict to the caller.
//!
//! # Invariants
//! - A unit of work serves one logical operation and is never shared
//!   between concurrent operations.
//! - The connection is released exactly once; `dispose` and
//!   `dispose_async` are idempotent.
//! - A failed `save` leaves the store untouched (the transaction rolls back).

use crate::config::StoreConfig;
use crate::db::context::{delete_record, find_record, insert_record, update_record};
use crate::db::DbContext;
use crate::model::entity::{Entity, EntityId};
use crate::repo::tracker::{ChangeTracker, EntityState, TrackedEntry};
use crate::repo::{RepoError, RepoResult};
use log::{debug, info, warn};
use rusqlite::{Connection, Transaction};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

pub(crate) struct Session {
    context: Option<DbContext>,
    tracker: ChangeTracker,
}

impl Session {
    /// Splits the session into its context and tracker.
    pub(crate) fn parts(&mut self) -> RepoResult<(&mut DbContext, &mut ChangeTracker)> {
        let context = self.context.as_mut().ok_or(RepoError::Disposed)?;
        Ok((context, &mut self.tracker))
    }

    pub(crate) fn tracker(&self) -> RepoResult<&ChangeTracker> {
        if self.context.is_none() {
            return Err(RepoError::Disposed);
        }
        Ok(&self.tracker)
    }
}

/// Session-scoped owner of one store connection and its pending changes.
pub struct UnitOfWork {
    session: Arc<Mutex<Session>>,
}

impl UnitOfWork {
    pub fn new(context: DbContext) -> Self {
        Self {
            session: Arc::new(Mutex::new(Session {
                context: Some(context),
                tracker: ChangeTracker::default(),
            })),
        }
    }

    /// Opens the store described by `config` and wraps it in a new session.
    pub fn open(config: &StoreConfig) -> RepoResult<Self> {
        Ok(Self::new(config.open_context()?))
    }

    /// Same as [`UnitOfWork::open`], with connection bootstrap moved off the
    /// calling task.
    pub async fn open_async(config: &StoreConfig) -> RepoResult<Self> {
        let config = config.clone();
        tokio::task::spawn_blocking(move || Self::open(&config))
            .await
            .map_err(|err| RepoError::StoreUnavailable(format!("spawn_blocking failed: {err}")))?
    }

    /// Commits every staged change and returns how many entries were written.
    ///
    /// # Errors
    /// - `ConcurrencyConflict` when an update or delete matched no row. The
    ///   conflicting entry is refreshed from the store before returning.
    /// - Any store failure, unchanged. Tracked state is left as staged.
    pub fn save(&self) -> RepoResult<usize> {
        self.with_session(flush)
    }

    pub async fn save_async(&self) -> RepoResult<usize> {
        self.run_blocking(flush).await
    }

    /// Releases the connection and forgets tracked entries.
    ///
    /// Later calls are no-ops; later repository calls fail with `Disposed`.
    pub fn dispose(&self) {
        dispose_session(&self.session);
    }

    /// Same as [`UnitOfWork::dispose`], with the connection close moved off
    /// the calling task.
    pub async fn dispose_async(&self) {
        let session = Arc::clone(&self.session);
        if let Err(err) = tokio::task::spawn_blocking(move || dispose_session(&session)).await {
            warn!("event=uow_dispose module=repo status=error error_code=spawn_blocking_failed error={err}");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .context
            .is_none()
    }

    /// Number of entries the next `save` would write.
    pub fn pending_changes(&self) -> RepoResult<usize> {
        self.with_session(|session| Ok(session.tracker()?.pending()))
    }

    /// Tracking state of the `T` row with identity `id`.
    pub fn entity_state<T: Entity>(&self, id: EntityId) -> RepoResult<EntityState> {
        self.with_session(|session| Ok(session.tracker()?.state_of(T::SCHEMA, id)))
    }

    pub(crate) fn with_session<R>(
        &self,
        f: impl FnOnce(&mut Session) -> RepoResult<R>,
    ) -> RepoResult<R> {
        let mut session = lock_session(&self.session)?;
        f(&mut session)
    }

    /// Runs `f` on tokio's blocking pool so store I/O never stalls the caller.
    pub(crate) async fn run_blocking<R, F>(&self, f: F) -> RepoResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Session) -> RepoResult<R> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            let mut session = lock_session(&session)?;
            f(&mut session)
        })
        .await
        .map_err(|err| RepoError::StoreUnavailable(format!("spawn_blocking failed: {err}")))?
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn dispose_session(session: &Mutex<Session>) {
    let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(context) = session.context.take() else {
        return;
    };
    let discarded = session.tracker.pending();
    session.tracker.clear();

    match context.close() {
        Ok(()) => info!("event=uow_dispose module=repo status=ok discarded_changes={discarded}"),
        Err(err) => warn!(
            "event=uow_dispose module=repo status=error discarded_changes={discarded} error={err}"
        ),
    }
}

fn lock_session(session: &Mutex<Session>) -> RepoResult<MutexGuard<'_, Session>> {
    session
        .lock()
        .map_err(|err| RepoError::StoreUnavailable(format!("session mutex poisoned: {err}")))
}

enum Applied {
    Inserted { serial: u64, id: EntityId },
    Updated { serial: u64 },
    Deleted { serial: u64 },
}

fn flush(session: &mut Session) -> RepoResult<usize> {
    let started_at = Instant::now();
    let (context, tracker) = session.parts()?;
    let pending = tracker.pending();
    if pending == 0 {
        debug!("event=uow_save module=repo status=ok changes=0");
        return Ok(0);
    }

    let tx = context.connection_mut().transaction()?;
    let mut applied = Vec::with_capacity(pending);
    let mut conflict = None;

    for entry in tracker.entries() {
        match write_entry(&tx, entry)? {
            Some(outcome) => applied.push(outcome),
            None if entry.state == EntityState::Unchanged => {}
            None => {
                conflict = Some((entry.serial, entry.schema, entry.id()));
                break;
            }
        }
    }

    if let Some((serial, schema, id)) = conflict {
        tx.rollback()?;
        warn!(
            "event=uow_save module=repo status=conflict entity={} id={id} duration_ms={}",
            schema.type_name,
            started_at.elapsed().as_millis()
        );
        let current = find_record(context.connection(), schema, id)?;
        match current.clone() {
            Some(persisted) => tracker.refresh(serial, persisted),
            None => tracker.forget(serial),
        }
        return Err(RepoError::ConcurrencyConflict {
            entity: schema.type_name,
            id,
            current,
        });
    }

    tx.commit()?;

    let written = applied.len();
    for outcome in applied {
        match outcome {
            Applied::Inserted { serial, id } => tracker.complete_insert(serial, id),
            Applied::Updated { serial } => tracker.complete_update(serial),
            Applied::Deleted { serial } => tracker.complete_delete(serial),
        }
    }

    info!(
        "event=uow_save module=repo status=ok changes={written} duration_ms={}",
        started_at.elapsed().as_millis()
    );
    Ok(written)
}

/// Writes one entry inside `tx`.
///
/// Returns `None` for unchanged entries and for updates/deletes that matched
/// no row (a conflict).
fn write_entry(tx: &Transaction<'_>, entry: &TrackedEntry) -> RepoResult<Option<Applied>> {
    let conn: &Connection = tx;
    let serial = entry.serial;
    let outcome = match entry.state {
        EntityState::Added => {
            let id = insert_record(conn, entry.schema, &entry.current)?;
            Some(Applied::Inserted { serial, id })
        }
        EntityState::Modified => {
            let changed =
                update_record(conn, entry.schema, &entry.current, entry.original_version)?;
            (changed > 0).then_some(Applied::Updated { serial })
        }
        EntityState::Deleted => {
            let changed = delete_record(conn, entry.schema, entry.id(), entry.original_version)?;
            (changed > 0).then_some(Applied::Deleted { serial })
        }
        EntityState::Unchanged | EntityState::Detached => None,
    };
    Ok(outcome)
}
