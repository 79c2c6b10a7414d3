//! Generic data-access layer: repository, change tracker and unit of work.
//!
//! # Responsibility
//! - Stage inserts/updates/deletes per entity kind (`Repository<T>`).
//! - Commit staged changes atomically (`UnitOfWork::save`).
//! - Report semantic failures (`NotFound`, `ConcurrencyConflict`) alongside
//!   store transport errors.
//!
//! # Invariants
//! - Nothing reaches the store before `save`.
//! - A concurrency conflict refreshes the tracked entry and is re-raised,
//!   never retried.

use crate::db::DbError;
use crate::model::entity::{EntityError, EntityId, Record};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod query;
pub mod repository;
pub mod tracker;
pub mod unit_of_work;

pub type RepoResult<T> = Result<T, RepoError>;

/// Error returned by every repository, unit-of-work and service call.
#[derive(Debug)]
pub enum RepoError {
    /// Store transport or schema failure, propagated unchanged.
    Db(DbError),
    /// A by-id operation targeted a row that does not exist.
    NotFound { entity: &'static str, id: EntityId },
    /// The row changed (or vanished) since it was read.
    ///
    /// `current` holds the persisted state that was reloaded into the
    /// tracked entry, or `None` when the row no longer exists.
    ConcurrencyConflict {
        entity: &'static str,
        id: EntityId,
        current: Option<Record>,
    },
    /// Identity-field resolution failed on the audit path.
    FieldNotFound { entity: &'static str, field: String },
    /// A predicate referenced a column the entity does not declare.
    UnknownColumn { entity: &'static str, column: String },
    Validation(String),
    InvalidData(String),
    /// The owning unit of work was disposed.
    Disposed,
    /// The session could not be reached (poisoned lock, failed blocking task).
    StoreUnavailable(String),
}

impl RepoError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::ConcurrencyConflict { entity, id, .. } => write!(
                f,
                "{entity} {id} was modified or deleted since it was loaded"
            ),
            Self::FieldNotFound { entity, field } => {
                write!(f, "identity field `{field}` not found on {entity}")
            }
            Self::UnknownColumn { entity, column } => {
                write!(f, "unknown column `{column}` for {entity}")
            }
            Self::Validation(message) => write!(f, "validation failed: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Disposed => write!(f, "unit of work already disposed"),
            Self::StoreUnavailable(message) => write!(f, "store unavailable: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<EntityError> for RepoError {
    fn from(value: EntityError) -> Self {
        match value {
            EntityError::Validation(message) => Self::Validation(message),
            invalid @ EntityError::InvalidData { .. } => Self::InvalidData(invalid.to_string()),
        }
    }
}
