//! Storage contract shared by every persisted entity kind.
//!
//! # Responsibility
//! - Describe an entity's table shape declaratively (`EntitySchema`).
//! - Convert entities to and from column-keyed records.
//!
//! # Invariants
//! - Identity `0` (`UNSET_ID`) means "not yet persisted".
//! - Version token `0` means "unknown"; persisted tokens start at `1`.
//! - At most one column per schema is flagged as the version token.

use rusqlite::types::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Store-generated primary key.
pub type EntityId = i64;

/// Identity sentinel for records that were never persisted.
pub const UNSET_ID: EntityId = 0;

/// One row keyed by column name.
pub type Record = BTreeMap<&'static str, Value>;

/// Single non-key column of an entity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    /// Compared on commit instead of being overwritten by audit merges.
    pub version_token: bool,
}

impl ColumnDef {
    pub const fn value(name: &'static str) -> Self {
        Self {
            name,
            version_token: false,
        }
    }

    pub const fn version_token(name: &'static str) -> Self {
        Self {
            name,
            version_token: true,
        }
    }
}

/// Static table description for one entity kind.
#[derive(Debug)]
pub struct EntitySchema {
    /// Logical type name, used for identity-map lookups and diagnostics.
    pub type_name: &'static str,
    pub table: &'static str,
    /// Store-generated integer primary key column.
    pub key: &'static str,
    /// Non-key columns in storage order.
    pub columns: &'static [ColumnDef],
}

impl EntitySchema {
    /// Returns the version-token column, if the entity declares one.
    pub fn version_column(&self) -> Option<&'static str> {
        self.columns
            .iter()
            .find(|column| column.version_token)
            .map(|column| column.name)
    }

    /// Resolves a caller-supplied column name to its static spelling.
    pub fn column(&self, name: &str) -> Option<&'static str> {
        if name == self.key {
            return Some(self.key);
        }
        self.columns
            .iter()
            .find(|column| column.name == name)
            .map(|column| column.name)
    }

    /// Key column followed by every other column, in storage order.
    pub fn all_columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        std::iter::once(self.key).chain(self.columns.iter().map(|column| column.name))
    }

    /// Reads the identity value out of a record.
    pub fn id_of(&self, record: &Record) -> EntityId {
        match record.get(self.key) {
            Some(Value::Integer(id)) => *id,
            _ => UNSET_ID,
        }
    }

    /// Reads the version token out of a record; `None` when absent or unknown.
    pub fn version_of(&self, record: &Record) -> Option<i64> {
        let column = self.version_column()?;
        match record.get(column) {
            Some(Value::Integer(version)) if *version > 0 => Some(*version),
            _ => None,
        }
    }
}

/// Failure converting or validating one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityError {
    /// Field values violate a model constraint.
    Validation(String),
    /// A stored column value has an unexpected type or shape.
    InvalidData {
        column: &'static str,
        message: String,
    },
}

impl Display for EntityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(message) => write!(f, "{message}"),
            Self::InvalidData { column, message } => {
                write!(f, "invalid value in column `{column}`: {message}")
            }
        }
    }
}

impl Error for EntityError {}

/// Capability set required by the generic repository.
///
/// Implementors map one Rust struct onto one table described by `SCHEMA`.
pub trait Entity: Clone + Send + 'static {
    const SCHEMA: &'static EntitySchema;

    fn id(&self) -> EntityId;

    fn set_id(&mut self, id: EntityId);

    /// Produces a record holding the key and every column in `SCHEMA`.
    fn to_record(&self) -> Record;

    fn from_record(record: &Record) -> Result<Self, EntityError>;

    /// Copies every settable field from `incoming` onto `self`.
    ///
    /// Identity and version token are left untouched.
    fn merge_from(&mut self, incoming: &Self);

    /// Rejects values the store would refuse. Runs before any write is staged.
    fn validate(&self) -> Result<(), EntityError> {
        Ok(())
    }
}

pub(crate) fn int_column(record: &Record, column: &'static str) -> Result<Option<i64>, EntityError> {
    match record.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Integer(value)) => Ok(Some(*value)),
        Some(other) => Err(EntityError::InvalidData {
            column,
            message: format!("expected integer, got {:?}", other.data_type()),
        }),
    }
}

pub(crate) fn i32_column(record: &Record, column: &'static str) -> Result<Option<i32>, EntityError> {
    int_column(record, column)?
        .map(|value| {
            i32::try_from(value).map_err(|_| EntityError::InvalidData {
                column,
                message: format!("value {value} does not fit in 32 bits"),
            })
        })
        .transpose()
}

pub(crate) fn text_column(
    record: &Record,
    column: &'static str,
) -> Result<Option<String>, EntityError> {
    match record.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Text(value)) => Ok(Some(value.clone())),
        Some(other) => Err(EntityError::InvalidData {
            column,
            message: format!("expected text, got {:?}", other.data_type()),
        }),
    }
}

pub(crate) fn optional_value<T: Into<Value>>(value: Option<T>) -> Value {
    value.map_or(Value::Null, Into::into)
}
