//! Owned connection plus typed entity-set accessors.
//!
//! # Responsibility
//! - Own exactly one SQLite connection for a unit-of-work session.
//! - Translate record-level reads and writes into SQL for one table.
//!
//! # Invariants
//! - Every value reaches SQLite as a bound parameter; only schema-declared
//!   column names are interpolated.
//! - Versioned writes compare the version token only when one is supplied.

use super::{open_db, open_db_in_memory, open_db_shared_memory, DbError, DbResult};
use crate::model::entity::{Entity, EntityId, EntitySchema, Record, UNSET_ID};
use log::warn;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use std::marker::PhantomData;
use std::path::Path;

/// Compiled `WHERE` fragment with its positional parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    pub sql: String,
    pub params: Vec<Value>,
}

impl WhereClause {
    /// Matches every row.
    pub fn all() -> Self {
        Self {
            sql: "1 = 1".to_string(),
            params: Vec::new(),
        }
    }
}

/// Persistence context for one session.
pub struct DbContext {
    conn: Connection,
}

impl DbContext {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        open_db(path).map(Self::new)
    }

    pub fn open_in_memory() -> DbResult<Self> {
        open_db_in_memory().map(Self::new)
    }

    pub fn open_shared_memory(uri: &str) -> DbResult<Self> {
        open_db_shared_memory(uri).map(Self::new)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Returns the entity set for `T` on this context's connection.
    pub fn set<T: Entity>(&self) -> EntitySet<'_, T> {
        EntitySet::new(&self.conn)
    }

    /// Releases the underlying connection.
    pub fn close(self) -> DbResult<()> {
        self.conn.close().map_err(|(_, err)| {
            warn!("event=db_close module=db status=error error={err}");
            DbError::from(err)
        })
    }
}

/// Key-ordered view over the persisted rows of one entity kind.
///
/// Borrows a connection (or an open transaction) and never owns it.
pub struct EntitySet<'conn, T: Entity> {
    conn: &'conn Connection,
    _entity: PhantomData<fn() -> T>,
}

impl<'conn, T: Entity> EntitySet<'conn, T> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self {
            conn,
            _entity: PhantomData,
        }
    }

    /// Loads one row by primary key.
    pub fn find(&self, id: EntityId) -> DbResult<Option<Record>> {
        find_record(self.conn, T::SCHEMA, id)
    }

    /// Loads matching rows ordered by key, with optional skip/take.
    pub fn select(
        &self,
        filter: &WhereClause,
        skip: u64,
        take: Option<u64>,
    ) -> DbResult<Vec<Record>> {
        select_records(self.conn, T::SCHEMA, filter, skip, take)
    }

    /// Counts matching rows, ignoring any pagination.
    pub fn count(&self, filter: &WhereClause) -> DbResult<u64> {
        count_records(self.conn, T::SCHEMA, filter)
    }

    /// Inserts one row and returns the store-generated identity.
    pub fn insert(&self, record: &Record) -> DbResult<EntityId> {
        insert_record(self.conn, T::SCHEMA, record)
    }

    /// Writes every non-key column and bumps the version token.
    pub fn update_versioned(
        &self,
        record: &Record,
        expected_version: Option<i64>,
    ) -> DbResult<usize> {
        update_record(self.conn, T::SCHEMA, record, expected_version)
    }

    /// Deletes one row, guarded by the version token when one is supplied.
    pub fn delete_versioned(&self, id: EntityId, expected_version: Option<i64>) -> DbResult<usize> {
        delete_record(self.conn, T::SCHEMA, id, expected_version)
    }
}

// Schema-driven row operations. The change tracker only knows entries by
// schema, so the commit path calls these directly.

pub(crate) fn find_record(
    conn: &Connection,
    schema: &'static EntitySchema,
    id: EntityId,
) -> DbResult<Option<Record>> {
    let sql = format!("{} WHERE {} = ?1", select_sql(schema), schema.key);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([id])?;
    match rows.next()? {
        Some(row) => Ok(Some(read_record(schema, row)?)),
        None => Ok(None),
    }
}

/// `skip == 0` emits no `OFFSET` clause.
pub(crate) fn select_records(
    conn: &Connection,
    schema: &'static EntitySchema,
    filter: &WhereClause,
    skip: u64,
    take: Option<u64>,
) -> DbResult<Vec<Record>> {
    let mut sql = format!(
        "{} WHERE {} ORDER BY {} ASC",
        select_sql(schema),
        filter.sql,
        schema.key
    );
    let mut bind_values = filter.params.clone();

    match take {
        Some(take) => {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(to_sql_int(take)));
        }
        None if skip > 0 => sql.push_str(" LIMIT -1"),
        None => {}
    }
    if skip > 0 {
        sql.push_str(" OFFSET ?");
        bind_values.push(Value::Integer(to_sql_int(skip)));
    }

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(bind_values))?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        records.push(read_record(schema, row)?);
    }
    Ok(records)
}

pub(crate) fn count_records(
    conn: &Connection,
    schema: &'static EntitySchema,
    filter: &WhereClause,
) -> DbResult<u64> {
    let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", schema.table, filter.sql);
    let count: i64 = conn.query_row(&sql, params_from_iter(filter.params.iter()), |row| {
        row.get(0)
    })?;
    Ok(u64::try_from(count).unwrap_or(0))
}

/// The version token, if declared, starts at `1`. A zero key is omitted so
/// the store assigns one.
pub(crate) fn insert_record(
    conn: &Connection,
    schema: &'static EntitySchema,
    record: &Record,
) -> DbResult<EntityId> {
    let version_column = schema.version_column();
    let mut columns = Vec::new();
    let mut bind_values = Vec::new();

    let id = schema.id_of(record);
    if id != UNSET_ID {
        columns.push(schema.key);
        bind_values.push(Value::Integer(id));
    }
    for column in schema.columns {
        columns.push(column.name);
        if Some(column.name) == version_column {
            bind_values.push(Value::Integer(1));
        } else {
            bind_values.push(record.get(column.name).cloned().unwrap_or(Value::Null));
        }
    }

    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        schema.table,
        columns.join(", ")
    );
    conn.execute(&sql, params_from_iter(bind_values))?;
    Ok(conn.last_insert_rowid())
}

/// Returns the affected row count; `0` means the row is gone or its version
/// no longer equals `expected_version`.
pub(crate) fn update_record(
    conn: &Connection,
    schema: &'static EntitySchema,
    record: &Record,
    expected_version: Option<i64>,
) -> DbResult<usize> {
    let version_column = schema.version_column();
    let mut assignments = Vec::new();
    let mut bind_values = Vec::new();

    for column in schema.columns {
        if Some(column.name) == version_column {
            assignments.push(format!("{0} = {0} + 1", column.name));
        } else {
            assignments.push(format!("{} = ?", column.name));
            bind_values.push(record.get(column.name).cloned().unwrap_or(Value::Null));
        }
    }

    let mut sql = format!(
        "UPDATE {} SET {} WHERE {} = ?",
        schema.table,
        assignments.join(", "),
        schema.key
    );
    bind_values.push(Value::Integer(schema.id_of(record)));
    push_version_guard(&mut sql, &mut bind_values, version_column, expected_version);

    Ok(conn.execute(&sql, params_from_iter(bind_values))?)
}

pub(crate) fn delete_record(
    conn: &Connection,
    schema: &'static EntitySchema,
    id: EntityId,
    expected_version: Option<i64>,
) -> DbResult<usize> {
    let mut sql = format!("DELETE FROM {} WHERE {} = ?", schema.table, schema.key);
    let mut bind_values = vec![Value::Integer(id)];
    push_version_guard(
        &mut sql,
        &mut bind_values,
        schema.version_column(),
        expected_version,
    );

    Ok(conn.execute(&sql, params_from_iter(bind_values))?)
}

fn select_sql(schema: &EntitySchema) -> String {
    let columns = schema.all_columns().collect::<Vec<_>>().join(", ");
    format!("SELECT {columns} FROM {}", schema.table)
}

fn read_record(schema: &'static EntitySchema, row: &Row<'_>) -> DbResult<Record> {
    let mut record = Record::new();
    for (index, column) in schema.all_columns().enumerate() {
        record.insert(column, row.get::<_, Value>(index)?);
    }
    Ok(record)
}

fn push_version_guard(
    sql: &mut String,
    bind_values: &mut Vec<Value>,
    version_column: Option<&'static str>,
    expected_version: Option<i64>,
) {
    if let (Some(column), Some(version)) = (version_column, expected_version) {
        sql.push_str(&format!(" AND {column} = ?"));
        bind_values.push(Value::Integer(version));
    }
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::{DbContext, WhereClause};
    use crate::model::dev_test::DevTest;
    use crate::model::entity::Entity;
    use rusqlite::types::Value;

    #[test]
    fn insert_assigns_identity_and_initial_version() {
        let context = DbContext::open_in_memory().unwrap();
        let set = context.set::<DevTest>();

        let id = set.insert(&DevTest::new("launch").to_record()).unwrap();
        let stored = DevTest::from_record(&set.find(id).unwrap().unwrap()).unwrap();

        assert_eq!(stored.id, id);
        assert_eq!(stored.row_version, 1);
        assert_eq!(stored.campaign_name.as_deref(), Some("launch"));
    }

    #[test]
    fn versioned_update_rejects_stale_token() {
        let context = DbContext::open_in_memory().unwrap();
        let set = context.set::<DevTest>();
        let id = set.insert(&DevTest::new("launch").to_record()).unwrap();

        let mut record = set.find(id).unwrap().unwrap();
        record.insert("clicks", Value::Integer(5));

        assert_eq!(set.update_versioned(&record, Some(1)).unwrap(), 1);
        assert_eq!(set.update_versioned(&record, Some(1)).unwrap(), 0);
        assert_eq!(set.update_versioned(&record, None).unwrap(), 1);
        assert_eq!(set.delete_versioned(id, Some(2)).unwrap(), 0);
        assert_eq!(set.delete_versioned(id, Some(3)).unwrap(), 1);
        assert!(set.find(id).unwrap().is_none());
    }

    #[test]
    fn select_applies_offset_without_limit() {
        let context = DbContext::open_in_memory().unwrap();
        let set = context.set::<DevTest>();
        for name in ["a", "b", "c"] {
            set.insert(&DevTest::new(name).to_record()).unwrap();
        }

        let tail = set.select(&WhereClause::all(), 1, None).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(set.count(&WhereClause::all()).unwrap(), 3);
    }

    #[test]
    fn close_releases_connection() {
        let context = DbContext::open_in_memory().unwrap();
        context.close().unwrap();
    }
}
