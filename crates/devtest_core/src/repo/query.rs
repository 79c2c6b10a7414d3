//! Predicates, lazy queries and pages.
//!
//! # Responsibility
//! - Describe row filters independently of SQL (`Predicate`).
//! - Defer execution until a query is enumerated (`Query::load`).
//!
//! # Invariants
//! - Predicate columns must exist in the entity schema.
//! - Predicate values are always bound, never interpolated.
//! - Results are ordered by primary key ascending.

use crate::db::WhereClause;
use crate::model::entity::{Entity, EntitySchema};
use crate::repo::tracker::ChangeTracker;
use crate::repo::unit_of_work::{Session, UnitOfWork};
use crate::repo::{RepoError, RepoResult};
use rusqlite::types::Value;
use std::marker::PhantomData;

/// Page size used when callers do not pick one.
pub const DEFAULT_PAGE_SIZE: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl CompareOp {
    fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Like => "LIKE",
        }
    }
}

/// Store-agnostic row filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Always,
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    IsNull(String),
    IsNotNull(String),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn always() -> Self {
        Self::Always
    }

    pub fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// Equality; comparing against `NULL` becomes `IS NULL`.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ne, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Le, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Gt, value)
    }

    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ge, value)
    }

    /// SQL `LIKE` with the caller's own wildcards.
    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::compare(column, CompareOp::Like, Value::Text(pattern.into()))
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::IsNull(column.into())
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Self::IsNotNull(column.into())
    }

    pub fn and(self, other: Predicate) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Compiles into a `WHERE` fragment for `schema`.
    pub fn compile(&self, schema: &'static EntitySchema) -> RepoResult<WhereClause> {
        let mut clause = WhereClause::default();
        self.write_sql(schema, &mut clause)?;
        Ok(clause)
    }

    fn write_sql(&self, schema: &'static EntitySchema, out: &mut WhereClause) -> RepoResult<()> {
        match self {
            Self::Always => out.sql.push_str("1 = 1"),
            Self::Compare {
                column,
                op: CompareOp::Eq,
                value: Value::Null,
            }
            | Self::IsNull(column) => {
                let column = resolve_column(schema, column)?;
                out.sql.push_str(&format!("{column} IS NULL"));
            }
            Self::Compare {
                column,
                op: CompareOp::Ne,
                value: Value::Null,
            }
            | Self::IsNotNull(column) => {
                let column = resolve_column(schema, column)?;
                out.sql.push_str(&format!("{column} IS NOT NULL"));
            }
            Self::Compare { column, op, value } => {
                let column = resolve_column(schema, column)?;
                out.sql.push_str(&format!("{column} {} ?", op.sql()));
                out.params.push(value.clone());
            }
            Self::And(left, right) => write_binary(schema, out, left, "AND", right)?,
            Self::Or(left, right) => write_binary(schema, out, left, "OR", right)?,
            Self::Not(inner) => {
                out.sql.push_str("NOT (");
                inner.write_sql(schema, out)?;
                out.sql.push(')');
            }
        }
        Ok(())
    }
}

fn write_binary(
    schema: &'static EntitySchema,
    out: &mut WhereClause,
    left: &Predicate,
    keyword: &str,
    right: &Predicate,
) -> RepoResult<()> {
    out.sql.push('(');
    left.write_sql(schema, out)?;
    out.sql.push_str(&format!(" {keyword} "));
    right.write_sql(schema, out)?;
    out.sql.push(')');
    Ok(())
}

fn resolve_column(schema: &'static EntitySchema, column: &str) -> RepoResult<&'static str> {
    schema
        .column(column)
        .ok_or_else(|| RepoError::UnknownColumn {
            entity: schema.type_name,
            column: column.to_string(),
        })
}

/// One page of a filtered result plus the unpaginated match count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Count of every match, ignoring pagination.
    pub total: u64,
    /// Zero-based.
    pub page_index: u64,
    pub page_size: u64,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page_index: self.page_index,
            page_size: self.page_size,
        }
    }

    pub fn page_count(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total.div_ceil(self.page_size)
    }
}

/// Deferred query over one entity kind. Nothing runs until `load`, `first`
/// or `count` is called.
pub struct Query<'uow, T: Entity> {
    uow: &'uow UnitOfWork,
    predicate: Predicate,
    skip: u64,
    take: Option<u64>,
    _entity: PhantomData<fn() -> T>,
}

impl<'uow, T: Entity> Query<'uow, T> {
    pub(crate) fn new(uow: &'uow UnitOfWork, predicate: Predicate) -> Self {
        Self {
            uow,
            predicate,
            skip: 0,
            take: None,
            _entity: PhantomData,
        }
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// Narrows the filter with an extra `AND` condition.
    pub fn and(mut self, predicate: Predicate) -> Self {
        self.predicate = self.predicate.and(predicate);
        self
    }

    pub fn skip(mut self, count: u64) -> Self {
        self.skip = count;
        self
    }

    pub fn take(mut self, count: u64) -> Self {
        self.take = Some(count);
        self
    }

    /// Executes the query; loaded rows become tracked as `Unchanged`.
    pub fn load(&self) -> RepoResult<Vec<T>> {
        let (skip, take) = (self.skip, self.take);
        self.uow
            .with_session(|session| load_in::<T>(session, &self.predicate, skip, take))
    }

    pub async fn load_async(&self) -> RepoResult<Vec<T>> {
        let predicate = self.predicate.clone();
        let (skip, take) = (self.skip, self.take);
        self.uow
            .run_blocking(move |session| load_in::<T>(session, &predicate, skip, take))
            .await
    }

    pub fn first(&self) -> RepoResult<Option<T>> {
        let predicate = &self.predicate;
        let skip = self.skip;
        self.uow
            .with_session(|session| load_in::<T>(session, predicate, skip, Some(1)))
            .map(|items| items.into_iter().next())
    }

    /// Counts matches, ignoring `skip`/`take`.
    pub fn count(&self) -> RepoResult<u64> {
        self.uow
            .with_session(|session| count_in::<T>(session, &self.predicate))
    }

    pub async fn count_async(&self) -> RepoResult<u64> {
        let predicate = self.predicate.clone();
        self.uow
            .run_blocking(move |session| count_in::<T>(session, &predicate))
            .await
    }
}

pub(crate) fn load_in<T: Entity>(
    session: &mut Session,
    predicate: &Predicate,
    skip: u64,
    take: Option<u64>,
) -> RepoResult<Vec<T>> {
    let (context, tracker) = session.parts()?;
    let filter = session_filter(T::SCHEMA, predicate, tracker)?;
    let records = context.set::<T>().select(&filter, skip, take)?;

    records
        .into_iter()
        .filter_map(|record| tracker.track_loaded(T::SCHEMA, record))
        .map(|record| T::from_record(&record).map_err(RepoError::from))
        .collect()
}

pub(crate) fn count_in<T: Entity>(session: &mut Session, predicate: &Predicate) -> RepoResult<u64> {
    let (context, tracker) = session.parts()?;
    let filter = session_filter(T::SCHEMA, predicate, tracker)?;
    Ok(context.set::<T>().count(&filter)?)
}

/// Compiles `predicate` and excludes rows this session staged for deletion,
/// so `LIMIT`/`OFFSET` and `COUNT(*)` only see rows the caller can observe.
fn session_filter(
    schema: &'static EntitySchema,
    predicate: &Predicate,
    tracker: &ChangeTracker,
) -> RepoResult<WhereClause> {
    let mut filter = predicate.compile(schema)?;
    let hidden = tracker.deleted_ids(schema);
    if hidden.is_empty() {
        return Ok(filter);
    }

    let placeholders = vec!["?"; hidden.len()].join(", ");
    filter.sql = format!("({}) AND {} NOT IN ({placeholders})", filter.sql, schema.key);
    filter
        .params
        .extend(hidden.into_iter().map(Value::Integer));
    Ok(filter)
}

/// Counts all matches, then fetches one page of them.
///
/// The two reads are not snapshot-isolated; a concurrent writer can make
/// `total` disagree with the page contents.
pub(crate) fn page_in<T: Entity>(
    session: &mut Session,
    predicate: &Predicate,
    page_index: u64,
    page_size: u64,
) -> RepoResult<Page<T>> {
    let total = count_in::<T>(session, predicate)?;
    let items = if page_size == 0 {
        Vec::new()
    } else {
        let skip = page_index.saturating_mul(page_size);
        load_in::<T>(session, predicate, skip, Some(page_size))?
    };

    Ok(Page {
        items,
        total,
        page_index,
        page_size,
    })
}
