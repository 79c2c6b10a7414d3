//! Store configuration.
//!
//! # Responsibility
//! - Describe where the SQLite store lives and the default page size.
//! - Resolve configuration from the process environment.
//!
//! # Invariants
//! - `db_path = None` means one named in-memory database per config value.
//!   Clones share it; separate `in_memory()` configs never do.
//! - The in-memory database lives as long as the config (an anchor
//!   connection keeps it open between sessions).

use crate::db::{open_db_shared_memory, DbContext, DbResult};
use crate::repo::query::DEFAULT_PAGE_SIZE;
use once_cell::sync::OnceCell;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Environment variable overriding the database file location.
pub const DB_PATH_ENV: &str = "DEVTEST_DB_PATH";

const DEFAULT_DB_FILE_NAME: &str = "devtest.sqlite3";

static NEXT_MEMORY_DB: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file. `None` uses this config's in-memory database.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default = "default_page_size")]
    pub default_page_size: u64,
    #[serde(skip, default = "SharedMemory::fresh")]
    memory: Arc<SharedMemory>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Shared-cache in-memory database; the anchor is opened on first use and
/// closed when the last config clone is dropped.
struct SharedMemory {
    uri: String,
    anchor: OnceCell<Mutex<Connection>>,
}

impl SharedMemory {
    fn fresh() -> Arc<Self> {
        let serial = NEXT_MEMORY_DB.fetch_add(1, Ordering::Relaxed);
        Arc::new(Self {
            uri: format!(
                "file:devtest-{}-{serial}?mode=memory&cache=shared",
                std::process::id()
            ),
            anchor: OnceCell::new(),
        })
    }

    fn open_context(&self) -> DbResult<DbContext> {
        self.anchor
            .get_or_try_init(|| open_db_shared_memory(&self.uri).map(Mutex::new))?;
        DbContext::open_shared_memory(&self.uri)
    }
}

impl Debug for SharedMemory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMemory")
            .field("uri", &self.uri)
            .field("anchored", &self.anchor.get().is_some())
            .finish()
    }
}

impl StoreConfig {
    /// A new in-memory database, isolated from every other `in_memory()`.
    pub fn in_memory() -> Self {
        Self {
            db_path: None,
            default_page_size: DEFAULT_PAGE_SIZE,
            memory: SharedMemory::fresh(),
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: Some(path.into()),
            default_page_size: DEFAULT_PAGE_SIZE,
            memory: SharedMemory::fresh(),
        }
    }

    /// Reads `DEVTEST_DB_PATH`; falls back to `devtest.sqlite3` in the temp dir.
    pub fn from_env() -> Self {
        Self::file(resolve_db_path(std::env::var(DB_PATH_ENV).ok().as_deref()))
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.default_page_size = page_size;
        self
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Opens a new persistence context; every call yields its own connection
    /// to the same database.
    pub fn open_context(&self) -> DbResult<DbContext> {
        match &self.db_path {
            Some(path) => DbContext::open(path),
            None => self.memory.open_context(),
        }
    }
}

fn default_page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

fn resolve_db_path(raw: Option<&str>) -> PathBuf {
    match raw.map(str::trim) {
        Some(trimmed) if !trimmed.is_empty() => PathBuf::from(trimmed),
        _ => std::env::temp_dir().join(DEFAULT_DB_FILE_NAME),
    }
}

#[cfg(test)]
mod tests {
    use super::{resolve_db_path, StoreConfig, DEFAULT_DB_FILE_NAME};
    use crate::repo::query::DEFAULT_PAGE_SIZE;
    use std::path::PathBuf;

    #[test]
    fn blank_env_value_falls_back_to_temp_dir() {
        let fallback = std::env::temp_dir().join(DEFAULT_DB_FILE_NAME);
        assert_eq!(resolve_db_path(None), fallback);
        assert_eq!(resolve_db_path(Some("   ")), fallback);
        assert_eq!(
            resolve_db_path(Some(" /data/devtest.db ")),
            PathBuf::from("/data/devtest.db")
        );
    }

    #[test]
    fn page_size_defaults_when_missing_from_serialized_config() {
        let config: StoreConfig = serde_json::from_str(r#"{"db_path":"/tmp/x.db"}"#).unwrap();
        assert_eq!(config.default_page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.db_path(), Some(PathBuf::from("/tmp/x.db").as_path()));
    }

    #[test]
    fn in_memory_contexts_share_rows_per_config() {
        let config = StoreConfig::in_memory();
        let writer = config.open_context().unwrap();
        writer
            .connection()
            .execute("INSERT INTO dev_tests (campaign_name) VALUES ('shared')", [])
            .unwrap();
        writer.close().unwrap();

        let count = |config: &StoreConfig| -> i64 {
            let context = config.open_context().unwrap();
            let rows = context
                .connection()
                .query_row("SELECT COUNT(*) FROM dev_tests", [], |row| row.get(0))
                .unwrap();
            context.close().unwrap();
            rows
        };
        assert_eq!(count(&config), 1);
        assert_eq!(count(&config.clone()), 1);
        assert_eq!(count(&StoreConfig::in_memory()), 0);
    }
}
