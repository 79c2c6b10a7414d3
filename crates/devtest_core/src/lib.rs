//! Core data-access layer for DevTest campaign metrics.
//! Generic repository and unit of work over SQLite, plus the DevTest
//! service, controller facade and change notifications built on them.

pub mod config;
pub mod controller;
pub mod db;
pub mod logging;
pub mod model;
pub mod notify;
pub mod repo;
pub mod service;

pub use config::{StoreConfig, DB_PATH_ENV};
pub use controller::{ControllerError, ControllerResult, DevTestController, DevTestView};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::dev_test::{DevTest, DevTestDto};
pub use model::entity::{Entity, EntityId, EntitySchema, UNSET_ID};
pub use model::identity::{identity_field_by_convention, IdentityMap};
pub use notify::{ChangeNotifier, DataChanged};
pub use repo::query::{Page, Predicate, Query, DEFAULT_PAGE_SIZE};
pub use repo::repository::Repository;
pub use repo::tracker::{EntityState, EntryRef};
pub use repo::unit_of_work::UnitOfWork;
pub use repo::{RepoError, RepoResult};
pub use service::dev_test_service::DevTestService;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
