//! DevTest use-case service.
//!
//! # Responsibility
//! - Provide list/get/save/delete/page entry points over `DevTestDto`.
//! - Commit exactly once per mutating call.
//!
//! # Invariants
//! - Identity `0` on save means "new row"; any other identity is an update.
//! - Service APIs never bypass repository validation or the unit of work.

use crate::model::dev_test::{DevTest, DevTestDto};
use crate::model::entity::{EntityId, UNSET_ID};
use crate::model::identity::IdentityMap;
use crate::repo::query::{Page, Predicate};
use crate::repo::repository::Repository;
use crate::repo::tracker::EntryRef;
use crate::repo::unit_of_work::UnitOfWork;
use crate::repo::{RepoError, RepoResult};
use log::info;

/// Use-case service for DevTest rows, bound to one unit of work.
pub struct DevTestService<'uow> {
    uow: &'uow UnitOfWork,
    repo: Repository<'uow, DevTest>,
}

impl<'uow> DevTestService<'uow> {
    pub fn new(uow: &'uow UnitOfWork) -> Self {
        let identities = IdentityMap::new().with("DevTest", "id");
        Self {
            uow,
            repo: Repository::new(uow, &identities),
        }
    }

    pub fn repository(&self) -> &Repository<'uow, DevTest> {
        &self.repo
    }

    /// Every row, ordered by identity.
    pub fn list_all(&self) -> RepoResult<Vec<DevTestDto>> {
        let rows = self.repo.all().load()?;
        Ok(rows.into_iter().map(DevTestDto::from).collect())
    }

    pub async fn list_all_async(&self) -> RepoResult<Vec<DevTestDto>> {
        let rows = self.repo.all().load_async().await?;
        Ok(rows.into_iter().map(DevTestDto::from).collect())
    }

    /// # Errors
    /// - `NotFound` when no row has identity `id`.
    pub fn get_by_id(&self, id: EntityId) -> RepoResult<DevTestDto> {
        self.repo
            .get_by_id(id)?
            .map(DevTestDto::from)
            .ok_or_else(|| not_found(id))
    }

    pub async fn get_by_id_async(&self, id: EntityId) -> RepoResult<DevTestDto> {
        self.repo
            .get_by_id_async(id)
            .await?
            .map(DevTestDto::from)
            .ok_or_else(|| not_found(id))
    }

    /// Inserts or updates one row, commits, and returns its identity.
    ///
    /// # Contract
    /// - `dto.id == 0` inserts and returns the store-assigned identity.
    /// - Otherwise updates without audit; a non-zero `row_version` is
    ///   checked against the store on commit.
    pub fn save(&self, dto: DevTestDto) -> RepoResult<EntityId> {
        let is_new = dto.id == UNSET_ID;
        let entity = DevTest::from(dto);
        let entry = if is_new {
            self.repo.insert(entity)?
        } else {
            self.repo.update(entity, false)?
        };
        self.uow.save()?;
        self.saved_id(entry, is_new)
    }

    pub async fn save_async(&self, dto: DevTestDto) -> RepoResult<EntityId> {
        let is_new = dto.id == UNSET_ID;
        let entity = DevTest::from(dto);
        let entry = if is_new {
            self.repo.insert_async(entity).await?
        } else {
            self.repo.update_async(entity, false).await?
        };
        self.uow.save_async().await?;
        self.saved_id(entry, is_new)
    }

    /// Deletes the row with identity `id` and commits.
    ///
    /// # Errors
    /// - `NotFound` when no row has identity `id`.
    pub fn delete(&self, id: EntityId) -> RepoResult<()> {
        self.repo.delete_by_id(id)?;
        self.uow.save()?;
        info!("event=devtest_delete module=service status=ok id={id}");
        Ok(())
    }

    pub async fn delete_async(&self, id: EntityId) -> RepoResult<()> {
        self.repo.delete_by_id_async(id).await?;
        self.uow.save_async().await?;
        info!("event=devtest_delete module=service status=ok id={id}");
        Ok(())
    }

    /// One zero-based page of rows plus the total row count.
    pub fn page(&self, page_index: u64, page_size: u64) -> RepoResult<Page<DevTestDto>> {
        let page = self
            .repo
            .filter_paged(Predicate::always(), page_index, page_size)?;
        Ok(page.map(DevTestDto::from))
    }

    pub async fn page_async(&self, page_index: u64, page_size: u64) -> RepoResult<Page<DevTestDto>> {
        let page = self
            .repo
            .filter_paged_async(Predicate::always(), page_index, page_size)
            .await?;
        Ok(page.map(DevTestDto::from))
    }

    fn saved_id(&self, entry: EntryRef, is_new: bool) -> RepoResult<EntityId> {
        let id = self
            .repo
            .tracked(entry)?
            .map(|entity| entity.id)
            .ok_or_else(|| RepoError::StoreUnavailable("saved entry is no longer tracked".to_string()))?;
        info!(
            "event=devtest_save module=service status=ok id={id} op={}",
            if is_new { "insert" } else { "update" }
        );
        Ok(id)
    }
}

fn not_found(id: EntityId) -> RepoError {
    RepoError::NotFound {
        entity: "DevTest",
        id,
    }
}
