//! Front-end facade over the DevTest service.
//!
//! # Responsibility
//! - Map DTOs to display views (`DevTestView`) and back.
//! - Open one unit of work per call, dispose it off the async worker, and
//!   broadcast `DataChanged` after every successful save or delete.
//!
//! # Invariants
//! - Failures are returned to the caller; nothing is swallowed.
//! - Notifications fire only after the commit succeeded.

use crate::config::StoreConfig;
use crate::model::dev_test::DevTestDto;
use crate::model::entity::EntityId;
use crate::notify::ChangeNotifier;
use crate::repo::query::Page;
use crate::repo::unit_of_work::UnitOfWork;
use crate::repo::RepoError;
use crate::service::dev_test_service::DevTestService;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Display format for `DevTestView::date`.
pub const VIEW_DATE_FORMAT: &str = "%Y/%m/%d";

pub type ControllerResult<T> = Result<T, ControllerError>;

#[derive(Debug)]
pub enum ControllerError {
    Repo(RepoError),
    /// View date text matched none of the accepted formats.
    InvalidDate(String),
}

impl Display for ControllerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::InvalidDate(raw) => write!(
                f,
                "invalid date `{raw}`; expected yyyy/MM/dd, yyyy-MM-dd or an ISO datetime"
            ),
        }
    }
}

impl Error for ControllerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::InvalidDate(_) => None,
        }
    }
}

impl From<RepoError> for ControllerError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Display-shaped DevTest row.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DevTestView {
    #[serde(default)]
    pub id: EntityId,
    pub campaign_name: Option<String>,
    /// `yyyy/MM/dd`, or empty when unknown.
    #[serde(default)]
    pub date: String,
    pub clicks: Option<i32>,
    pub conversions: Option<i32>,
    pub impressions: Option<i32>,
    pub affiliate_name: Option<String>,
    #[serde(default)]
    pub row_version: i64,
}

impl DevTestView {
    pub fn from_dto(dto: DevTestDto) -> Self {
        Self {
            id: dto.id,
            campaign_name: dto.campaign_name,
            date: dto
                .date
                .map(|date| date.format(VIEW_DATE_FORMAT).to_string())
                .unwrap_or_default(),
            clicks: dto.clicks,
            conversions: dto.conversions,
            impressions: dto.impressions,
            affiliate_name: dto.affiliate_name,
            row_version: dto.row_version,
        }
    }

    /// # Errors
    /// - `InvalidDate` when `date` is neither empty nor a recognised format.
    pub fn into_dto(self) -> ControllerResult<DevTestDto> {
        Ok(DevTestDto {
            id: self.id,
            campaign_name: self.campaign_name,
            date: parse_view_date(&self.date)?,
            clicks: self.clicks,
            conversions: self.conversions,
            impressions: self.impressions,
            affiliate_name: self.affiliate_name,
            row_version: self.row_version,
        })
    }
}

/// Accepts `yyyy/MM/dd`, `yyyy-MM-dd` and ISO datetimes; blank is `None`.
pub fn parse_view_date(raw: &str) -> ControllerResult<Option<NaiveDateTime>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if let Ok(datetime) = trimmed.parse::<NaiveDateTime>() {
        return Ok(Some(datetime));
    }
    [VIEW_DATE_FORMAT, "%Y-%m-%d"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
        .map(|date| Some(date.and_time(NaiveTime::MIN)))
        .ok_or_else(|| ControllerError::InvalidDate(trimmed.to_string()))
}

/// List/edit/save/delete entry points for a UI or API layer.
#[derive(Debug, Clone)]
pub struct DevTestController {
    config: StoreConfig,
    notifier: ChangeNotifier,
}

impl DevTestController {
    pub fn new(config: StoreConfig, notifier: ChangeNotifier) -> Self {
        Self { config, notifier }
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub async fn list(&self) -> ControllerResult<Vec<DevTestView>> {
        let uow = UnitOfWork::open_async(&self.config).await?;
        let rows = DevTestService::new(&uow).list_all_async().await;
        uow.dispose_async().await;
        Ok(rows?.into_iter().map(DevTestView::from_dto).collect())
    }

    /// Page `page_index` using the configured default page size.
    pub async fn page(&self, page_index: u64) -> ControllerResult<Page<DevTestView>> {
        let uow = UnitOfWork::open_async(&self.config).await?;
        let page = DevTestService::new(&uow)
            .page_async(page_index, self.config.default_page_size)
            .await;
        uow.dispose_async().await;
        Ok(page?.map(DevTestView::from_dto))
    }

    pub async fn edit(&self, id: EntityId) -> ControllerResult<DevTestView> {
        let uow = UnitOfWork::open_async(&self.config).await?;
        let dto = DevTestService::new(&uow).get_by_id_async(id).await;
        uow.dispose_async().await;
        Ok(DevTestView::from_dto(dto?))
    }

    /// Saves `view` and returns the row identity.
    pub async fn save(&self, view: DevTestView) -> ControllerResult<EntityId> {
        let dto = view.into_dto()?;
        let uow = UnitOfWork::open_async(&self.config).await?;
        let saved = DevTestService::new(&uow).save_async(dto).await;
        uow.dispose_async().await;
        let id = saved?;
        self.notifier.notify_data_changed();
        Ok(id)
    }

    pub async fn delete(&self, id: EntityId) -> ControllerResult<()> {
        let uow = UnitOfWork::open_async(&self.config).await?;
        let deleted = DevTestService::new(&uow).delete_async(id).await;
        uow.dispose_async().await;
        deleted?;
        self.notifier.notify_data_changed();
        Ok(())
    }
}
