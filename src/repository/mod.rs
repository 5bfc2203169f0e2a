//! Границы хранилища: поиск событий по координатам и атомарные операции с холдами.
//!
//! Каждый метод `InventoryStore` выполняется как одна атомарная единица:
//! в Postgres это транзакция с блокировкой строки типа билета,
//! в памяти это критическая секция под одним мьютексом.

pub mod events;
pub mod holds;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    ConsumeHold, EventLocationRow, FinalizedOrder, Hold, HoldReason, InventorySummary, NewHold, RadiusQuery,
    SearchFilters, SearchPage,
};

pub use events::PgEventLocator;
pub use holds::PgInventoryStore;
pub use memory::MemoryStore;

#[async_trait]
pub trait EventLocator: Send + Sync {
    /// Есть ли в хранилище пространственный индекс (PostGIS).
    async fn has_spatial_index(&self) -> AppResult<bool>;

    /// Один индексный запрос "в пределах расстояния": страница, отсортированная по расстоянию, и общее число.
    async fn query_within_distance(&self, query: &RadiusQuery, now: DateTime<Utc>) -> AppResult<SearchPage>;

    /// Все публичные живые события с известными координатами (своими или площадки).
    async fn load_candidates(
        &self,
        filters: &SearchFilters,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<EventLocationRow>>;
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn create_hold(&self, hold: NewHold, now: DateTime<Utc>) -> AppResult<Hold>;

    async fn find_hold(&self, hold_id: Uuid) -> AppResult<Option<Hold>>;

    async fn inventory_summary(
        &self,
        event_id: Uuid,
        viewer_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> AppResult<InventorySummary>;

    async fn release_hold(&self, hold_id: Uuid, holder_id: Uuid, now: DateTime<Utc>) -> AppResult<()>;

    async fn consume_hold(&self, request: ConsumeHold, now: DateTime<Utc>) -> AppResult<FinalizedOrder>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> AppResult<u64>;

    async fn count_expired(&self, now: DateTime<Utc>) -> AppResult<u64>;
}

// Холд организатора ставит только член организации, проводящей событие
pub(crate) fn ensure_may_hold_as(hold: &NewHold, event_organization_id: Uuid) -> AppResult<()> {
    if hold.reason == HoldReason::OrganizerHold && hold.organization_id != Some(event_organization_id) {
        return Err(AppError::Forbidden(format!(
            "only members of the organizing team may place organizer holds on event {}",
            hold.event_id
        )));
    }
    Ok(())
}
