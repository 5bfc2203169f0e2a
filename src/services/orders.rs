use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::models::{ConsumeHold, FinalizedOrder};
use crate::repository::InventoryStore;

/// Превращение активного холда в оплаченный заказ с билетами.
pub struct OrderService {
    store: Arc<dyn InventoryStore>,
    clock: Arc<dyn Clock>,
}

impl OrderService {
    pub fn new(store: Arc<dyn InventoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Одна атомарная операция: заказ, билеты по количеству холда и удаление холда.
    /// При любой ошибке холд остаётся как был.
    pub async fn finalize_from_hold(&self, hold_id: Uuid, holder_id: Uuid) -> AppResult<FinalizedOrder> {
        let result = self
            .store
            .consume_hold(ConsumeHold { hold_id, holder_id }, self.clock.now())
            .await;

        match &result {
            Ok(finalized) => info!(
                "💳 Order {} paid from hold {}: {} tickets, total {}",
                finalized.order.id,
                hold_id,
                finalized.tickets.len(),
                finalized.order.total_cents
            ),
            Err(AppError::HoldExpired(_)) => warn!("💳 Hold {} expired before checkout", hold_id),
            Err(e) if e.is_retryable() => warn!("💳 Finalizing hold {} failed: {}", hold_id, e),
            Err(_) => {}
        }
        result
    }
}
