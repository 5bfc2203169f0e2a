use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Paid,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub event_id: Uuid,
    pub holder_id: Uuid,
    pub hold_id: Uuid,
    pub total_cents: i64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Uuid,
    pub order_id: Uuid,
    pub event_id: Uuid,
    pub ticket_type_id: Uuid,
    pub seat_id: Option<Uuid>,
    pub holder_id: Uuid,
    pub issued_at: DateTime<Utc>,
}

/// Заказ, созданный из холда, вместе с выпущенными билетами.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedOrder {
    pub order: Order,
    pub tickets: Vec<Ticket>,
}

/// Запрос на погашение холда заказом.
#[derive(Debug, Clone, Copy)]
pub struct ConsumeHold {
    pub hold_id: Uuid,
    pub holder_id: Uuid,
}
