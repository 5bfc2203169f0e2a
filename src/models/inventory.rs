use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketType {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub price_cents: i64,
    pub capacity: i32,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    pub id: Uuid,
    pub event_id: Uuid,
    pub ticket_type_id: Uuid,
    pub section: Option<String>,
    pub row: i32,
    pub number: i32,
}

/// Остатки по типу билета, считаются на чтение.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketTypeInventory {
    pub id: Uuid,
    pub name: String,
    pub capacity: i64,
    pub sold: i64,
    pub held: i64,
    pub available: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub held_by_viewer: Option<i64>,
}

impl TicketTypeInventory {
    pub fn new(id: Uuid, name: String, capacity: i64, sold: i64, held: i64) -> Self {
        Self {
            id,
            name,
            capacity,
            sold,
            held,
            available: available(capacity, sold, held),
            held_by_viewer: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventorySummary {
    pub event_id: Uuid,
    pub ticket_types: Vec<TicketTypeInventory>,
}

impl InventorySummary {
    pub fn ticket_type(&self, id: Uuid) -> Option<&TicketTypeInventory> {
        self.ticket_types.iter().find(|t| t.id == id)
    }
}

/// capacity - sold - active holds, не меньше нуля
pub fn available(capacity: i64, sold: i64, active_held: i64) -> i64 {
    (capacity - sold - active_held).max(0)
}
