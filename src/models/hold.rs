use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HoldReason {
    Checkout,
    Reservation,
    OrganizerHold,
}

/// Временное удержание билетов или места.
///
/// Холд активен, пока `now < expires_at`; после погашения заказом строка
/// удаляется, просроченные строки удаляет фоновая очистка.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hold {
    pub id: Uuid,
    pub event_id: Uuid,
    pub ticket_type_id: Uuid,
    pub seat_id: Option<Uuid>,
    pub quantity: i32,
    pub holder_id: Uuid,
    pub reason: HoldReason,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Hold {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Что именно удерживается: количество билетов типа или конкретное место.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldTarget {
    TicketType { ticket_type_id: Uuid, quantity: i32 },
    Seat { seat_id: Uuid },
}

impl HoldTarget {
    pub fn quantity(&self) -> i32 {
        match self {
            HoldTarget::TicketType { quantity, .. } => *quantity,
            HoldTarget::Seat { .. } => 1,
        }
    }
}

/// Проверенный запрос на холд, передаётся в хранилище.
#[derive(Debug, Clone)]
pub struct NewHold {
    pub event_id: Uuid,
    pub holder_id: Uuid,
    pub target: HoldTarget,
    pub reason: HoldReason,
    pub expires_at: DateTime<Utc>,
    /// Организация держателя. Холд организатора принимается, только если она совпадает с организацией события.
    pub organization_id: Option<Uuid>,
}
