use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    inventory::available, ConsumeHold, FinalizedOrder, Hold, HoldTarget, InventorySummary, NewHold,
    Order, OrderStatus, Seat, Ticket, TicketType, TicketTypeInventory,
};
use crate::repository::{ensure_may_hold_as, InventoryStore};

#[derive(Clone)]
pub struct PgInventoryStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct SummaryRow {
    id: Uuid,
    name: String,
    capacity: i64,
    sold: i64,
    held: i64,
    held_by_viewer: Option<i64>,
}

impl PgInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn event_organization(tx: &mut Transaction<'_, Postgres>, event_id: Uuid) -> AppResult<Option<Uuid>> {
    let organization_id = sqlx::query_scalar::<_, Uuid>("SELECT organization_id FROM events WHERE id = $1")
        .bind(event_id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(organization_id)
}

// Блокирует строку типа билета: все проверки остатков по нему идут друг за другом
async fn lock_ticket_type(
    tx: &mut Transaction<'_, Postgres>,
    ticket_type_id: Uuid,
) -> AppResult<Option<TicketType>> {
    let ticket_type = sqlx::query_as::<_, TicketType>(
        "SELECT id, event_id, name, price_cents, capacity
         FROM ticket_types
         WHERE id = $1
         FOR UPDATE"
    )
    .bind(ticket_type_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(ticket_type)
}

async fn sold_and_held(
    tx: &mut Transaction<'_, Postgres>,
    ticket_type_id: Uuid,
    now: DateTime<Utc>,
) -> AppResult<(i64, i64)> {
    let counts: (i64, i64) = sqlx::query_as(
        r#"
        SELECT
            (SELECT COUNT(*) FROM tickets WHERE ticket_type_id = $1) AS sold,
            (SELECT COALESCE(SUM(quantity), 0)::bigint
               FROM holds
              WHERE ticket_type_id = $1 AND expires_at > $2) AS held
        "#
    )
    .bind(ticket_type_id)
    .bind(now)
    .fetch_one(&mut **tx)
    .await?;
    Ok(counts)
}

#[async_trait]
impl InventoryStore for PgInventoryStore {
    async fn create_hold(&self, hold: NewHold, now: DateTime<Utc>) -> AppResult<Hold> {
        let mut tx = self.pool.begin().await?;

        let organization_id = event_organization(&mut tx, hold.event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("event {}", hold.event_id)))?;
        ensure_may_hold_as(&hold, organization_id)?;

        let (ticket_type, seat_id) = match hold.target {
            HoldTarget::TicketType { ticket_type_id, .. } => {
                let ticket_type = lock_ticket_type(&mut tx, ticket_type_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("ticket type {}", ticket_type_id)))?;
                if ticket_type.event_id != hold.event_id {
                    return Err(AppError::InvalidTicketType {
                        event_id: hold.event_id,
                        ticket_type_id,
                    });
                }
                (ticket_type, None)
            }
            HoldTarget::Seat { seat_id } => {
                let seat = sqlx::query_as::<_, Seat>(
                    "SELECT id, event_id, ticket_type_id, section, \"row\", number
                     FROM seats
                     WHERE id = $1 AND event_id = $2"
                )
                .bind(seat_id)
                .bind(hold.event_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("seat {}", seat_id)))?;

                // Сначала тип билета, потом место: тот же порядок блокировок, что и у холдов по количеству
                let ticket_type = lock_ticket_type(&mut tx, seat.ticket_type_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("ticket type {}", seat.ticket_type_id)))?;

                let taken = sqlx::query_scalar::<_, bool>(
                    r#"
                    SELECT EXISTS(SELECT 1 FROM holds WHERE seat_id = $1 AND expires_at > $2)
                        OR EXISTS(SELECT 1 FROM tickets WHERE seat_id = $1)
                    "#
                )
                .bind(seat_id)
                .bind(now)
                .fetch_one(&mut *tx)
                .await?;

                if taken {
                    return Err(AppError::SeatAlreadyHeld(seat_id));
                }
                (ticket_type, Some(seat_id))
            }
        };

        let requested = hold.target.quantity();
        let (sold, held) = sold_and_held(&mut tx, ticket_type.id, now).await?;
        let left = available(i64::from(ticket_type.capacity), sold, held);
        if left < i64::from(requested) {
            return Err(AppError::InsufficientInventory { requested, available: left });
        }

        let created = sqlx::query_as::<_, Hold>(
            r#"
            INSERT INTO holds (id, event_id, ticket_type_id, seat_id, quantity, holder_id, reason, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, event_id, ticket_type_id, seat_id, quantity, holder_id, reason, expires_at, created_at
            "#
        )
        .bind(Uuid::new_v4())
        .bind(hold.event_id)
        .bind(ticket_type.id)
        .bind(seat_id)
        .bind(requested)
        .bind(hold.holder_id)
        .bind(hold.reason)
        .bind(hold.expires_at)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!("hold {} stored, {} left on ticket type {}", created.id, left - i64::from(requested), ticket_type.id);
        Ok(created)
    }

    async fn find_hold(&self, hold_id: Uuid) -> AppResult<Option<Hold>> {
        let hold = sqlx::query_as::<_, Hold>(
            "SELECT id, event_id, ticket_type_id, seat_id, quantity, holder_id, reason, expires_at, created_at
             FROM holds
             WHERE id = $1"
        )
        .bind(hold_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(hold)
    }

    async fn inventory_summary(
        &self,
        event_id: Uuid,
        viewer_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> AppResult<InventorySummary> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM events WHERE id = $1)")
            .bind(event_id)
            .fetch_one(&self.pool)
            .await?;
        if !exists {
            return Err(AppError::NotFound(format!("event {}", event_id)));
        }

        let rows = sqlx::query_as::<_, SummaryRow>(
            r#"
            SELECT
                tt.id,
                tt.name,
                tt.capacity::bigint AS capacity,
                (SELECT COUNT(*) FROM tickets t WHERE t.ticket_type_id = tt.id) AS sold,
                (SELECT COALESCE(SUM(h.quantity), 0)::bigint
                   FROM holds h
                  WHERE h.ticket_type_id = tt.id AND h.expires_at > $2) AS held,
                CASE WHEN $3::uuid IS NULL THEN NULL ELSE
                    (SELECT COALESCE(SUM(h.quantity), 0)::bigint
                       FROM holds h
                      WHERE h.ticket_type_id = tt.id AND h.expires_at > $2 AND h.holder_id = $3)
                END AS held_by_viewer
            FROM ticket_types tt
            WHERE tt.event_id = $1
            ORDER BY tt.name, tt.id
            "#
        )
        .bind(event_id)
        .bind(now)
        .bind(viewer_id)
        .fetch_all(&self.pool)
        .await?;

        let ticket_types = rows
            .into_iter()
            .map(|r| TicketTypeInventory {
                held_by_viewer: r.held_by_viewer,
                ..TicketTypeInventory::new(r.id, r.name, r.capacity, r.sold, r.held)
            })
            .collect();

        Ok(InventorySummary { event_id, ticket_types })
    }

    async fn release_hold(&self, hold_id: Uuid, holder_id: Uuid, now: DateTime<Utc>) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        let hold = lock_hold(&mut tx, hold_id).await?;
        if hold.holder_id != holder_id {
            return Err(AppError::Forbidden(format!("hold {} belongs to another holder", hold_id)));
        }
        if !hold.is_active(now) {
            return Err(AppError::NotFound(format!("hold {}", hold_id)));
        }

        sqlx::query("DELETE FROM holds WHERE id = $1")
            .bind(hold_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn consume_hold(&self, request: ConsumeHold, now: DateTime<Utc>) -> AppResult<FinalizedOrder> {
        let mut tx = self.pool.begin().await?;

        let hold = lock_hold(&mut tx, request.hold_id).await?;
        if hold.holder_id != request.holder_id {
            return Err(AppError::Forbidden(format!("hold {} belongs to another holder", hold.id)));
        }
        if !hold.is_active(now) {
            return Err(AppError::HoldExpired(hold.id));
        }

        let ticket_type = lock_ticket_type(&mut tx, hold.ticket_type_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("ticket type {}", hold.ticket_type_id)))?;

        let order = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (id, event_id, holder_id, hold_id, total_cents, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, event_id, holder_id, hold_id, total_cents, status, created_at
            "#
        )
        .bind(Uuid::new_v4())
        .bind(hold.event_id)
        .bind(hold.holder_id)
        .bind(hold.id)
        .bind(ticket_type.price_cents * i64::from(hold.quantity))
        .bind(OrderStatus::Paid)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let mut tickets = Vec::with_capacity(hold.quantity.max(0) as usize);
        for _ in 0..hold.quantity {
            let ticket = sqlx::query_as::<_, Ticket>(
                r#"
                INSERT INTO tickets (id, order_id, event_id, ticket_type_id, seat_id, holder_id, issued_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id, order_id, event_id, ticket_type_id, seat_id, holder_id, issued_at
                "#
            )
            .bind(Uuid::new_v4())
            .bind(order.id)
            .bind(hold.event_id)
            .bind(hold.ticket_type_id)
            .bind(hold.seat_id)
            .bind(hold.holder_id)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
            tickets.push(ticket);
        }

        sqlx::query("DELETE FROM holds WHERE id = $1")
            .bind(hold.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!("hold {} consumed into order {} ({} tickets)", hold.id, order.id, tickets.len());
        Ok(FinalizedOrder { order, tickets })
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM holds WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM holds WHERE expires_at <= $1")
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

async fn lock_hold(tx: &mut Transaction<'_, Postgres>, hold_id: Uuid) -> AppResult<Hold> {
    sqlx::query_as::<_, Hold>(
        "SELECT id, event_id, ticket_type_id, seat_id, quantity, holder_id, reason, expires_at, created_at
         FROM holds
         WHERE id = $1
         FOR UPDATE"
    )
    .bind(hold_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("hold {}", hold_id)))
}
