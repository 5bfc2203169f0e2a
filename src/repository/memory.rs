//! Хранилище в памяти с тем же контрактом, что и Postgres.
//!
//! Все изменения выполняются под одним мьютексом, поэтому проверка остатков
//! и запись холда атомарны относительно параллельных вызовов.
//! Используется в тестах и локальных прогонах без базы.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::geo::haversine_km;
use crate::models::{
    inventory::available, ConsumeHold, Event, EventLocationRow, EventWithDistance, FinalizedOrder,
    Hold, HoldTarget, InventorySummary, NewHold, Order, OrderStatus, RadiusQuery, SearchFilters,
    SearchPage, Seat, Ticket, TicketType, TicketTypeInventory, Venue,
};
use crate::repository::{ensure_may_hold_as, EventLocator, InventoryStore};

#[derive(Default)]
struct MemoryState {
    // Порядок вставки = порядок перечисления кандидатов
    events: Vec<Event>,
    venues: HashMap<Uuid, Venue>,
    ticket_types: Vec<TicketType>,
    seats: HashMap<Uuid, Seat>,
    holds: HashMap<Uuid, Hold>,
    orders: HashMap<Uuid, Order>,
    tickets: Vec<Ticket>,
}

impl MemoryState {
    fn event_exists(&self, event_id: Uuid) -> bool {
        self.events.iter().any(|e| e.id == event_id)
    }

    fn event_organization(&self, event_id: Uuid) -> Option<Uuid> {
        self.events.iter().find(|e| e.id == event_id).map(|e| e.organization_id)
    }

    fn ticket_type(&self, id: Uuid) -> Option<&TicketType> {
        self.ticket_types.iter().find(|t| t.id == id)
    }

    fn sold(&self, ticket_type_id: Uuid) -> i64 {
        self.tickets.iter().filter(|t| t.ticket_type_id == ticket_type_id).count() as i64
    }

    fn held(&self, ticket_type_id: Uuid, holder: Option<Uuid>, now: DateTime<Utc>) -> i64 {
        self.holds
            .values()
            .filter(|h| h.ticket_type_id == ticket_type_id && h.is_active(now))
            .filter(|h| holder.map_or(true, |holder_id| h.holder_id == holder_id))
            .map(|h| i64::from(h.quantity))
            .sum()
    }

    fn seat_taken(&self, seat_id: Uuid, now: DateTime<Utc>) -> bool {
        self.holds.values().any(|h| h.seat_id == Some(seat_id) && h.is_active(now))
            || self.tickets.iter().any(|t| t.seat_id == Some(seat_id))
    }

    fn candidates(&self, filters: &SearchFilters, now: DateTime<Utc>) -> Vec<EventLocationRow> {
        let status = filters.effective_status();
        self.events
            .iter()
            .filter(|e| e.is_public && e.status == status)
            .filter(|e| e.end_date.map_or(true, |end| end >= now))
            .filter(|e| filters.category_id.map_or(true, |c| e.category_id == Some(c)))
            .filter(|e| filters.start_date.map_or(true, |from| e.start_date >= from))
            .filter(|e| filters.end_date.map_or(true, |to| e.start_date <= to))
            .map(|e| {
                let venue = e.venue_id.and_then(|id| self.venues.get(&id));
                EventLocationRow::from_parts(e, venue)
            })
            .filter(|row| row.resolved_point().is_some())
            .collect()
    }
}

pub struct MemoryStore {
    state: Mutex<MemoryState>,
    spatial_index: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            spatial_index: false,
        }
    }

    /// Хранилище, которое ведёт себя как база с пространственным индексом.
    pub fn with_spatial_index() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            spatial_index: true,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_venue(&self, venue: Venue) {
        self.lock().venues.insert(venue.id, venue);
    }

    pub fn insert_event(&self, event: Event) {
        self.lock().events.push(event);
    }

    pub fn insert_ticket_type(&self, ticket_type: TicketType) {
        self.lock().ticket_types.push(ticket_type);
    }

    pub fn insert_seat(&self, seat: Seat) {
        self.lock().seats.insert(seat.id, seat);
    }

    pub fn hold_count(&self) -> usize {
        self.lock().holds.len()
    }

    pub fn order_count(&self) -> usize {
        self.lock().orders.len()
    }

    pub fn tickets_for(&self, ticket_type_id: Uuid) -> Vec<Ticket> {
        self.lock()
            .tickets
            .iter()
            .filter(|t| t.ticket_type_id == ticket_type_id)
            .cloned()
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLocator for MemoryStore {
    async fn has_spatial_index(&self) -> AppResult<bool> {
        Ok(self.spatial_index)
    }

    async fn query_within_distance(&self, query: &RadiusQuery, now: DateTime<Utc>) -> AppResult<SearchPage> {
        if !self.spatial_index {
            return Err(AppError::Database(sqlx::Error::Protocol(
                "function st_dwithin does not exist".to_string(),
            )));
        }

        let mut matched: Vec<EventWithDistance> = self
            .lock()
            .candidates(&query.filters, now)
            .into_iter()
            .filter_map(|row| {
                let point = row.resolved_point()?;
                let distance = haversine_km(query.center, point);
                (distance <= query.radius_km).then(|| row.with_distance(point, distance))
            })
            .collect();

        // ORDER BY distance, start_date, id
        matched.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.start_date.cmp(&b.start_date))
                .then(a.id.cmp(&b.id))
        });

        let total = matched.len() as u64;
        let events = matched
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit as usize)
            .collect();

        Ok(SearchPage { events, total })
    }

    async fn load_candidates(
        &self,
        filters: &SearchFilters,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<EventLocationRow>> {
        Ok(self.lock().candidates(filters, now))
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn create_hold(&self, hold: NewHold, now: DateTime<Utc>) -> AppResult<Hold> {
        let mut state = self.lock();

        let organization_id = state
            .event_organization(hold.event_id)
            .ok_or_else(|| AppError::NotFound(format!("event {}", hold.event_id)))?;
        ensure_may_hold_as(&hold, organization_id)?;

        let (ticket_type_id, capacity, seat_id) = match hold.target {
            HoldTarget::TicketType { ticket_type_id, .. } => {
                let ticket_type = state
                    .ticket_type(ticket_type_id)
                    .ok_or_else(|| AppError::NotFound(format!("ticket type {}", ticket_type_id)))?;
                if ticket_type.event_id != hold.event_id {
                    return Err(AppError::InvalidTicketType {
                        event_id: hold.event_id,
                        ticket_type_id,
                    });
                }
                (ticket_type.id, ticket_type.capacity, None)
            }
            HoldTarget::Seat { seat_id } => {
                let seat = state
                    .seats
                    .get(&seat_id)
                    .filter(|s| s.event_id == hold.event_id)
                    .ok_or_else(|| AppError::NotFound(format!("seat {}", seat_id)))?;
                let ticket_type = state
                    .ticket_type(seat.ticket_type_id)
                    .ok_or_else(|| AppError::NotFound(format!("ticket type {}", seat.ticket_type_id)))?;
                if state.seat_taken(seat_id, now) {
                    return Err(AppError::SeatAlreadyHeld(seat_id));
                }
                (ticket_type.id, ticket_type.capacity, Some(seat_id))
            }
        };

        let requested = hold.target.quantity();
        let left = available(
            i64::from(capacity),
            state.sold(ticket_type_id),
            state.held(ticket_type_id, None, now),
        );
        if left < i64::from(requested) {
            return Err(AppError::InsufficientInventory { requested, available: left });
        }

        let created = Hold {
            id: Uuid::new_v4(),
            event_id: hold.event_id,
            ticket_type_id,
            seat_id,
            quantity: requested,
            holder_id: hold.holder_id,
            reason: hold.reason,
            expires_at: hold.expires_at,
            created_at: now,
        };
        state.holds.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_hold(&self, hold_id: Uuid) -> AppResult<Option<Hold>> {
        Ok(self.lock().holds.get(&hold_id).cloned())
    }

    async fn inventory_summary(
        &self,
        event_id: Uuid,
        viewer_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> AppResult<InventorySummary> {
        let state = self.lock();
        if !state.event_exists(event_id) {
            return Err(AppError::NotFound(format!("event {}", event_id)));
        }

        let mut ticket_types: Vec<TicketTypeInventory> = state
            .ticket_types
            .iter()
            .filter(|t| t.event_id == event_id)
            .map(|t| TicketTypeInventory {
                held_by_viewer: viewer_id.map(|viewer| state.held(t.id, Some(viewer), now)),
                ..TicketTypeInventory::new(
                    t.id,
                    t.name.clone(),
                    i64::from(t.capacity),
                    state.sold(t.id),
                    state.held(t.id, None, now),
                )
            })
            .collect();
        ticket_types.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

        Ok(InventorySummary { event_id, ticket_types })
    }

    async fn release_hold(&self, hold_id: Uuid, holder_id: Uuid, now: DateTime<Utc>) -> AppResult<()> {
        let mut state = self.lock();
        let hold = state
            .holds
            .get(&hold_id)
            .ok_or_else(|| AppError::NotFound(format!("hold {}", hold_id)))?;
        if hold.holder_id != holder_id {
            return Err(AppError::Forbidden(format!("hold {} belongs to another holder", hold_id)));
        }
        if !hold.is_active(now) {
            return Err(AppError::NotFound(format!("hold {}", hold_id)));
        }
        state.holds.remove(&hold_id);
        Ok(())
    }

    async fn consume_hold(&self, request: ConsumeHold, now: DateTime<Utc>) -> AppResult<FinalizedOrder> {
        let mut state = self.lock();

        // Все проверки до первой записи: при ошибке холд остаётся нетронутым
        let hold = state
            .holds
            .get(&request.hold_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("hold {}", request.hold_id)))?;
        if hold.holder_id != request.holder_id {
            return Err(AppError::Forbidden(format!("hold {} belongs to another holder", hold.id)));
        }
        if !hold.is_active(now) {
            return Err(AppError::HoldExpired(hold.id));
        }
        let price_cents = state
            .ticket_type(hold.ticket_type_id)
            .map(|t| t.price_cents)
            .ok_or_else(|| AppError::NotFound(format!("ticket type {}", hold.ticket_type_id)))?;

        let order = Order {
            id: Uuid::new_v4(),
            event_id: hold.event_id,
            holder_id: hold.holder_id,
            hold_id: hold.id,
            total_cents: price_cents * i64::from(hold.quantity),
            status: OrderStatus::Paid,
            created_at: now,
        };
        let tickets: Vec<Ticket> = (0..hold.quantity)
            .map(|_| Ticket {
                id: Uuid::new_v4(),
                order_id: order.id,
                event_id: hold.event_id,
                ticket_type_id: hold.ticket_type_id,
                seat_id: hold.seat_id,
                holder_id: hold.holder_id,
                issued_at: now,
            })
            .collect();

        state.orders.insert(order.id, order.clone());
        state.tickets.extend(tickets.iter().cloned());
        state.holds.remove(&hold.id);

        Ok(FinalizedOrder { order, tickets })
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut state = self.lock();
        let before = state.holds.len();
        state.holds.retain(|_, h| h.is_active(now));
        Ok((before - state.holds.len()) as u64)
    }

    async fn count_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        Ok(self.lock().holds.values().filter(|h| !h.is_active(now)).count() as u64)
    }
}
