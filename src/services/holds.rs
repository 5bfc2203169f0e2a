use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::HoldsConfig;
use crate::error::{AppError, AppResult};
use crate::models::{Hold, HoldReason, HoldTarget, InventorySummary, NewHold};
use crate::repository::InventoryStore;

/// Что и на сколько придержать. Ровно одно из `ticket_type_id` / `seat_id`.
#[derive(Debug, Clone)]
pub struct HoldRequest {
    pub ticket_type_id: Option<Uuid>,
    pub seat_id: Option<Uuid>,
    pub quantity: i32,
    pub expires_at: DateTime<Utc>,
    pub reason: HoldReason,
}

pub struct HoldService {
    store: Arc<dyn InventoryStore>,
    clock: Arc<dyn Clock>,
    config: HoldsConfig,
}

impl HoldService {
    pub fn new(store: Arc<dyn InventoryStore>, clock: Arc<dyn Clock>, config: HoldsConfig) -> Self {
        Self { store, clock, config }
    }

    /// Время истечения по умолчанию для клиентов, которые его не передали.
    pub fn default_expiry(&self) -> DateTime<Utc> {
        self.clock.now() + Duration::seconds(self.config.default_ttl_seconds)
    }

    /// Холд покупателя. Холды организатора здесь отклоняются с `Forbidden`.
    pub async fn create_hold(&self, event_id: Uuid, holder_id: Uuid, request: HoldRequest) -> AppResult<Hold> {
        self.place_hold(event_id, holder_id, None, request).await
    }

    /// Холд от имени организации. Хранилище проверяет, что событие проводит именно она.
    pub async fn create_organizer_hold(
        &self,
        event_id: Uuid,
        holder_id: Uuid,
        organization_id: Uuid,
        request: HoldRequest,
    ) -> AppResult<Hold> {
        self.place_hold(event_id, holder_id, Some(organization_id), request).await
    }

    async fn place_hold(
        &self,
        event_id: Uuid,
        holder_id: Uuid,
        organization_id: Option<Uuid>,
        request: HoldRequest,
    ) -> AppResult<Hold> {
        let now = self.clock.now();
        let target = self.validate(&request, now)?;

        let result = self
            .store
            .create_hold(
                NewHold {
                    event_id,
                    holder_id,
                    target,
                    reason: request.reason,
                    expires_at: request.expires_at,
                    organization_id,
                },
                now,
            )
            .await;

        match &result {
            Ok(hold) => info!(
                "🎟️ Hold {} created: event={} ticket_type={} qty={} until {}",
                hold.id, event_id, hold.ticket_type_id, hold.quantity, hold.expires_at
            ),
            Err(e) if e.is_sold_out() => warn!("🎟️ Hold rejected for event {}: {}", event_id, e),
            Err(AppError::Forbidden(_)) => warn!("🎟️ Organizer hold denied for user {} on event {}", holder_id, event_id),
            Err(_) => {}
        }
        result
    }

    fn validate(&self, request: &HoldRequest, now: DateTime<Utc>) -> AppResult<HoldTarget> {
        let target = match (request.ticket_type_id, request.seat_id) {
            (Some(ticket_type_id), None) => HoldTarget::TicketType {
                ticket_type_id,
                quantity: request.quantity,
            },
            (None, Some(seat_id)) => {
                if request.quantity != 1 {
                    return Err(AppError::InvalidInput("seat holds always have quantity 1".to_string()));
                }
                HoldTarget::Seat { seat_id }
            }
            _ => {
                return Err(AppError::InvalidInput(
                    "exactly one of ticketTypeId or seatId is required".to_string(),
                ))
            }
        };

        if request.quantity < 1 || request.quantity > self.config.max_quantity {
            return Err(AppError::InvalidInput(format!(
                "quantity must be between 1 and {}",
                self.config.max_quantity
            )));
        }
        if request.expires_at <= now {
            return Err(AppError::InvalidInput("expiresAt must be in the future".to_string()));
        }
        // Холды организатора не ограничены по сроку
        if request.reason != HoldReason::OrganizerHold
            && request.expires_at - now > Duration::seconds(self.config.max_ttl_seconds)
        {
            return Err(AppError::InvalidInput(format!(
                "hold may not last longer than {} seconds",
                self.config.max_ttl_seconds
            )));
        }

        Ok(target)
    }

    pub async fn get_inventory_summary(&self, event_id: Uuid, viewer_id: Option<Uuid>) -> AppResult<InventorySummary> {
        self.store.inventory_summary(event_id, viewer_id, self.clock.now()).await
    }

    pub async fn release_hold(&self, hold_id: Uuid, holder_id: Uuid) -> AppResult<()> {
        self.store.release_hold(hold_id, holder_id, self.clock.now()).await?;
        info!("🎟️ Hold {} released by holder {}", hold_id, holder_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{Event, EventStatus, TicketType};
    use crate::repository::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        service: HoldService,
        event_id: Uuid,
        organization_id: Uuid,
        ticket_type_id: Uuid,
    }

    fn fixture(capacity: i32) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let event_id = Uuid::new_v4();
        let organization_id = Uuid::new_v4();
        let ticket_type_id = Uuid::new_v4();

        store.insert_event(Event {
            id: event_id,
            organization_id,
            venue_id: None,
            category_id: None,
            title: "Jazz night".to_string(),
            description: None,
            status: EventStatus::Published,
            is_public: true,
            start_date: clock.now() + Duration::days(7),
            end_date: None,
            latitude: Some(43.24),
            longitude: Some(76.95),
        });
        store.insert_ticket_type(TicketType {
            id: ticket_type_id,
            event_id,
            name: "General".to_string(),
            price_cents: 5_000,
            capacity,
        });

        let service = HoldService::new(
            store.clone(),
            clock.clone(),
            HoldsConfig {
                default_ttl_seconds: 600,
                max_ttl_seconds: 1800,
                max_quantity: 10,
                sweep_interval_seconds: 60,
            },
        );

        Fixture { store, clock, service, event_id, organization_id, ticket_type_id }
    }

    fn request(f: &Fixture, quantity: i32, ttl: Duration, reason: HoldReason) -> HoldRequest {
        HoldRequest {
            ticket_type_id: Some(f.ticket_type_id),
            seat_id: None,
            quantity,
            expires_at: f.clock.now() + ttl,
            reason,
        }
    }

    #[tokio::test]
    async fn hold_reduces_availability() {
        let f = fixture(5);
        let holder = Uuid::new_v4();

        f.service
            .create_hold(f.event_id, holder, request(&f, 3, Duration::minutes(10), HoldReason::Checkout))
            .await
            .unwrap();

        let summary = f.service.get_inventory_summary(f.event_id, Some(holder)).await.unwrap();
        let general = summary.ticket_type(f.ticket_type_id).unwrap();
        assert_eq!(general.held, 3);
        assert_eq!(general.available, 2);
        assert_eq!(general.held_by_viewer, Some(3));

        let anonymous = f.service.get_inventory_summary(f.event_id, None).await.unwrap();
        assert_eq!(anonymous.ticket_types[0].held_by_viewer, None);
    }

    #[tokio::test]
    async fn rejects_invalid_requests() {
        let f = fixture(5);
        let holder = Uuid::new_v4();

        let zero = request(&f, 0, Duration::minutes(10), HoldReason::Checkout);
        let too_many = request(&f, 11, Duration::minutes(10), HoldReason::Checkout);
        let past = request(&f, 1, Duration::seconds(0), HoldReason::Checkout);
        let too_long = request(&f, 1, Duration::hours(2), HoldReason::Reservation);
        let no_target = HoldRequest {
            ticket_type_id: None,
            ..request(&f, 1, Duration::minutes(10), HoldReason::Checkout)
        };
        let both_targets = HoldRequest {
            seat_id: Some(Uuid::new_v4()),
            ..request(&f, 1, Duration::minutes(10), HoldReason::Checkout)
        };

        for bad in [zero, too_many, past, too_long, no_target, both_targets] {
            let result = f.service.create_hold(f.event_id, holder, bad).await;
            assert!(matches!(result, Err(AppError::InvalidInput(_))), "{:?}", result);
        }
        assert_eq!(f.store.hold_count(), 0);
    }

    #[tokio::test]
    async fn organizer_hold_may_exceed_ttl_cap() {
        let f = fixture(5);
        let hold = f
            .service
            .create_organizer_hold(
                f.event_id,
                Uuid::new_v4(),
                f.organization_id,
                request(&f, 2, Duration::days(3), HoldReason::OrganizerHold),
            )
            .await
            .unwrap();
        assert_eq!(hold.reason, HoldReason::OrganizerHold);
    }

    #[tokio::test]
    async fn buyer_cannot_lock_up_inventory_with_organizer_hold() {
        let f = fixture(10);
        let years = Duration::days(3650);

        let as_buyer = f
            .service
            .create_hold(f.event_id, Uuid::new_v4(), request(&f, 10, years, HoldReason::OrganizerHold))
            .await;
        assert!(matches!(as_buyer, Err(AppError::Forbidden(_))), "{:?}", as_buyer);

        let other_team = f
            .service
            .create_organizer_hold(
                f.event_id,
                Uuid::new_v4(),
                Uuid::new_v4(),
                request(&f, 10, years, HoldReason::OrganizerHold),
            )
            .await;
        assert!(matches!(other_team, Err(AppError::Forbidden(_))), "{:?}", other_team);
        assert_eq!(f.store.hold_count(), 0);

        // месяц спустя билеты по-прежнему можно купить
        f.clock.advance(Duration::days(29));
        f.service
            .create_hold(f.event_id, Uuid::new_v4(), request(&f, 1, Duration::minutes(10), HoldReason::Checkout))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn organizer_membership_does_not_lift_checkout_ttl_cap() {
        let f = fixture(5);
        let result = f
            .service
            .create_organizer_hold(
                f.event_id,
                Uuid::new_v4(),
                f.organization_id,
                request(&f, 1, Duration::days(1), HoldReason::Checkout),
            )
            .await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn insufficient_inventory_reports_what_is_left() {
        let f = fixture(2);
        let result = f
            .service
            .create_hold(f.event_id, Uuid::new_v4(), request(&f, 3, Duration::minutes(5), HoldReason::Checkout))
            .await;
        assert!(matches!(
            result,
            Err(AppError::InsufficientInventory { requested: 3, available: 2 })
        ));
    }

    #[tokio::test]
    async fn expired_hold_frees_capacity_without_sweep() {
        let f = fixture(1);
        f.service
            .create_hold(f.event_id, Uuid::new_v4(), request(&f, 1, Duration::minutes(5), HoldReason::Checkout))
            .await
            .unwrap();

        f.clock.advance(Duration::minutes(5));

        // запись ещё в хранилище, но уже не учитывается
        assert_eq!(f.store.hold_count(), 1);
        let summary = f.service.get_inventory_summary(f.event_id, None).await.unwrap();
        assert_eq!(summary.ticket_types[0].available, 1);

        f.service
            .create_hold(f.event_id, Uuid::new_v4(), request(&f, 1, Duration::minutes(5), HoldReason::Checkout))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn release_by_owner_only() {
        let f = fixture(3);
        let owner = Uuid::new_v4();
        let hold = f
            .service
            .create_hold(f.event_id, owner, request(&f, 2, Duration::minutes(5), HoldReason::Checkout))
            .await
            .unwrap();

        let stranger = f.service.release_hold(hold.id, Uuid::new_v4()).await;
        assert!(matches!(stranger, Err(AppError::Forbidden(_))));

        f.service.release_hold(hold.id, owner).await.unwrap();
        let again = f.service.release_hold(hold.id, owner).await;
        assert!(matches!(again, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn unknown_event_is_not_found() {
        let f = fixture(3);
        let result = f
            .service
            .create_hold(Uuid::new_v4(), Uuid::new_v4(), request(&f, 1, Duration::minutes(5), HoldReason::Checkout))
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[test]
    fn default_expiry_uses_configured_ttl() {
        let f = fixture(1);
        assert_eq!(f.service.default_expiry() - f.clock.now(), Duration::seconds(600));
    }
}
