use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::AppResult;
use crate::middleware::AuthUser;
use crate::models::{FinalizedOrder, Hold, HoldReason};
use crate::services::HoldRequest;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events/{event_id}/holds", post(create_hold))
        .route("/holds/{hold_id}", delete(release_hold))
        .route("/holds/{hold_id}/finalize", post(finalize_hold))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateHoldBody {
    pub ticket_type_id: Option<Uuid>,
    pub seat_id: Option<Uuid>,
    #[validate(range(min = 1))]
    #[serde(default = "one")]
    pub quantity: i32,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "checkout")]
    pub reason: HoldReason,
}

fn one() -> i32 {
    1
}

fn checkout() -> HoldReason {
    HoldReason::Checkout
}

// POST /api/events/{event_id}/holds
async fn create_hold(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<Uuid>,
    user: AuthUser,
    Json(body): Json<CreateHoldBody>,
) -> AppResult<(StatusCode, Json<Hold>)> {
    body.validate()?;

    let request = HoldRequest {
        ticket_type_id: body.ticket_type_id,
        seat_id: body.seat_id,
        quantity: body.quantity,
        expires_at: body.expires_at.unwrap_or_else(|| state.holds.default_expiry()),
        reason: body.reason,
    };

    let hold = match (request.reason, user.organization_id) {
        (HoldReason::OrganizerHold, Some(organization_id)) => {
            state
                .holds
                .create_organizer_hold(event_id, user.user_id, organization_id, request)
                .await?
        }
        _ => state.holds.create_hold(event_id, user.user_id, request).await?,
    };
    Ok((StatusCode::CREATED, Json(hold)))
}

// DELETE /api/holds/{hold_id}
async fn release_hold(
    State(state): State<Arc<AppState>>,
    Path(hold_id): Path<Uuid>,
    user: AuthUser,
) -> AppResult<StatusCode> {
    state.holds.release_hold(hold_id, user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// POST /api/holds/{hold_id}/finalize
async fn finalize_hold(
    State(state): State<Arc<AppState>>,
    Path(hold_id): Path<Uuid>,
    user: AuthUser,
) -> AppResult<(StatusCode, Json<FinalizedOrder>)> {
    let finalized = state.orders.finalize_from_hold(hold_id, user.user_id).await?;
    Ok((StatusCode::CREATED, Json(finalized)))
}
