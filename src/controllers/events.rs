use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::cache::search::nearby_key;
use crate::error::AppResult;
use crate::geo::GeoPoint;
use crate::middleware::Viewer;
use crate::models::{EventStatus, InventorySummary, SearchFilters};
use crate::AppState;

const DEFAULT_RADIUS_KM: f64 = 10.0;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events/nearby", get(nearby_events))
        .route("/events/{event_id}/inventory", get(event_inventory))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NearbyQuery {
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub lon: f64,
    #[validate(range(exclusive_min = 0.0))]
    pub radius: Option<f64>,
    #[validate(range(min = 1))]
    pub page: Option<u32>,
    #[validate(range(min = 1))]
    pub limit: Option<u32>,
    pub category_id: Option<Uuid>,
    pub status: Option<EventStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl NearbyQuery {
    fn filters(&self) -> SearchFilters {
        SearchFilters {
            category_id: self.category_id,
            status: self.status,
            start_date: self.start_date,
            end_date: self.end_date,
        }
    }
}

// GET /api/events/nearby
pub async fn nearby_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<NearbyQuery>,
) -> AppResult<Response> {
    params.validate()?;

    // 1. Ключ кеша из канонической формы параметров
    let cache_key = nearby_key(&params);

    // 2. Пытаемся получить результат из кеша
    if let Some(key) = &cache_key {
        if let Ok(Some(cached_json)) = state.cache.get_cached_search(key).await {
            return Ok(json_response(cached_json, "HIT"));
        }
    }

    // 3. Cache Miss: считаем в выбранной стратегии
    let result = state
        .geo
        .find_events_within_radius(
            GeoPoint { latitude: params.lat, longitude: params.lon },
            params.radius.unwrap_or(DEFAULT_RADIUS_KM),
            params.page.unwrap_or(1),
            params.limit.unwrap_or(state.config.geo.default_limit),
            params.filters(),
        )
        .await?;

    // 4. Сериализуем и сохраняем результат в кеш
    match serde_json::to_string(&result) {
        Ok(json_str) => {
            if let Some(key) = &cache_key {
                let ttl = state.config.redis.search_cache_ttl_seconds;
                if let Err(e) = state.cache.cache_search_result(key, &json_str, ttl).await {
                    tracing::warn!("Failed to cache nearby search: {:?}", e);
                }
            }
            Ok(json_response(json_str, "MISS"))
        }
        Err(_) => Ok(Json(result).into_response()),
    }
}

fn json_response(body: String, cache_status: &'static str) -> Response {
    (
        [(header::CONTENT_TYPE, "application/json"), (header::HeaderName::from_static("x-cache"), cache_status)],
        body,
    )
        .into_response()
}

// GET /api/events/{event_id}/inventory
pub async fn event_inventory(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<Uuid>,
    viewer: Viewer,
) -> AppResult<Json<InventorySummary>> {
    let summary = state.holds.get_inventory_summary(event_id, viewer.user_id()).await?;
    Ok(Json(summary))
}
