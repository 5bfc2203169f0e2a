use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;
use crate::models::event::{EventStatus, EventWithDistance};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    pub category_id: Option<Uuid>,
    pub status: Option<EventStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl SearchFilters {
    /// Без явного статуса ищем только опубликованные ("live") события.
    pub fn effective_status(&self) -> EventStatus {
        self.status.unwrap_or(EventStatus::Published)
    }
}

/// Проверенный запрос поиска по радиусу.
#[derive(Debug, Clone)]
pub struct RadiusQuery {
    pub center: GeoPoint,
    pub radius_km: f64,
    pub page: u32,
    pub limit: u32,
    pub filters: SearchFilters,
}

impl RadiusQuery {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

impl PaginationMeta {
    pub fn new(total: u64, page: u32, limit: u32) -> Self {
        let total_pages = if limit == 0 { 0 } else { total.div_ceil(u64::from(limit)) };
        Self {
            total,
            page,
            limit,
            total_pages: u32::try_from(total_pages).unwrap_or(u32::MAX),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl From<GeoPoint> for SearchLocation {
    fn from(point: GeoPoint) -> Self {
        Self {
            latitude: point.latitude,
            longitude: point.longitude,
            city: None,
            country: None,
        }
    }
}

/// Одна страница результатов до обогащения локацией.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    pub events: Vec<EventWithDistance>,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyEvents {
    pub data: Vec<EventWithDistance>,
    pub meta: PaginationMeta,
    pub search_location: SearchLocation,
}
