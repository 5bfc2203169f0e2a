use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Draft,
    Published,
    Cancelled,
    Completed,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub venue_id: Option<Uuid>,
    pub category_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub status: EventStatus,
    pub is_public: bool,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Venue {
    pub id: Uuid,
    pub name: String,
    pub city: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Событие вместе с координатами площадки: кандидат для поиска по радиусу.
#[derive(Debug, Clone, FromRow)]
pub struct EventLocationRow {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    pub venue_id: Option<Uuid>,
    pub venue_name: Option<String>,
    pub status: EventStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub venue_latitude: Option<f64>,
    pub venue_longitude: Option<f64>,
}

impl EventLocationRow {
    pub fn from_parts(event: &Event, venue: Option<&Venue>) -> Self {
        Self {
            id: event.id,
            title: event.title.clone(),
            description: event.description.clone(),
            category_id: event.category_id,
            venue_id: event.venue_id,
            venue_name: venue.map(|v| v.name.clone()),
            status: event.status,
            start_date: event.start_date,
            end_date: event.end_date,
            latitude: event.latitude,
            longitude: event.longitude,
            venue_latitude: venue.and_then(|v| v.latitude),
            venue_longitude: venue.and_then(|v| v.longitude),
        }
    }

    /// Свои координаты события, если заданы обе; иначе координаты площадки.
    pub fn resolved_point(&self) -> Option<GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoPoint { latitude, longitude }),
            _ => match (self.venue_latitude, self.venue_longitude) {
                (Some(latitude), Some(longitude)) => Some(GeoPoint { latitude, longitude }),
                _ => None,
            },
        }
    }

    pub fn with_distance(self, point: GeoPoint, distance: f64) -> EventWithDistance {
        EventWithDistance {
            id: self.id,
            title: self.title,
            description: self.description,
            category_id: self.category_id,
            venue_id: self.venue_id,
            venue_name: self.venue_name,
            status: self.status,
            start_date: self.start_date,
            end_date: self.end_date,
            latitude: point.latitude,
            longitude: point.longitude,
            distance,
        }
    }
}

/// Проекция события с расстоянием от точки поиска (км, 2 знака).
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventWithDistance {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    pub venue_id: Option<Uuid>,
    pub venue_name: Option<String>,
    pub status: EventStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub latitude: f64,
    pub longitude: f64,
    pub distance: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(own: (Option<f64>, Option<f64>), venue: (Option<f64>, Option<f64>)) -> EventLocationRow {
        EventLocationRow {
            id: Uuid::new_v4(),
            title: "Concert".to_string(),
            description: None,
            category_id: None,
            venue_id: None,
            venue_name: None,
            status: EventStatus::Published,
            start_date: Utc::now(),
            end_date: None,
            latitude: own.0,
            longitude: own.1,
            venue_latitude: venue.0,
            venue_longitude: venue.1,
        }
    }

    #[test]
    fn own_coordinates_take_precedence() {
        let r = row((Some(1.0), Some(2.0)), (Some(3.0), Some(4.0)));
        assert_eq!(r.resolved_point(), Some(GeoPoint { latitude: 1.0, longitude: 2.0 }));
    }

    #[test]
    fn half_own_coordinates_fall_back_to_venue() {
        let r = row((Some(1.0), None), (Some(3.0), Some(4.0)));
        assert_eq!(r.resolved_point(), Some(GeoPoint { latitude: 3.0, longitude: 4.0 }));
    }

    #[test]
    fn no_coordinates_at_all() {
        let r = row((None, None), (None, Some(4.0)));
        assert_eq!(r.resolved_point(), None);
    }
}
