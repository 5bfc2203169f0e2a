use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::debug;

use crate::error::AppResult;
use crate::geo::{km_to_meters, EARTH_RADIUS_KM};
use crate::models::{EventLocationRow, EventWithDistance, RadiusQuery, SearchFilters, SearchPage};
use crate::repository::EventLocator;

/// Запас в метрах для ST_DWithin. Покрывает округление до 0.01 км и то, что сфера PostGIS
/// (6371008.8 м) чуть больше сферы гаверсинуса (6371 км); точный отбор идёт по `distance`.
const DWITHIN_SLACK_METERS: f64 = 10.0;

/// Фильтры видимости события, общие для всех запросов.
const VISIBLE_EVENTS: &str = r#"
          e.is_public = true
          AND e.status = $1
          AND (e.end_date IS NULL OR e.end_date >= $2)
          AND ($3::uuid IS NULL OR e.category_id = $3)
          AND ($4::timestamptz IS NULL OR e.start_date >= $4)
          AND ($5::timestamptz IS NULL OR e.start_date <= $5)
"#;

// Совпадают с выражениями GIST-индексов idx_events_geo и idx_venues_geo
const EVENT_POINT: &str = "ST_SetSRID(ST_MakePoint(e.longitude, e.latitude), 4326)::geography";
const VENUE_POINT: &str = "ST_SetSRID(ST_MakePoint(v.longitude, v.latitude), 4326)::geography";
const SEARCH_CENTER: &str = "ST_SetSRID(ST_MakePoint($7, $6), 4326)::geography";

/// Координаты события с откатом на площадку, для загрузки кандидатов.
fn located_events_cte() -> String {
    format!(
        r#"
    WITH located AS (
        SELECT
            e.id,
            e.title,
            e.description,
            e.category_id,
            e.venue_id,
            v.name AS venue_name,
            e.status,
            e.start_date,
            e.end_date,
            e.latitude,
            e.longitude,
            v.latitude AS venue_latitude,
            v.longitude AS venue_longitude,
            CASE WHEN e.latitude IS NOT NULL AND e.longitude IS NOT NULL
                 THEN e.latitude ELSE v.latitude END AS resolved_latitude,
            CASE WHEN e.latitude IS NOT NULL AND e.longitude IS NOT NULL
                 THEN e.longitude ELSE v.longitude END AS resolved_longitude
        FROM events e
        LEFT JOIN venues v ON v.id = e.venue_id
        WHERE {VISIBLE_EVENTS}
    )
"#
    )
}

/// События в радиусе с расстоянием `distance`.
///
/// Две ветки UNION ALL: события со своими координатами идут через индекс по `events`,
/// события без них через индекс по `venues`. Расстояние считается гаверсинусом
/// на той же сфере, что и `haversine_km`, поэтому обе стратегии дают одинаковые числа.
fn measured_within_distance_cte() -> String {
    format!(
        r#"
    WITH nearby AS (
        SELECT
            e.id, e.title, e.description, e.category_id, e.venue_id, v.name AS venue_name,
            e.status, e.start_date, e.end_date, e.latitude, e.longitude
        FROM events e
        LEFT JOIN venues v ON v.id = e.venue_id
        WHERE {VISIBLE_EVENTS}
          AND e.latitude IS NOT NULL AND e.longitude IS NOT NULL
          AND ST_DWithin({EVENT_POINT}, {SEARCH_CENTER}, $8, false)
        UNION ALL
        SELECT
            e.id, e.title, e.description, e.category_id, e.venue_id, v.name AS venue_name,
            e.status, e.start_date, e.end_date, v.latitude, v.longitude
        FROM events e
        JOIN venues v ON v.id = e.venue_id
        WHERE {VISIBLE_EVENTS}
          AND (e.latitude IS NULL OR e.longitude IS NULL)
          AND v.latitude IS NOT NULL AND v.longitude IS NOT NULL
          AND ST_DWithin({VENUE_POINT}, {SEARCH_CENTER}, $8, false)
    ),
    measured AS (
        SELECT
            nearby.*,
            ROUND((2 * {EARTH_RADIUS_KM} * ASIN(LEAST(1.0, SQRT(
                POWER(SIN(RADIANS(latitude - $6) / 2), 2)
                + COS(RADIANS($6)) * COS(RADIANS(latitude)) * POWER(SIN(RADIANS(longitude - $7) / 2), 2)
            ))))::numeric, 2)::float8 AS distance
        FROM nearby
    )
"#
    )
}

#[derive(Clone)]
pub struct PgEventLocator {
    pool: PgPool,
}

#[derive(FromRow)]
struct DistanceRow {
    #[sqlx(flatten)]
    event: EventWithDistance,
    total: i64,
}

impl PgEventLocator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn count_within_distance(&self, query: &RadiusQuery, now: DateTime<Utc>) -> AppResult<u64> {
        let sql = format!(
            r#"{}
            SELECT COUNT(*)
            FROM measured
            WHERE distance <= $9
            "#,
            measured_within_distance_cte()
        );

        let total: i64 = sqlx::query_scalar(&sql)
            .bind(query.filters.effective_status())
            .bind(now)
            .bind(query.filters.category_id)
            .bind(query.filters.start_date)
            .bind(query.filters.end_date)
            .bind(query.center.latitude)
            .bind(query.center.longitude)
            .bind(km_to_meters(query.radius_km) + DWITHIN_SLACK_METERS)
            .bind(query.radius_km)
            .fetch_one(&self.pool)
            .await?;

        Ok(total.max(0) as u64)
    }
}

#[async_trait]
impl EventLocator for PgEventLocator {
    async fn has_spatial_index(&self) -> AppResult<bool> {
        let available = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM pg_extension WHERE extname = 'postgis')"
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(available)
    }

    async fn query_within_distance(&self, query: &RadiusQuery, now: DateTime<Utc>) -> AppResult<SearchPage> {
        let sql = format!(
            r#"{}
            SELECT
                id, title, description, category_id, venue_id, venue_name, status,
                start_date, end_date, latitude, longitude, distance,
                COUNT(*) OVER() AS total
            FROM measured
            WHERE distance <= $9
            ORDER BY distance, start_date, id
            LIMIT $10 OFFSET $11
            "#,
            measured_within_distance_cte()
        );

        let rows = sqlx::query_as::<_, DistanceRow>(&sql)
            .bind(query.filters.effective_status())
            .bind(now)
            .bind(query.filters.category_id)
            .bind(query.filters.start_date)
            .bind(query.filters.end_date)
            .bind(query.center.latitude)
            .bind(query.center.longitude)
            .bind(km_to_meters(query.radius_km) + DWITHIN_SLACK_METERS)
            .bind(query.radius_km)
            .bind(i64::from(query.limit))
            .bind(query.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        // COUNT(*) OVER() пуст, если страница за пределами выдачи
        let total = match rows.first() {
            Some(row) => row.total.max(0) as u64,
            None if query.offset() > 0 => self.count_within_distance(query, now).await?,
            None => 0,
        };

        debug!("spatial query returned {} of {} events", rows.len(), total);

        Ok(SearchPage {
            events: rows.into_iter().map(|r| r.event).collect(),
            total,
        })
    }

    async fn load_candidates(
        &self,
        filters: &SearchFilters,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<EventLocationRow>> {
        let sql = format!(
            r#"{}
            SELECT
                id, title, description, category_id, venue_id, venue_name, status,
                start_date, end_date, latitude, longitude, venue_latitude, venue_longitude
            FROM located
            WHERE resolved_latitude IS NOT NULL AND resolved_longitude IS NOT NULL
            ORDER BY start_date, id
            "#,
            located_events_cte()
        );

        let rows = sqlx::query_as::<_, EventLocationRow>(&sql)
            .bind(filters.effective_status())
            .bind(now)
            .bind(filters.category_id)
            .bind(filters.start_date)
            .bind(filters.end_date)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIGRATION: &str = include_str!("../migrations/0001_init.sql");

    #[test]
    fn radius_predicates_use_indexed_expressions() {
        let sql = measured_within_distance_cte();

        for point in [EVENT_POINT, VENUE_POINT] {
            assert!(sql.contains(&format!("ST_DWithin({}, {}, $8, false)", point, SEARCH_CENTER)));
            let indexed = point.replace("(e.", "(").replace(" e.", " ").replace("(v.", "(").replace(" v.", " ");
            assert!(MIGRATION.contains(&indexed), "no GIST index on {}", indexed);
        }
        // выражение через CASE индексом не покрывается
        assert!(!sql.contains("resolved_"));
    }

    #[test]
    fn reported_distance_uses_haversine_sphere() {
        let sql = measured_within_distance_cte();
        assert!(!sql.contains("ST_Distance"));
        assert!(sql.contains(&format!("2 * {} * ASIN", EARTH_RADIUS_KM)));
    }

    #[test]
    fn slack_covers_rounding_and_sphere_mismatch() {
        // 5 м на округление плюс разница радиусов на максимальном радиусе поиска
        let sphere_mismatch_m = km_to_meters(500.0) * (6_371.008_8 / EARTH_RADIUS_KM - 1.0);
        assert!(5.0 + sphere_mismatch_m < DWITHIN_SLACK_METERS);
    }
}
