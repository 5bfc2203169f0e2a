//! Поиск событий в радиусе от точки.
//!
//! Две стратегии за одним трейтом: индексный запрос к PostGIS и запасной
//! вариант, который загружает всех кандидатов и считает гаверсинусы в
//! процессе. Стратегия выбирается один раз при старте.
//!
//! Запасной вариант читает все подходящие события целиком. Для развёртываний
//! без PostGIS это известное ограничение по масштабу.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{GeoConfig, GeoStrategyMode};
use crate::error::{AppError, AppResult};
use crate::geo::{bounding_box, haversine_km, BoundingBox, GeoPoint};
use crate::models::{
    EventWithDistance, NearbyEvents, PaginationMeta, RadiusQuery, SearchFilters, SearchLocation, SearchPage,
};
use crate::repository::EventLocator;
use crate::services::geocoding::LocationEnricher;
use chrono::{DateTime, Utc};

/// Предфильтр прямоугольником включается только там, где приближение 111.32 км/° надёжно.
const PREFILTER_MAX_RADIUS_KM: f64 = 200.0;
const PREFILTER_MAX_ABS_LAT: f64 = 70.0;

#[async_trait]
pub trait GeoSearchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, query: &RadiusQuery, now: DateTime<Utc>) -> AppResult<SearchPage>;
}

/// Один запрос `ST_DWithin` с сортировкой и LIMIT/OFFSET на стороне базы.
pub struct SpatialIndexSearch {
    locator: Arc<dyn EventLocator>,
}

impl SpatialIndexSearch {
    pub fn new(locator: Arc<dyn EventLocator>) -> Self {
        Self { locator }
    }
}

#[async_trait]
impl GeoSearchStrategy for SpatialIndexSearch {
    fn name(&self) -> &'static str {
        "spatial_index"
    }

    async fn search(&self, query: &RadiusQuery, now: DateTime<Utc>) -> AppResult<SearchPage> {
        self.locator.query_within_distance(query, now).await
    }
}

/// Загрузка всех кандидатов и гаверсинус для каждого, пагинация в памяти.
pub struct HaversineSearch {
    locator: Arc<dyn EventLocator>,
}

impl HaversineSearch {
    pub fn new(locator: Arc<dyn EventLocator>) -> Self {
        Self { locator }
    }
}

// Радиус расширен, чтобы предфильтр не отбрасывал точки, которые пройдут точную проверку
fn prefilter_box(center: GeoPoint, radius_km: f64) -> Option<BoundingBox> {
    if radius_km <= PREFILTER_MAX_RADIUS_KM && center.latitude.abs() <= PREFILTER_MAX_ABS_LAT {
        Some(bounding_box(center, radius_km * 1.02 + 0.01))
    } else {
        None
    }
}

#[async_trait]
impl GeoSearchStrategy for HaversineSearch {
    fn name(&self) -> &'static str {
        "haversine"
    }

    async fn search(&self, query: &RadiusQuery, now: DateTime<Utc>) -> AppResult<SearchPage> {
        let candidates = self.locator.load_candidates(&query.filters, now).await?;
        let scanned = candidates.len();
        let prefilter = prefilter_box(query.center, query.radius_km);

        let mut matched: Vec<EventWithDistance> = candidates
            .into_iter()
            .filter_map(|row| {
                let point = row.resolved_point()?;
                if prefilter.is_some_and(|bbox| !bbox.contains(point)) {
                    return None;
                }
                let distance = haversine_km(query.center, point);
                (distance <= query.radius_km).then(|| row.with_distance(point, distance))
            })
            .collect();

        // sort_by стабилен: равные расстояния остаются в порядке перечисления
        matched.sort_by(|a, b| a.distance.total_cmp(&b.distance));

        let total = matched.len() as u64;
        let events: Vec<EventWithDistance> = matched
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit as usize)
            .collect();

        debug!("haversine fallback scanned {} candidates, {} within radius", scanned, total);
        Ok(SearchPage { events, total })
    }
}

/// Наличие PostGIS проверяется один раз за жизнь процесса.
#[derive(Debug, Default)]
pub struct SpatialCapability {
    detected: OnceCell<bool>,
}

impl SpatialCapability {
    pub fn new() -> Self {
        Self { detected: OnceCell::new() }
    }

    pub async fn detect(&self, locator: &dyn EventLocator) -> bool {
        *self
            .detected
            .get_or_init(|| async {
                match locator.has_spatial_index().await {
                    Ok(available) => {
                        info!("Spatial index available: {}", available);
                        available
                    }
                    Err(e) => {
                        warn!("Spatial index detection failed, using haversine fallback: {}", e);
                        false
                    }
                }
            })
            .await
    }

    pub fn cached(&self) -> Option<bool> {
        self.detected.get().copied()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SearchLimits {
    pub max_limit: u32,
    pub max_radius_km: f64,
}

impl From<&GeoConfig> for SearchLimits {
    fn from(config: &GeoConfig) -> Self {
        Self {
            max_limit: config.max_limit,
            max_radius_km: config.max_radius_km,
        }
    }
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self { max_limit: 100, max_radius_km: 500.0 }
    }
}

pub struct GeoSearchService {
    strategy: Arc<dyn GeoSearchStrategy>,
    enricher: Option<Arc<dyn LocationEnricher>>,
    clock: Arc<dyn Clock>,
    limits: SearchLimits,
}

impl GeoSearchService {
    pub fn new(strategy: Arc<dyn GeoSearchStrategy>, limits: SearchLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            strategy,
            enricher: None,
            clock,
            limits,
        }
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn LocationEnricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    /// Выбор стратегии при старте: явный режим из конфига или результат проверки PostGIS.
    pub async fn select_strategy(
        locator: Arc<dyn EventLocator>,
        mode: GeoStrategyMode,
        capability: &SpatialCapability,
    ) -> Arc<dyn GeoSearchStrategy> {
        let use_index = match mode {
            GeoStrategyMode::SpatialIndex => {
                if !capability.detect(locator.as_ref()).await {
                    warn!("geo.strategy=spatial_index forced, but PostGIS was not detected");
                }
                true
            }
            GeoStrategyMode::Haversine => false,
            GeoStrategyMode::Auto => capability.detect(locator.as_ref()).await,
        };

        let strategy: Arc<dyn GeoSearchStrategy> = if use_index {
            Arc::new(SpatialIndexSearch::new(locator))
        } else {
            Arc::new(HaversineSearch::new(locator))
        };
        info!("Geo search strategy: {}", strategy.name());
        strategy
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub async fn find_events_within_radius(
        &self,
        point: GeoPoint,
        radius_km: f64,
        page: u32,
        limit: u32,
        filters: SearchFilters,
    ) -> AppResult<NearbyEvents> {
        let query = self.validate(point, radius_km, page, limit, filters)?;

        let result = self.strategy.search(&query, self.clock.now()).await?;
        info!(
            "nearby search ({}) at ({}, {}) r={}km: {} total",
            self.strategy.name(),
            query.center.latitude,
            query.center.longitude,
            query.radius_km,
            result.total
        );

        let search_location = self.search_location(query.center).await;

        Ok(NearbyEvents {
            data: result.events,
            meta: PaginationMeta::new(result.total, query.page, query.limit),
            search_location,
        })
    }

    fn validate(
        &self,
        point: GeoPoint,
        radius_km: f64,
        page: u32,
        limit: u32,
        filters: SearchFilters,
    ) -> AppResult<RadiusQuery> {
        let center = GeoPoint::new(point.latitude, point.longitude)?;

        if !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(AppError::InvalidInput("radius must be greater than 0".to_string()));
        }
        if radius_km > self.limits.max_radius_km {
            return Err(AppError::InvalidInput(format!(
                "radius must not exceed {} km",
                self.limits.max_radius_km
            )));
        }
        if page < 1 {
            return Err(AppError::InvalidInput("page must be at least 1".to_string()));
        }
        if limit < 1 || limit > self.limits.max_limit {
            return Err(AppError::InvalidInput(format!(
                "limit must be between 1 and {}",
                self.limits.max_limit
            )));
        }
        if let (Some(from), Some(to)) = (filters.start_date, filters.end_date) {
            if from > to {
                return Err(AppError::InvalidInput("startDate must not be after endDate".to_string()));
            }
        }

        Ok(RadiusQuery {
            center,
            radius_km,
            page,
            limit,
            filters,
        })
    }

    async fn search_location(&self, center: GeoPoint) -> SearchLocation {
        match &self.enricher {
            Some(enricher) => enricher.enrich(center).await.unwrap_or_else(|e| {
                debug!("search location left unenriched: {}", e);
                SearchLocation::from(center)
            }),
            None => SearchLocation::from(center),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::repository::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLocator {
        checks: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl EventLocator for CountingLocator {
        async fn has_spatial_index(&self) -> AppResult<bool> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(AppError::Database(sqlx::Error::PoolTimedOut))
            } else {
                Ok(true)
            }
        }

        async fn query_within_distance(&self, _: &RadiusQuery, _: DateTime<Utc>) -> AppResult<SearchPage> {
            Ok(SearchPage { events: Vec::new(), total: 0 })
        }

        async fn load_candidates(
            &self,
            _: &SearchFilters,
            _: DateTime<Utc>,
        ) -> AppResult<Vec<crate::models::EventLocationRow>> {
            Ok(Vec::new())
        }
    }

    struct BrokenEnricher;

    #[async_trait]
    impl LocationEnricher for BrokenEnricher {
        async fn enrich(&self, _: GeoPoint) -> AppResult<SearchLocation> {
            Err(AppError::Geocoder("down".to_string()))
        }
    }

    fn service() -> GeoSearchService {
        let locator: Arc<dyn EventLocator> = Arc::new(MemoryStore::new());
        GeoSearchService::new(
            Arc::new(HaversineSearch::new(locator)),
            SearchLimits::default(),
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn capability_is_detected_once() {
        let locator = CountingLocator { checks: AtomicUsize::new(0), fail: false };
        let capability = SpatialCapability::new();
        assert_eq!(capability.cached(), None);

        assert!(capability.detect(&locator).await);
        assert!(capability.detect(&locator).await);
        assert_eq!(locator.checks.load(Ordering::SeqCst), 1);
        assert_eq!(capability.cached(), Some(true));
    }

    #[tokio::test]
    async fn failed_detection_is_remembered_as_unavailable() {
        let locator = CountingLocator { checks: AtomicUsize::new(0), fail: true };
        let capability = SpatialCapability::new();

        assert!(!capability.detect(&locator).await);
        assert!(!capability.detect(&locator).await);
        assert_eq!(locator.checks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn auto_mode_follows_capability() {
        let with_index: Arc<dyn EventLocator> = Arc::new(MemoryStore::with_spatial_index());
        let strategy =
            GeoSearchService::select_strategy(with_index, GeoStrategyMode::Auto, &SpatialCapability::new()).await;
        assert_eq!(strategy.name(), "spatial_index");

        let without: Arc<dyn EventLocator> = Arc::new(MemoryStore::new());
        let strategy =
            GeoSearchService::select_strategy(without, GeoStrategyMode::Auto, &SpatialCapability::new()).await;
        assert_eq!(strategy.name(), "haversine");
    }

    #[tokio::test]
    async fn rejects_bad_parameters() {
        let service = service();
        let point = GeoPoint { latitude: 43.24, longitude: 76.95 };

        for (radius, page, limit) in [(0.0, 1, 20), (-5.0, 1, 20), (501.0, 1, 20), (10.0, 0, 20), (10.0, 1, 0), (10.0, 1, 101)] {
            let result = service
                .find_events_within_radius(point, radius, page, limit, SearchFilters::default())
                .await;
            assert!(
                matches!(result, Err(AppError::InvalidInput(_))),
                "radius={} page={} limit={}",
                radius,
                page,
                limit
            );
        }

        let out_of_range = GeoPoint { latitude: 91.0, longitude: 0.0 };
        let result = service
            .find_events_within_radius(out_of_range, 10.0, 1, 20, SearchFilters::default())
            .await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn inverted_date_window_is_rejected() {
        let now = Utc::now();
        let filters = SearchFilters {
            start_date: Some(now),
            end_date: Some(now - chrono::Duration::days(1)),
            ..SearchFilters::default()
        };
        let result = service()
            .find_events_within_radius(GeoPoint { latitude: 0.0, longitude: 0.0 }, 10.0, 1, 20, filters)
            .await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn enrichment_failure_keeps_bare_coordinates() {
        let service = service().with_enricher(Arc::new(BrokenEnricher));
        let point = GeoPoint { latitude: 43.24, longitude: 76.95 };

        let result = service
            .find_events_within_radius(point, 10.0, 1, 20, SearchFilters::default())
            .await
            .unwrap();

        assert_eq!(result.search_location, SearchLocation::from(point));
        assert!(result.data.is_empty());
        assert_eq!(result.meta.total, 0);
        assert_eq!(result.meta.total_pages, 0);
    }

    #[test]
    fn prefilter_only_for_small_radii_at_moderate_latitudes() {
        assert!(prefilter_box(GeoPoint { latitude: 43.0, longitude: 76.0 }, 50.0).is_some());
        assert!(prefilter_box(GeoPoint { latitude: 43.0, longitude: 76.0 }, 300.0).is_none());
        assert!(prefilter_box(GeoPoint { latitude: 78.0, longitude: 15.0 }, 50.0).is_none());
    }
}
