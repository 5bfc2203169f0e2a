pub mod cache;
pub mod clock;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod geo;
pub mod middleware;
pub mod models;
pub mod redis_client;
pub mod repository;
pub mod services;

use std::sync::Arc;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::repository::{EventLocator, InventoryStore, PgEventLocator, PgInventoryStore};
use crate::services::geo_search::SearchLimits;
use crate::services::{GeoSearchService, HoldService, HoldSweeper, OrderService, SpatialCapability};

// Shared state для всего приложения
pub struct AppState {
    pub db: database::Database,
    pub cache: cache::CacheService,
    pub config: config::Config,
    pub geo: GeoSearchService,
    pub holds: HoldService,
    pub orders: OrderService,
    pub sweeper: Arc<HoldSweeper>,
}

impl AppState {
    pub async fn new(config: config::Config) -> anyhow::Result<Arc<Self>> {
        let db = database::Database::connect(&config.database).await?;

        db.run_migrations().await?;

        let redis = redis_client::RedisClient::new(&config.redis.url).await?;
        info!("Redis connected");
        let cache = cache::CacheService::new(redis);

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let locator: Arc<dyn EventLocator> = Arc::new(PgEventLocator::new(db.pool.clone()));
        let store: Arc<dyn InventoryStore> = Arc::new(PgInventoryStore::new(db.pool.clone()));

        // Проверка PostGIS один раз на процесс
        let capability = SpatialCapability::new();
        let strategy = GeoSearchService::select_strategy(locator, config.geo.strategy, &capability).await;
        let geo = Self::with_geocoder(
            GeoSearchService::new(strategy, SearchLimits::from(&config.geo), clock.clone()),
            &config,
        )?;

        let holds = HoldService::new(store.clone(), clock.clone(), config.holds.clone());
        let orders = OrderService::new(store.clone(), clock.clone());
        let sweeper = Arc::new(HoldSweeper::new(store, clock));

        Ok(Arc::new(Self {
            db,
            cache,
            config,
            geo,
            holds,
            orders,
            sweeper,
        }))
    }

    #[cfg(feature = "geocoding")]
    fn with_geocoder(geo: GeoSearchService, config: &config::Config) -> anyhow::Result<GeoSearchService> {
        use crate::services::geocoding::ReverseGeocoder;

        Ok(match ReverseGeocoder::from_config(&config.geo, &config.circuit_breaker)? {
            Some(geocoder) => {
                info!("Reverse geocoding enabled");
                geo.with_enricher(Arc::new(geocoder))
            }
            None => geo,
        })
    }

    #[cfg(not(feature = "geocoding"))]
    fn with_geocoder(geo: GeoSearchService, _config: &config::Config) -> anyhow::Result<GeoSearchService> {
        Ok(geo)
    }
}
