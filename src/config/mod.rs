use config::{builder::DefaultState, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub geo: GeoConfig,
    pub holds: HoldsConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

// Настройки Redis
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub search_cache_ttl_seconds: u64,
}

/// Какую стратегию поиска по радиусу использовать.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoStrategyMode {
    /// Решает проверка наличия PostGIS при старте.
    Auto,
    SpatialIndex,
    Haversine,
}

// Настройки гео-поиска
#[derive(Debug, Clone, Deserialize)]
pub struct GeoConfig {
    pub strategy: GeoStrategyMode,
    pub default_limit: u32,
    pub max_limit: u32,
    pub max_radius_km: f64,
    pub geocoder_url: Option<String>,
    pub geocoder_timeout_ms: u64,
}

// Настройки холдов
#[derive(Debug, Clone, Deserialize)]
pub struct HoldsConfig {
    pub default_ttl_seconds: i64,
    pub max_ttl_seconds: i64,
    pub max_quantity: i32,
    pub sweep_interval_seconds: u64,
}

// Настройки Circuit Breaker
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

impl Config {
    /// Значения по умолчанию → файлы `config/*` → переменные окружения `APP__SECTION__KEY`.
    ///
    /// Привычные `DATABASE_URL`, `REDIS_URL`, `PORT`, `RUST_LOG` тоже учитываются.
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Self::with_defaults(config::Config::builder())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("database.url", env::var("DATABASE_URL").ok())?
            .set_override_option("redis.url", env::var("REDIS_URL").ok())?
            .set_override_option("app.port", env::var("PORT").ok())?
            .set_override_option("app.rust_log", env::var("RUST_LOG").ok())?;

        builder.build()?.try_deserialize()
    }

    pub fn with_defaults(
        builder: ConfigBuilder<DefaultState>,
    ) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        builder
            .set_default("app.host", "0.0.0.0")?
            .set_default("app.port", 8000)?
            .set_default("app.environment", "development")?
            .set_default("app.rust_log", "event_discovery=debug,tower_http=debug")?
            .set_default("database.pool_size", 20)?
            .set_default("redis.url", "redis://127.0.0.1:6379")?
            .set_default("redis.search_cache_ttl_seconds", 30)?
            .set_default("geo.strategy", "auto")?
            .set_default("geo.default_limit", 20)?
            .set_default("geo.max_limit", 100)?
            .set_default("geo.max_radius_km", 500.0)?
            .set_default("geo.geocoder_timeout_ms", 1500)?
            .set_default("holds.default_ttl_seconds", 600)?
            .set_default("holds.max_ttl_seconds", 1800)?
            .set_default("holds.max_quantity", 10)?
            .set_default("holds.sweep_interval_seconds", 60)?
            .set_default("circuit_breaker.failure_threshold", 5)?
            .set_default("circuit_breaker.timeout_seconds", 30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults_with_db() -> Config {
        Config::with_defaults(config::Config::builder())
            .unwrap()
            .set_override("database.url", "postgres://localhost/events")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn defaults_are_complete() {
        let config = defaults_with_db();
        assert_eq!(config.app.port, 8000);
        assert_eq!(config.geo.strategy, GeoStrategyMode::Auto);
        assert_eq!(config.geo.max_limit, 100);
        assert_eq!(config.holds.default_ttl_seconds, 600);
        assert!(config.geo.geocoder_url.is_none());
        assert!(!config.app.is_production());
    }

    #[test]
    fn database_url_is_required() {
        let result: Result<Config, _> = Config::with_defaults(config::Config::builder())
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize();
        assert!(result.is_err());
    }

    #[test]
    fn strategy_parses_from_string() {
        let config: Config = Config::with_defaults(config::Config::builder())
            .unwrap()
            .set_override("database.url", "postgres://localhost/events")
            .unwrap()
            .set_override("geo.strategy", "haversine")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.geo.strategy, GeoStrategyMode::Haversine);
    }
}
