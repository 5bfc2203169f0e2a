use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use event_discovery::{config::Config, controllers, AppState};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    let filter = tracing_subscriber::EnvFilter::new(&config.app.rust_log);
    if config.app.is_production() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting event discovery API ({})", config.app.environment);

    let app_state = AppState::new(config.clone()).await?;

    // --- Start background tasks ---

    // Физическая очистка истёкших холдов
    let sweep_every = Duration::from_secs(config.holds.sweep_interval_seconds.max(1));
    tokio::spawn(app_state.sweeper.clone().run_periodically(sweep_every));

    // --- Start the web server ---

    let app = Router::new()
        .route("/", get(|| async { "Event discovery API v1.0" }))
        .route("/health", get(health))
        .nest("/api", controllers::routes())
        .with_state(app_state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("{}:{}", config.app.host, config.app.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let database = state.db.ping().await;
    let redis = state.cache.ping().await;
    let status = if database { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        status,
        Json(serde_json::json!({
            "status": if database { "ok" } else { "degraded" },
            "database": database,
            "redis": redis,
            "geoStrategy": state.geo.strategy_name(),
        })),
    )
}
