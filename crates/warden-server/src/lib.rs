//! Warden Server
//!
//! HTTP API for running agents through the resilience layer and reading back
//! execution logs, metrics and health.
//! This is a library crate — the server is started via `start_server()`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{http::Method, routing::get, Json, Router};
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use warden_core::clock::system_clock;
use warden_core::gateway::build_gateway;
use warden_core::{
    BreakerRegistry, Database, HealthMonitor, MetricsAggregator, RetryController, SharedClock,
    SharedDatabase, SharedGateway, WardenConfig,
};

pub mod error;
pub mod routes;
pub mod types;

/// Configuration for starting the server.
pub struct ServerConfig {
    /// Port to listen on (default: 3000).
    pub port: u16,
    /// Interface to bind (default: 0.0.0.0).
    pub bind: String,
    /// Everything else: storage, gateway, breaker, retry, health, metrics.
    pub warden: WardenConfig,
}

impl ServerConfig {
    pub fn from_warden(warden: WardenConfig) -> Self {
        Self {
            port: warden.server.port,
            bind: warden.server.bind.clone(),
            warden,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_warden(WardenConfig::default())
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<WardenConfig>,
    /// Execution log, shared by the write path and every read endpoint.
    pub db: SharedDatabase,
    pub registry: Arc<BreakerRegistry>,
    pub controller: Arc<RetryController>,
    pub health: Arc<HealthMonitor>,
    pub metrics: Arc<MetricsAggregator>,
    pub clock: SharedClock,
}

impl AppState {
    /// Wire the components together. The breaker registry is created here and
    /// shared by the retry controller and the health monitor.
    pub fn new(
        config: WardenConfig,
        db: SharedDatabase,
        gateway: SharedGateway,
        clock: SharedClock,
    ) -> Self {
        let registry = Arc::new(BreakerRegistry::new(config.breaker.clone(), clock.clone()));
        let controller = Arc::new(RetryController::new(
            registry.clone(),
            gateway,
            db.clone(),
            clock.clone(),
            config.retry.clone(),
            Duration::from_millis(config.gateway.timeout_ms),
        ));
        let health = Arc::new(
            HealthMonitor::new(
                registry.clone(),
                db.clone(),
                clock.clone(),
                config.health.clone(),
            )
            .with_signature_len(config.metrics.error_signature_len),
        );
        let metrics = Arc::new(MetricsAggregator::new(
            db.clone(),
            clock.clone(),
            config.metrics.clone(),
        ));

        Self {
            config: Arc::new(config),
            db,
            registry,
            controller,
            health,
            metrics,
            clock,
        }
    }
}

/// Routes, CORS and request tracing around `state`.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .nest("/agents", routes::agents_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Open the execution log, build the gateway and assemble the router.
pub fn build_router(config: &ServerConfig) -> anyhow::Result<(Router, AppState)> {
    let db_path = config.warden.storage.resolved_db_path();
    let db = Database::new(&db_path)?.into_shared();
    tracing::info!(path = %db_path.display(), "Opened execution log");

    let gateway = build_gateway(&config.warden.gateway)?;
    let state = AppState::new(config.warden.clone(), db, gateway, system_clock());

    Ok((router(state.clone()), state))
}

/// Start the Warden server and block until shutdown.
pub async fn start_server(config: ServerConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.bind, config.port).parse()?;
    let (app, _state) = build_router(&config)?;

    tracing::info!("Warden server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}
