//! Warden Server
//!
//! Loads `~/.warden/config.toml` (plus environment overrides) and serves the
//! agent execution and health API.

use warden_core::WardenConfig;
use warden_server::{start_server, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let warden = WardenConfig::load()?;
    tracing::info!(
        threshold = warden.breaker.failure_threshold,
        max_attempts = warden.retry.max_attempts,
        gateway = warden.gateway.base_url.as_deref().unwrap_or("<none>"),
        "Starting warden-server"
    );

    start_server(ServerConfig::from_warden(warden)).await
}
