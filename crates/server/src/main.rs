//! Call bridge entrypoint

use anyhow::Context;
use call_bridge_config::Settings;
use call_bridge_server::{create_router, init_metrics, AppState};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::var("CALL_BRIDGE_CONFIG").ok().map(PathBuf::from);
    let settings = Settings::load(config_path.as_deref()).context("loading configuration")?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?config_path,
        bind = %settings.server.bind,
        "starting call bridge"
    );

    let _metrics_handle = init_metrics();

    let state = AppState::new(settings.clone());
    let cleanup_shutdown = state.registry.start_cleanup_task();

    let listener = tokio::net::TcpListener::bind(&settings.server.bind)
        .await
        .with_context(|| format!("binding {}", settings.server.bind))?;
    tracing::info!(addr = %settings.server.bind, "listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let _ = cleanup_shutdown.send(true);
    tracing::info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
