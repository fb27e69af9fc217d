//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the datapack REST server on its own, for development and
//! debugging. The workspace's main `geochart-run` binary is the
//! production entry point.

use api_rest::{build_router, AppState, ServiceConfig};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = Arc::new(ServiceConfig::from_env()?);
    tracing::info!("-- Starting geochart REST API on {}", cfg.addr);

    let state = AppState::initialise(cfg.clone());
    let loaded = state.store.load_existing().await?;
    tracing::info!("-- Loaded {loaded} datapacks from {}", cfg.data_dir.display());

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&cfg.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
