//! Main entry point for the geochart datapack service.
//!
//! Resolves configuration from the environment, scans the data root into
//! the in-memory index, starts the retention sweep, and serves the REST
//! API.
//!
//! # Environment Variables
//! - `GEOCHART_REST_ADDR`: server address (default: "0.0.0.0:3000")
//! - `GEOCHART_DATA_DIR`: datapack storage root (required)
//! - `GEOCHART_ENCRYPT_JAR`: encryption executable jar (required)
//! - `GEOCHART_ENCRYPT_TIMEOUT_SECS`: encryption timeout (default: 300)
//! - `GEOCHART_MAX_UPLOAD_BYTES`: upload size cap (default: 512 MiB)
//! - `GEOCHART_ACTIVE_WORKSHOPS`: comma-separated active workshop ids

use api_rest::{build_router, AppState, ServiceConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often the retention sweep looks for sunsetted user uploads.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("geochart=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = Arc::new(ServiceConfig::from_env()?);
    tracing::info!("++ Starting geochart datapack service on {}", cfg.addr);

    let state = AppState::initialise(cfg.clone());
    let loaded = state.store.load_existing().await?;
    tracing::info!(
        "++ Loaded {loaded} datapacks from {}",
        cfg.data_dir.display()
    );

    let sweeper_store = state.store.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            match sweeper_store.sweep_expired(chrono::Utc::now()).await {
                Ok(0) => {}
                Ok(swept) => tracing::info!("retention sweep removed {swept} datapacks"),
                Err(e) => tracing::warn!("retention sweep failed: {e}"),
            }
        }
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&cfg.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
