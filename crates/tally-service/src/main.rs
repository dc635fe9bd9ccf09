//! Tally service entry point.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tally_service::ledger::spawn_reconciler;
use tally_service::{create_router, AppState, ServiceConfig};
use tally_store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tally=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting tally service");

    let config = ServiceConfig::from_env()?;

    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir,
        pricing_version = config.pricing.version,
        stripe_configured = %config.stripe_api_key.is_some(),
        jwt_configured = %config.jwt_secret.is_some(),
        "Service configuration loaded"
    );

    let store = open_store(&config)?;

    if config.reconcile_interval_seconds > 0 {
        spawn_reconciler(
            Arc::clone(&store),
            Duration::from_secs(config.reconcile_interval_seconds),
        );
    }

    let state = AppState::new(store, config.clone())?;
    let app = create_router(state);

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(feature = "rocksdb-backend")]
fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    tracing::info!(path = %config.data_dir, "Opening RocksDB store");
    Ok(Arc::new(tally_store::RocksStore::open(&config.data_dir)?))
}

#[cfg(not(feature = "rocksdb-backend"))]
fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    tracing::warn!(
        data_dir = %config.data_dir,
        "Built without rocksdb-backend; using the in-memory store"
    );
    Ok(Arc::new(tally_store::MemoryStore::new()))
}
