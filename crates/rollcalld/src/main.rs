use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod service;

use config::{BusKind, Config};
use dbus_interface::{AttendanceInterface, BUS_NAME, OBJECT_PATH};
use rollcall_store::Store;
use service::AttendanceService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env();
    tracing::debug!(?config, "configuration loaded");

    let store = Arc::new(
        Store::open(&config.db_path, config.storage_dir.clone())
            .with_context(|| format!("opening record store at {}", config.db_path.display()))?,
    );

    // Model loading and the initial gallery read are blocking.
    let engine = {
        let config = config.clone();
        let source = store.clone();
        tokio::task::spawn_blocking(move || engine::load_engine(&config, source)).await?
    };
    let availability = engine.availability();
    tracing::info!(
        detection = availability.detection,
        embedding = availability.embedding,
        "recognition engine ready"
    );

    let service = Arc::new(AttendanceService::new(
        store,
        Arc::new(engine),
        config.similarity_threshold,
    ));

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, AttendanceInterface::new(service))?
        .build()
        .await
        .context("registering on D-Bus")?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
