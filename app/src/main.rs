mod auth;
mod config;
mod error;
mod logging;
mod models;
mod mqtt;
mod rest;
mod sensor;
mod service;

use crate::auth::SensorAuthorizer;
use crate::config::Config;
use crate::error::StartupError;
use crate::models::{MemoryGateway, PersistenceGateway, PgGateway};
use crate::service::IngestionService;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

static TERMINATED: AtomicUsize = AtomicUsize::new(0);

#[tokio::main]
pub async fn main() -> Result<(), StartupError> {
    dotenv::dotenv().ok();
    let config = Arc::new(Config::from_env()?);
    logging::init(&config.log_level(), config.otel_stdout())?;
    info!(version = soilsense_core::CORE_VERSION, "Starting soilsense");

    let (gateway, memory) = build_gateway(&config).await?;
    let seed_config = config.clone();
    let authorizer = Arc::new(SensorAuthorizer::new(
        move || seed_config.reload_allowed_sensors(),
        config.allowlist_bypasses_prefix(),
    ));
    info!(
        allowed = ?config.allowed_sensors(),
        bypass_prefix = config.allowlist_bypasses_prefix(),
        "Loaded sensor allow-list"
    );

    let service = Arc::new(IngestionService::new(
        config.mqtt_settings(),
        config.ingest_queue_capacity(),
        authorizer,
        gateway,
    ));
    service.start()?;

    let (shutdown_sender, mut shutdown) = watch::channel(false);
    register_sigint_handler(shutdown_sender)?;
    let signal = async move {
        let _ = shutdown.wait_for(|stop| *stop).await;
    };
    let served = rest::dispatch_server(service.clone(), config.bind_addr(), signal).await;

    service.stop().await;
    if let Some(memory) = memory {
        info!(
            sensors = memory.sensor_count(),
            readings = memory.reading_count(),
            "Discarding in-memory store"
        );
    }
    logging::shutdown();
    Ok(served?)
}

async fn build_gateway(
    config: &Config,
) -> Result<(Arc<dyn PersistenceGateway>, Option<Arc<MemoryGateway>>), StartupError> {
    match config.database_url() {
        Some(url) => {
            let conn = models::establish_db_connection(&url, config.db_pool_max()).await?;
            models::create_schema(&conn).await?;
            info!("Connected to database");
            let gateway: Arc<dyn PersistenceGateway> = Arc::new(PgGateway::new(conn));
            Ok((gateway, None))
        }
        None => {
            let max_readings = config.memory_max_readings();
            warn!(
                max_readings,
                "DATABASE_URL is not set, readings are kept in memory and lost on exit. \
                 Only the newest {} are retained",
                max_readings
            );
            let memory = Arc::new(MemoryGateway::with_max_readings(max_readings));
            let gateway: Arc<dyn PersistenceGateway> = memory.clone();
            Ok((gateway, Some(memory)))
        }
    }
}

/// First Ctrl-C shuts down gracefully, the second one exits immediately.
fn register_sigint_handler(shutdown: watch::Sender<bool>) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        let count = TERMINATED.fetch_add(1, Ordering::Relaxed);
        if count >= 1 {
            warn!("Force killing");
            std::process::exit(1);
        }
        info!("Shutting down, press Ctrl-C again to force");
        shutdown.send_replace(true);
    })
}
