//! MeterBill Service Binary

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meterbill_common::VERSION;
use meterbill_engine::MeterBill;
use meterbill_server::{api, config::ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting MeterBill v{}", VERSION);

    // Load configuration
    let config = ServerConfig::load()?;
    info!("Loaded configuration: {:?}", config);

    let service = Arc::new(MeterBill::in_memory(config.meterbill_config()?)?);
    info!(
        timezone = %config.billing.timezone,
        store_timeout_ms = config.engine.store_timeout_ms,
        one_reading_per_month = config.engine.one_reading_per_month,
        "MeterBill service initialized"
    );

    let app = api::router(service);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("REST API listening on {}", addr);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Received shutdown signal");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Shutting down MeterBill");
    Ok(())
}
