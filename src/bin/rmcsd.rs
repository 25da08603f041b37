//! Standalone streaming daemon
//!
//! Run with: cargo run --bin rmcsd
//!
//! Configuration comes from the environment:
//!   RMCS_BROKER_HOST      broker hostname        (default 127.0.0.1)
//!   RMCS_BROKER_PORT      broker port            (default 1883)
//!   RMCS_THING_NAME       robot thing name       (default "robot")
//!   RMCS_CLIENT_ID        MQTT client id         (default "rmcs-stream")
//!   RMCS_USERNAME         broker username        (default anonymous)
//!   RMCS_PASSWORD         broker password
//!   RMCS_DEFAULT_CAMERA   camera loaded at start (default 1)
//!
//! The daemon streams until interrupted, then announces its departure on
//! the broker and shuts down cleanly.

use rmcs_stream::{StreamConfig, StreamService};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = StreamConfig::from_env();
    tracing::info!(
        broker = %config.broker_host,
        port = config.broker_port,
        thing = %config.thing_name,
        "Starting rmcsd"
    );

    let service = StreamService::start(config).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received, shutting down");

    service.stop().await;
    Ok(())
}
