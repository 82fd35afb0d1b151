use tracing_subscriber::{fmt, EnvFilter};

use relay_bridge::{start_server, AppState};
use relay_core::{Relay, RelayConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    fmt()
        .compact()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RelayConfig::from_env();
    let addr = config.bridge_addr.clone();
    tracing::info!(broker = %config.broker_url, addr = %addr, "Starting Relay...");

    // An unreachable broker is fatal here; nothing is served without it
    let relay = Relay::new(config).await?;

    let server_result = start_server(&addr, AppState::new(relay.clone()), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    })
    .await;

    relay.shutdown().await?;
    server_result.map_err(|e| e.into())
}
