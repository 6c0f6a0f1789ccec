//! dandidav Server Entry Point
//!
//! Loads configuration, connects the archive client and serves WebDAV
//! until interrupted.

use std::sync::Arc;

use dandidav::telemetry::{init_tracing, TelemetryConfig};
use dandidav::{create_router, ServerConfig, ServerError, ServerResult};
use dandidav_client::DandiClient;
use dandidav_storage::NamespaceProvider;

#[tokio::main]
async fn main() -> ServerResult<()> {
    let config = ServerConfig::load()?;
    init_tracing(&TelemetryConfig::from(&config))?;

    let client = DandiClient::new(&config.client_config())?;
    tracing::info!(api_url = client.base_url(), "Using archive API");
    let provider = Arc::new(NamespaceProvider::new(
        Arc::new(client),
        config.cache_config(),
    ));

    let app = create_router(provider);

    let addr = config.bind_addr()?;
    tracing::info!(%addr, "Starting dandidav WebDAV server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(ServerError::Serve)?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
