//! comborpc - standalone RPC server
//!
//! Serves the builtin `sys.*` methods over length-prefixed TCP frames.

use comborpc_server::{builtin, Config, Router, Server};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if COMBORPC_CONFIG is set, then env overrides)
    let config_path = std::env::var("COMBORPC_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(path) = &config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    tracing::info!("Starting comborpc server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Timeout: {:?}", config.network.timeout());
    match config.network.max_concurrency {
        Some(max) => tracing::info!("  Admission limit: {}", max),
        None => tracing::info!("  Admission limit: none"),
    }

    let router = builtin::register(Router::builder()).build();
    tracing::info!("  Methods: {}", router.methods().join(", "));

    let server = Server::new(config.server_config(), router);
    server.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, stopping server...");
    server.stop();
    server.closed().await;

    let stats = server.stats();
    tracing::info!(
        "Server stopped ({} connections, {} requests, {} errors)",
        stats.connections_total.load(std::sync::atomic::Ordering::Relaxed),
        stats.requests_total.load(std::sync::atomic::Ordering::Relaxed),
        stats.errors_total.load(std::sync::atomic::Ordering::Relaxed)
    );
    Ok(())
}
