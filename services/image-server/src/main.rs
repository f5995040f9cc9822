//! imgsrv image server
//!
//! Serves local sources read-only over HTTP under routes derived from the
//! SHA-512 of their content.
//!
//! This service:
//! - Inspects every configured source once, in order, at startup
//! - Derives `<url-prefix>/<sha512>` routes, skipping duplicate content
//! - Streams each source's canonical byte range on request

use anyhow::{Context, Result};
use clap::Parser;
use imgsrv_server::{api, config::Config, logging, AppState, Inspector, Registry};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    logging::init(&config.log_level, config.log_format);

    info!("Starting imgsrv image server");
    info!(
        source_count = config.sources.len(),
        listen_addr = %config.listen_addr(),
        url_prefix = %config.url_prefix,
        "Configuration loaded"
    );

    // Inspection is blocking I/O and strictly sequential.
    let sources = config.sources.clone();
    let url_prefix = config.url_prefix.clone();
    let registry = tokio::task::spawn_blocking(move || {
        Registry::build(sources.as_slice(), &url_prefix, &Inspector::new())
    })
    .await
    .context("source inspection task failed")?;

    let registry = match registry {
        Ok(registry) => registry,
        Err(e) => {
            error!(error = %e, "Failed to inspect sources");
            return Err(e.into());
        }
    };
    info!(route_count = registry.len(), "Sources registered");

    let app = api::create_router(AppState::new(registry));

    let listen_addr = config.listen_addr();
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    info!(addr = %listen_addr, "Listening for connections");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Image server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Received shutdown signal");
}
