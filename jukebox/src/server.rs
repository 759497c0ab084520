//! HTTP server lifecycle.

use tokio::net::TcpListener;
use tracing::{error, info};

use jukebox_api::{create_router, AppState};
use jukebox_core::Config;

use crate::bootstrap::Services;

pub struct JukeboxServer {
    config: Config,
    services: Services,
}

impl JukeboxServer {
    pub const fn new(config: Config, services: Services) -> Self {
        Self { config, services }
    }

    /// Serve until SIGINT/SIGTERM, then stop the playback loop.
    pub async fn start(self) -> anyhow::Result<()> {
        let orchestrator = self.services.orchestrator.clone();
        let router = create_router(
            AppState::new(self.services.orchestrator, self.services.identity),
            &self.config.server.cors_origin,
        );

        let address = self.config.http_address();
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            error!("Failed to bind HTTP address {}: {}", address, e);
            anyhow::anyhow!("Failed to bind {address}: {e}")
        })?;
        info!("HTTP server listening on {}", address);

        let graceful = async move {
            shutdown_signal().await;
            info!("Shutdown signal received, starting graceful shutdown...");
            // closes the event channels so open sockets end
            orchestrator.shutdown();
        };

        axum::serve(listener, router)
            .with_graceful_shutdown(graceful)
            .await?;

        info!("HTTP server shut down gracefully");
        Ok(())
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
