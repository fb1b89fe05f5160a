//! HTTP server hosting the control plane's admin surface.

use std::net::SocketAddr;
use std::sync::Arc;

use fleetctl_core::Controller;
use tokio::net::TcpListener;
use tracing::info;

use crate::routes::routes;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Starts the HTTP server and the scaling controller's control loop
/// together; both stop on the same shutdown signal.
pub async fn serve(config: ServerConfig, controller: Arc<Controller>) -> anyhow::Result<()> {
    controller.start();

    let app = routes(controller.clone());
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("starting fleetctl server on {}", actual_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server shutdown complete");
    controller.stop().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler - is tokio runtime configured correctly?");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler - is tokio runtime configured correctly?")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received SIGINT, shutting down...");
        }
        _ = terminate => {
            info!("received SIGTERM, shutting down...");
        }
    }
}
