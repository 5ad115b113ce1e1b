//! Web server and API endpoints for the Top HAT dashboard.
//!
//! This module serves the dashboard page and a small JSON control surface.
//! Every endpoint goes through the shared [`HardwareSupervisor`].

pub mod config;
pub mod handlers;
pub mod router;

// Re-export commonly used items
pub use config::WebConfig;
pub use handlers::AppState;
pub use router::create_app;

use crate::error::{HatError, Result};
use crate::hardware::HardwareSupervisor;
use crate::usb::UsbMonitor;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Serve the dashboard until Ctrl-C or SIGTERM, then release the hardware.
pub async fn start_web_server(config: WebConfig, hat: Arc<HardwareSupervisor>) -> Result<()> {
    let state = AppState::new(hat.clone(), Arc::new(UsbMonitor::new()));
    let app = create_app(config.clone(), state).await?;

    let addr = config
        .bind_address()
        .parse::<SocketAddr>()
        .map_err(|e| HatError::config_error(format!("Invalid bind address: {}", e)))?;

    info!("Starting Top HAT dashboard on http://{}", addr);
    info!("Snapshot endpoint: http://{}/json", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| HatError::web_server_error(format!("Failed to bind to address: {}", e)))?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| HatError::web_server_error(format!("Server error: {}", e)));

    info!("Web server stopped, releasing hardware");
    tokio::task::spawn_blocking(move || hat.shutdown())
        .await
        .map_err(|e| HatError::web_server_error(format!("Hardware shutdown failed: {}", e)))?;

    served
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
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
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
