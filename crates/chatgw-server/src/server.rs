//! HTTP front end: wires the registry and dispatcher into the API router
//! and serves it until shutdown.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::api::{self, AppState};
use crate::config::GatewayConfig;
use crate::session::dispatch::Dispatcher;
use crate::session::registry::SessionRegistry;

pub async fn run(config: GatewayConfig) -> std::io::Result<()> {
    let registry = Arc::new(SessionRegistry::new(config.clone()));
    let dispatcher = Arc::new(Dispatcher::new(registry));
    let app = api::router(AppState { dispatcher });

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(
        port = config.port,
        backend = %config.backend_addr(),
        "chatgw-server listening"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
