//! HTTP server setup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::routes;
use crate::error::Result;
use crate::metrics::MetricsHub;
use crate::snapshot::SnapshotCell;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// The currently published snapshot; handlers load it lock-free.
    pub snapshot: Arc<SnapshotCell>,
    /// Counter sink hub.
    pub metrics: Arc<MetricsHub>,
    /// Server start time.
    pub start_time: Instant,
}

/// Create the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/_status", get(routes::status))
        .route("/", get(routes::query))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until interrupted.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("listening on {addr}");

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
