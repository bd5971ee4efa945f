use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

use pkg_state::Store;

use crate::AppState;
use crate::handlers::{callback, health, register};

/// Build the manager's inbound router.
pub fn build_router<S: Store>(state: AppState<S>) -> Router {
    Router::new()
        .route("/v1/callback", post(callback::handle_callback::<S>))
        .route("/v1/broker-register", post(register::handle_register::<S>))
        .route("/health", get(health::handle_health))
        .route("/metrics", get(health::handle_metrics))
        .with_state(state)
}

/// Serve the callback receiver until the process shuts down.
pub async fn start_server<S: Store>(addr: SocketAddr, state: AppState<S>) -> anyhow::Result<()> {
    let app = build_router(state);
    info!("Starting callback receiver on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
