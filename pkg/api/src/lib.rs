//! Control-plane HTTP surface: the signed callback receiver, broker
//! registration, health and metrics.

pub mod handlers;
pub mod server;

use std::sync::Arc;

use pkg_state::Store;

/// Shared application state injected into all Axum handlers.
pub struct AppState<S: Store> {
    pub store: Arc<S>,
    /// Token brokers present when registering their public key.
    pub join_token: String,
}

impl<S: Store> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            join_token: self.join_token.clone(),
        }
    }
}
