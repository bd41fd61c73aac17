//! Application state for the API server.

use std::sync::Arc;

use tollgate_proxy::ProxyController;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// The proxy being controlled.
    pub controller: Arc<ProxyController>,
}

impl AppState {
    pub fn new(controller: Arc<ProxyController>) -> Self {
        Self { controller }
    }
}
