//! Tollgate Server - HTTP control API.
//!
//! Exposes the proxy's control surface over JSON so a dashboard or script
//! can drive it without the CLI.
//!
//! ## Endpoints
//!
//! - `POST /api/proxy/start` - Start the proxy listener
//! - `POST /api/proxy/stop` - Stop the proxy listener
//! - `GET /api/proxy/status` - Running state, address, session count
//! - `GET /api/sessions` - Logged-in client addresses
//! - `GET /api/hosts` - List filter entries
//! - `POST /api/hosts` - Add a filter entry
//! - `DELETE /api/hosts/{host}` - Remove a filter entry
//! - `POST /api/reports` - Generate a per-IP report from the event log
//! - `GET /api/about` - Product description
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tollgate_proxy::{ProxyConfig, ProxyController};
//! use tollgate_server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let controller = Arc::new(ProxyController::new(ProxyConfig::default()).unwrap());
//!     let server = Server::new(ServerConfig::default(), controller).unwrap();
//!     server.run().await.unwrap();
//! }
//! ```

pub mod error;
mod handlers;
pub mod models;
pub mod state;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use tollgate_proxy::{ProxyController, ProxyError};

pub use error::{ApiError, Result};
pub use state::AppState;

/// Default API port.
pub const DEFAULT_PORT: u16 = 48780;

/// Default API host (localhost only).
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    /// Sets the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }
}

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("failed to bind API listener: {0}")]
    Bind(#[from] ProxyError),

    /// Listener conversion failed.
    #[error("failed to bind to {0}: {1}")]
    Listener(SocketAddr, std::io::Error),

    /// Server runtime error.
    #[error("server error: {0}")]
    Runtime(String),
}

/// Builds the API router over the given state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/proxy/start", post(handlers::start_proxy))
        .route("/api/proxy/stop", post(handlers::stop_proxy))
        .route("/api/proxy/status", get(handlers::proxy_status))
        .route("/api/sessions", get(handlers::list_sessions))
        .route("/api/hosts", get(handlers::list_hosts).post(handlers::add_host))
        .route("/api/hosts/{host}", delete(handlers::remove_host))
        .route("/api/reports", post(handlers::generate_report))
        .route("/api/about", get(handlers::about))
        .layer(cors)
        .with_state(state)
}

/// The HTTP API server.
pub struct Server {
    router: Router,
    addr: SocketAddr,
}

impl Server {
    /// Creates a server controlling `controller`.
    pub fn new(
        config: ServerConfig,
        controller: Arc<ProxyController>,
    ) -> std::result::Result<Self, ServerError> {
        let addr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| ServerError::Runtime(format!("invalid address: {}", e)))?;

        Ok(Self {
            router: router(AppState::new(controller)),
            addr,
        })
    }

    /// Returns the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Runs the server until the process exits.
    pub async fn run(self) -> std::result::Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the server until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> std::result::Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Starting Tollgate API server on {}", self.addr);

        let std_listener = tollgate_proxy::server::bind(self.addr)?;
        let listener = tokio::net::TcpListener::from_std(std_listener)
            .map_err(|e| ServerError::Listener(self.addr, e))?;

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Runtime(e.to_string()))?;

        info!("Tollgate API server stopped");
        Ok(())
    }

    /// Returns the router for testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}
