//! Read-only HTTP status API.
//!
//! Exposes session snapshots and the live event stream for dashboards and
//! health checks. Nothing here mutates engine state; every handler reads
//! through the [`MusicEngine`].

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::engine::MusicEngine;
use crate::events::BroadcastEventBridge;

pub mod http;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MusicEngine>,
    /// Source of the `/api/events` stream.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Origins allowed to read the API from a browser.
    pub trusted_origins: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(engine: Arc<MusicEngine>, event_bridge: Arc<BroadcastEventBridge>) -> Self {
        Self {
            engine,
            event_bridge,
            trusted_origins: Arc::new(Vec::new()),
        }
    }

    pub fn with_trusted_origins(mut self, origins: Vec<String>) -> Self {
        self.trusted_origins = Arc::new(origins);
        self
    }
}

/// Serves the status API on `port` until `shutdown` is cancelled.
pub async fn start_server(
    state: AppState,
    port: u16,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("[Api] Status API listening on http://{}", listener.local_addr()?);

    let app = http::create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    log::info!("[Api] Status API stopped");
    Ok(())
}
