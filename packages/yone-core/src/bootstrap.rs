//! Application bootstrap and dependency wiring.
//!
//! This module is the composition root: the one place where the engine, its
//! resolver, the event bridge and the status API state are instantiated and
//! wired together. Front-ends supply only the platform pieces (the voice
//! gateway and, optionally, a resolver of their own).

use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::api::AppState;
use crate::engine::{EngineDeps, MusicEngine};
use crate::error::{YoneError, YoneResult};
use crate::events::{BroadcastEventBridge, EventEmitter, LoggingEventEmitter};
use crate::resolver::{TrackResolver, YtDlpResolver};
use crate::runtime::TokioSpawner;
use crate::state::Config;
use crate::track::FsJanitor;
use crate::transport::VoiceGateway;

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    pub engine: Arc<MusicEngine>,
    /// Event bridge feeding the status API's event stream.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Shared HTTP client for connection pooling.
    http_client: Client,
    pub spawner: TokioSpawner,
    /// Cancelled on shutdown; the status API stops with it.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// State for [`start_server`](crate::api::start_server).
    pub fn app_state(&self) -> AppState {
        AppState::new(Arc::clone(&self.engine), Arc::clone(&self.event_bridge))
    }

    /// Tears down every session, disconnects every transport and stops the API.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");
        self.cancel_token.cancel();
        let sessions = self.engine.store().len();
        self.engine.shutdown().await;
        log::info!("[Bootstrap] Shutdown complete ({} session(s) closed)", sessions);
    }
}

/// Creates the shared HTTP client used for attachment downloads.
fn create_http_client(config: &Config) -> YoneResult<Client> {
    Client::builder()
        .timeout(config.resolver.download_timeout())
        .build()
        .map_err(|e| YoneError::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Bootstraps the engine with the production `yt-dlp` resolver.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the HTTP client cannot be built.
pub fn bootstrap_services(
    config: &Config,
    gateway: Arc<dyn VoiceGateway>,
) -> YoneResult<BootstrappedServices> {
    let http_client = create_http_client(config)?;
    let resolver = Arc::new(YtDlpResolver::with_client(
        config.resolver.clone(),
        http_client.clone(),
    ));
    bootstrap_with_resolver(config, gateway, resolver, http_client)
}

/// Bootstraps the engine around a caller-supplied resolver.
///
/// The wiring order is:
///
/// 1. Configuration validation
/// 2. Shared infrastructure (spawner, event bridge, cancellation token)
/// 3. The engine (connector, session store, player, control surface)
pub fn bootstrap_with_resolver(
    config: &Config,
    gateway: Arc<dyn VoiceGateway>,
    resolver: Arc<dyn TrackResolver>,
    http_client: Client,
) -> YoneResult<BootstrappedServices> {
    config.validate().map_err(YoneError::Configuration)?;

    let spawner = TokioSpawner::current();

    let event_bridge = Arc::new(BroadcastEventBridge::new(config.event_channel_capacity));
    event_bridge.set_external_emitter(Arc::new(LoggingEventEmitter));

    let engine = MusicEngine::new(
        config.clone(),
        EngineDeps {
            gateway,
            resolver,
            janitor: Arc::new(FsJanitor),
            emitter: Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
            spawner: spawner.clone(),
        },
    );

    Ok(BootstrappedServices {
        engine,
        event_bridge,
        http_client,
        spawner,
        cancel_token: CancellationToken::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::MockGateway;

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let mut config = Config::default();
        config.event_channel_capacity = 0;
        let err = bootstrap_services(&config, MockGateway::new()).err().unwrap();
        assert!(matches!(err, YoneError::Configuration(_)));
    }

    #[tokio::test]
    async fn shutdown_cancels_token() {
        let services = bootstrap_services(&Config::default(), MockGateway::new()).unwrap();
        assert!(services.http_client().get("http://example.com").build().is_ok());
        services.shutdown().await;
        assert!(services.cancel_token.is_cancelled());
        assert!(services.engine.store().is_empty());
    }
}
