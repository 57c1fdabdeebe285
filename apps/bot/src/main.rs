//! Yone Bot - headless runner for the Yone music engine.
//!
//! Plays through the local speakers and takes commands on stdin, so the whole
//! engine (queue, panel, loop and seek policy, teardown) can be driven without
//! a chat platform. The optional status API exposes sessions and events.

mod config;
mod console;
mod local;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use yone_core::{bootstrap_services, start_server, ChannelSink, TokioSpawner};

use crate::config::BotConfig;
use crate::local::{ConsoleChannel, LocalGateway};

/// Yone Bot - per-guild music queue engine, driven from the terminal.
#[derive(Parser, Debug)]
#[command(name = "yone-bot")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "YONE_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Status API port; 0 disables it (overrides config file).
    #[arg(short = 'p', long, env = "YONE_STATUS_PORT")]
    status_port: Option<u16>,

    /// Path to the yt-dlp executable (overrides config file).
    #[arg(long, env = "YONE_YTDLP_PATH")]
    ytdlp: Option<String>,

    /// Path to the player used for local playback (overrides config file).
    #[arg(long, env = "YONE_PLAYER_PATH")]
    player: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Yone Bot v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        BotConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.status_port {
        config.engine.status_port = port;
    }
    if let Some(path) = args.ytdlp {
        config.engine.resolver.ytdlp_path = path;
    }
    if let Some(path) = args.player {
        config.player_path = path;
    }

    log::info!(
        "Configuration: status_port={}, yt-dlp={}, player={}",
        config.engine.status_port,
        config.engine.resolver.ytdlp_path,
        config.player_path
    );

    let gateway = LocalGateway::new(config.player_path.clone(), TokioSpawner::current());
    let services =
        bootstrap_services(&config.engine, gateway).context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    let server_handle = if config.engine.status_port > 0 {
        let app_state = services
            .app_state()
            .with_trusted_origins(config.trusted_origins.clone());
        let port = config.engine.status_port;
        let token = services.cancel_token.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = start_server(app_state, port, token).await {
                log::error!("Status API error: {}", e);
            }
        }))
    } else {
        log::info!("Status API disabled");
        None
    };

    let sink: Arc<dyn ChannelSink> = Arc::new(ConsoleChannel::default());
    let console_handle = tokio::spawn(console::run(
        Arc::clone(&services.engine),
        sink,
        services.cancel_token.clone(),
    ));

    // Wait for a shutdown signal or the console closing
    tokio::select! {
        _ = shutdown_signal() => log::info!("Shutdown signal received, cleaning up..."),
        _ = services.cancel_token.cancelled() => log::info!("Console closed, cleaning up..."),
    }

    // Graceful shutdown
    services.shutdown().await;

    console_handle.abort();
    if let Some(handle) = server_handle {
        if let Err(e) = handle.await {
            log::debug!("Status API task ended abnormally: {}", e);
        }
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
