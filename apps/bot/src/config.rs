//! Bot configuration.
//!
//! Supports loading from YAML files with environment variable overrides.
//! The engine section is `yone_core::Config` verbatim, so any engine tunable
//! can be set from the file.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Bot configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Engine tunables (player timings, transport, resolver, decoder).
    pub engine: yone_core::Config,

    /// Executable used by the local transport to play audio.
    /// Override: `YONE_PLAYER_PATH`
    pub player_path: String,

    /// Origins allowed to read the status API from a browser.
    pub trusted_origins: Vec<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            engine: yone_core::Config::default(),
            player_path: "ffplay".to_string(),
            trusted_origins: vec!["http://localhost".to_string(), "http://127.0.0.1".to_string()],
        }
    }
}

impl BotConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_yaml(
                &std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?,
            )
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            None => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies `YONE_*` overrides read through `var`.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(port) = var("YONE_STATUS_PORT").and_then(|v| v.parse().ok()) {
            self.engine.status_port = port;
        }
        if let Some(path) = var("YONE_YTDLP_PATH").filter(|v| !v.trim().is_empty()) {
            self.engine.resolver.ytdlp_path = path;
        }
        if let Some(path) = var("YONE_FFMPEG_PATH").filter(|v| !v.trim().is_empty()) {
            self.engine.decoder.executable = path;
        }
        if let Some(path) = var("YONE_PLAYER_PATH").filter(|v| !v.trim().is_empty()) {
            self.player_path = path;
        }
        if let Some(secs) = var("YONE_EMPTY_QUEUE_GRACE_SECS").and_then(|v| v.parse().ok()) {
            self.engine.player.empty_queue_grace_secs = secs;
        }
        if let Some(secs) = var("YONE_COOLDOWN_SECS").and_then(|v| v.parse().ok()) {
            self.engine.transport.cooldown_secs = secs;
        }

        // Note: YONE_LOG_LEVEL is handled by clap via #[arg(env = ...)] in main.rs
    }
}
