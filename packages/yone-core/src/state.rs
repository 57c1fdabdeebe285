//! Engine configuration types.
//!
//! [`Config`] groups every tunable the engine reads. All fields have defaults
//! matching the bot's production behaviour, so a partial YAML file (or none at
//! all) yields a working configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Player loop and control timings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PlayerConfig {
    /// How long an empty queue is tolerated before the session is torn down (seconds).
    pub empty_queue_grace_secs: u64,

    /// Interval between progress-bar refreshes while a track plays (seconds).
    pub progress_interval_secs: u64,

    /// Step used by rewind/forward when no time is given (seconds).
    pub default_step_secs: u64,

    /// Lifetime of transient notices posted to the text channel (seconds).
    pub notice_ttl_secs: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            empty_queue_grace_secs: 5,
            progress_interval_secs: 1,
            default_step_secs: 10,
            notice_ttl_secs: 5,
        }
    }
}

impl PlayerConfig {
    pub fn empty_queue_grace(&self) -> Duration {
        Duration::from_secs(self.empty_queue_grace_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn notice_ttl(&self) -> Duration {
        Duration::from_secs(self.notice_ttl_secs)
    }
}

/// Voice transport connection and reconnection behaviour.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TransportConfig {
    /// Upper bound for a single connection attempt (seconds).
    pub connect_timeout_secs: u64,

    /// Suppression window after an endpoint rejection (seconds).
    pub cooldown_secs: u64,

    /// Whether unexpected closures are retried with backoff.
    pub reconnect: bool,

    /// Base delay for exponential backoff (milliseconds).
    pub backoff_base_ms: u64,

    /// Largest exponent applied to the base delay.
    pub backoff_max_exponent: u32,

    /// Consecutive failed reconnects before the supervisor gives up.
    pub max_reconnect_failures: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            cooldown_secs: 60,
            reconnect: true,
            backoff_base_ms: 1000,
            backoff_max_exponent: 10,
            max_reconnect_failures: 5,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Track resolution via the `yt-dlp` executable.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ResolverConfig {
    /// Path or name of the `yt-dlp` executable.
    pub ytdlp_path: String,

    /// Format selector passed to `yt-dlp -f`.
    pub format: String,

    /// Search prefix used for free-text references (`ytsearch` → `ytsearch1:<term>`).
    pub default_search: String,

    /// File name prefix for staged attachments.
    pub temp_prefix: String,

    /// Upper bound for downloading one attachment (seconds).
    pub download_timeout_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: "yt-dlp".to_string(),
            format: "bestaudio[ext=m4a]/bestaudio/best".to_string(),
            default_search: "ytsearch".to_string(),
            temp_prefix: "yone_".to_string(),
            download_timeout_secs: 60,
        }
    }
}

impl ResolverConfig {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// External decoder process settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DecoderConfig {
    /// Path or name of the decoder executable.
    pub executable: String,

    /// Output-side options appended after the input.
    pub output_options: String,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            executable: "ffmpeg".to_string(),
            output_options: "-vn -loglevel warning -af volume=0.9".to_string(),
        }
    }
}

/// Configuration for the Yone engine.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    // Server
    /// Port for the read-only status API (0 = disabled).
    pub status_port: u16,

    /// Capacity of the event broadcast channel.
    pub event_channel_capacity: usize,

    // Engine
    pub player: PlayerConfig,
    pub transport: TransportConfig,
    pub resolver: ResolverConfig,
    pub decoder: DecoderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            status_port: 0,
            event_channel_capacity: 100,
            player: PlayerConfig::default(),
            transport: TransportConfig::default(),
            resolver: ResolverConfig::default(),
            decoder: DecoderConfig::default(),
        }
    }
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.event_channel_capacity == 0 {
            return Err(
                "event_channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        if self.player.progress_interval_secs == 0 {
            return Err("player.progress_interval_secs must be >= 1".to_string());
        }
        if self.transport.connect_timeout_secs == 0 {
            return Err("transport.connect_timeout_secs must be >= 1".to_string());
        }
        if self.transport.backoff_base_ms == 0 {
            return Err("transport.backoff_base_ms must be >= 1".to_string());
        }
        if self.transport.backoff_max_exponent > 20 {
            return Err("transport.backoff_max_exponent must be <= 20".to_string());
        }
        if self.resolver.ytdlp_path.trim().is_empty() {
            return Err("resolver.ytdlp_path must not be empty".to_string());
        }
        if self.decoder.executable.trim().is_empty() {
            return Err("decoder.executable must not be empty".to_string());
        }
        Ok(())
    }
}
