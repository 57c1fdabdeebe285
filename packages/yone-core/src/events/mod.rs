//! Engine events for observers.
//!
//! This module provides:
//! - [`EventEmitter`] trait for engine components to emit events
//! - [`BroadcastEventBridge`] feeding the status API's event stream
//! - Event types for the two observable domains (sessions and transports)

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::session::LoopMode;
use crate::types::{ChannelId, GuildId};

/// Events broadcast to observers.
///
/// Each category has its own inner event type with specific variants.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Session lifecycle and playback progress.
    Session(SessionEvent),

    /// Voice transport connectivity.
    Transport(TransportEvent),
}

/// Why a session was destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TeardownReason {
    /// The queue stayed empty past the grace window.
    QueueExhausted,
    /// An explicit stop was issued.
    Stopped,
    /// The transport was lost and not recovered.
    TransportLost,
    /// No humans were left in the voice channel.
    AutoLeave,
}

/// Events related to session state changes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// A session was created by the first track request.
    Created {
        #[serde(rename = "guildId")]
        guild_id: GuildId,
        #[serde(rename = "sessionId")]
        session_id: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A track started playing (also emitted on seek restarts).
    TrackStarted {
        #[serde(rename = "guildId")]
        guild_id: GuildId,
        title: String,
        /// Offset the playback started at, in seconds.
        #[serde(rename = "startOffset")]
        start_offset: u64,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// Playback of a track ended and the loop policy was applied.
    TrackFinished {
        #[serde(rename = "guildId")]
        guild_id: GuildId,
        title: String,
        #[serde(rename = "loopMode")]
        loop_mode: LoopMode,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The queue was mutated (tracks added, removed, shuffled).
    QueueChanged {
        #[serde(rename = "guildId")]
        guild_id: GuildId,
        /// Queue length including the now-playing entry.
        length: usize,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The session was torn down and its resources released.
    Destroyed {
        #[serde(rename = "guildId")]
        guild_id: GuildId,
        reason: TeardownReason,
        /// Number of queued tracks released during teardown.
        released: usize,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Events related to voice transport connectivity.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransportEvent {
    /// A connection was established (or moved) to a channel.
    Connected {
        #[serde(rename = "guildId")]
        guild_id: GuildId,
        #[serde(rename = "channelId")]
        channel_id: ChannelId,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The socket closed unexpectedly and a reconnect is scheduled.
    Reconnecting {
        #[serde(rename = "guildId")]
        guild_id: GuildId,
        /// Close code that triggered the reconnect, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<u16>,
        attempt: u32,
        #[serde(rename = "delayMs")]
        delay_ms: u64,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The endpoint rejected the guild; new connections are suppressed.
    CooldownStarted {
        #[serde(rename = "guildId")]
        guild_id: GuildId,
        #[serde(rename = "durationSecs")]
        duration_secs: u64,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The transport is gone for good.
    Disconnected {
        #[serde(rename = "guildId")]
        guild_id: GuildId,
        /// Close code, if the socket reported one.
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<u16>,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

impl From<SessionEvent> for BroadcastEvent {
    fn from(event: SessionEvent) -> Self {
        BroadcastEvent::Session(event)
    }
}

impl From<TransportEvent> for BroadcastEvent {
    fn from(event: TransportEvent) -> Self {
        BroadcastEvent::Transport(event)
    }
}
