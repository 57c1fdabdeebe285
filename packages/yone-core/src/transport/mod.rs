//! Voice transport seams and connection management.
//!
//! The platform integration supplies a [`VoiceGateway`] that opens
//! connections. Each connection has two halves:
//!
//! - a [`TransportHandle`] the engine uses to play, pause and stop audio
//! - a [`VoiceLink`], the low-level socket the [`ReconnectSupervisor`] watches
//!
//! [`TransportConnector`] serializes connection establishment per guild,
//! enforces the endpoint-rejection cooldown, and wraps every live connection
//! so that disconnecting it also stops its supervisor.

mod backoff;
mod connector;
mod reconnect;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::sync::oneshot;

pub use backoff::ExponentialBackoff;
pub use connector::{CooldownRegistry, TransportConnector, TransportLost};
pub use reconnect::{classify_close, CloseAction, ReconnectSupervisor, SupervisorExit};

use crate::error::TransportResult;
use crate::protocol_constants::REMOTE_RECONNECT_OPTIONS;
use crate::state::DecoderConfig;
use crate::track::TrackSummary;
use crate::types::{ChannelId, GuildId};

// ─────────────────────────────────────────────────────────────────────────────
// Playback Start Options
// ─────────────────────────────────────────────────────────────────────────────

/// Decoder options for one playback attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Offset to start at, in seconds (a seek restart).
    pub start_offset: Option<u64>,
    /// Options placed before the decoder input.
    pub before_options: String,
    /// Options placed after the decoder input.
    pub output_options: String,
}

impl StartOptions {
    /// Builds the decoder options for a track, optionally starting mid-way.
    pub fn for_track(track: &TrackSummary, start_offset: Option<u64>, decoder: &DecoderConfig) -> Self {
        let mut before = Vec::new();
        if let Some(offset) = start_offset {
            before.push(format!("-ss {offset}"));
        }
        if track.remote {
            before.push(REMOTE_RECONNECT_OPTIONS.to_string());
        }
        Self {
            start_offset,
            before_options: before.join(" "),
            output_options: decoder.output_options.clone(),
        }
    }

    /// Splits the before-input options into individual arguments.
    pub fn before_args(&self) -> Vec<String> {
        self.before_options.split_whitespace().map(str::to_string).collect()
    }

    /// Splits the after-input options into individual arguments.
    pub fn output_args(&self) -> Vec<String> {
        self.output_options.split_whitespace().map(str::to_string).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Playback Completion
// ─────────────────────────────────────────────────────────────────────────────

/// How a playback attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEnd {
    /// The source played to its end.
    Finished,
    /// `stop()` was called (skip, seek, teardown).
    Stopped,
    /// The decoder failed mid-stream.
    Failed(String),
    /// The transport dropped the attempt without reporting (e.g. disconnect).
    Dropped,
}

/// Sender half handed to the transport implementation.
///
/// Resolve it exactly once when playback ends; dropping it resolves the
/// completion with [`PlaybackEnd::Dropped`].
pub struct PlaybackNotifier(oneshot::Sender<PlaybackEnd>);

impl PlaybackNotifier {
    pub fn notify(self, end: PlaybackEnd) {
        // The player may already have stopped listening (teardown).
        let _ = self.0.send(end);
    }
}

/// Future resolved when a playback attempt ends for any reason.
pub struct PlaybackCompletion(oneshot::Receiver<PlaybackEnd>);

impl PlaybackCompletion {
    /// Creates a linked notifier/completion pair.
    pub fn channel() -> (PlaybackNotifier, PlaybackCompletion) {
        let (tx, rx) = oneshot::channel();
        (PlaybackNotifier(tx), PlaybackCompletion(rx))
    }
}

impl Future for PlaybackCompletion {
    type Output = PlaybackEnd;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0)
            .poll(cx)
            .map(|result| result.unwrap_or(PlaybackEnd::Dropped))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Seams
// ─────────────────────────────────────────────────────────────────────────────

/// Control surface of a live voice connection.
///
/// The synchronous methods never suspend so they can be called while holding
/// a session's critical section.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    /// Channel the connection currently sits in.
    fn channel(&self) -> Option<ChannelId>;

    fn is_connected(&self) -> bool;

    fn is_playing(&self) -> bool;

    fn is_paused(&self) -> bool;

    /// Starts playing a track. The completion resolves when playback ends.
    fn play(&self, track: &TrackSummary, options: &StartOptions) -> TransportResult<PlaybackCompletion>;

    /// Stops in-flight playback; its completion resolves with [`PlaybackEnd::Stopped`].
    fn stop(&self);

    /// Pauses playback. Returns false if nothing was playing.
    fn pause(&self) -> bool;

    /// Resumes paused playback. Returns false if nothing was paused.
    fn resume(&self) -> bool;

    /// Moves the connection to another channel in the same guild.
    async fn move_to(&self, channel: ChannelId) -> TransportResult<()>;

    /// Disconnects. Idempotent.
    async fn disconnect(&self);
}

/// Why a voice socket stopped delivering events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkClosed {
    /// The socket closed with a close code.
    Code(u16),
    /// The socket stopped responding.
    Timeout,
}

/// Low-level voice socket watched by the [`ReconnectSupervisor`].
#[async_trait]
pub trait VoiceLink: Send {
    /// Polls socket events until the socket closes, then reports why.
    async fn closed(&mut self) -> LinkClosed;

    /// Attempts to re-establish the session at the same endpoint after a forced disconnect.
    async fn potential_reconnect(&mut self) -> bool;

    /// Tears down and re-opens the socket.
    async fn reconnect(&mut self) -> TransportResult<()>;

    /// Closes the socket for good.
    async fn disconnect(&mut self);
}

/// A freshly opened connection.
pub struct VoiceConnection {
    pub handle: Arc<dyn TransportHandle>,
    pub link: Box<dyn VoiceLink>,
}

/// Opens voice connections for the platform.
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn connect(&self, guild: GuildId, channel: ChannelId) -> TransportResult<VoiceConnection>;
}
