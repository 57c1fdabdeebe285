//! Centralized error types for the Yone core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types per concern using `thiserror`
//! - Gives every error a stable machine-readable code via [`ErrorCode`]
//! - Maps the application-wide error to HTTP status codes for the status API

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolution Errors
// ─────────────────────────────────────────────────────────────────────────────

/// A reference or attachment could not be turned into a track.
///
/// Always reported per item; never aborts a batch.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The resolver executable could not be started.
    #[error("resolver unavailable: {0}")]
    Unavailable(String),

    /// The resolver ran but reported failure.
    #[error("resolver exited with status {status}: {stderr}")]
    Process { status: i32, stderr: String },

    /// The resolver output could not be parsed.
    #[error("unreadable resolver output: {0}")]
    Parse(String),

    /// The reference resolved to nothing playable.
    #[error("nothing playable found for {0}")]
    NotFound(String),

    /// An attachment could not be fetched.
    #[error("attachment download failed: {0}")]
    Download(String),

    /// Local filesystem error while staging an attachment.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorCode for ResolveError {
    fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "resolver_unavailable",
            Self::Process { .. } => "resolver_failed",
            Self::Parse(_) => "resolver_parse_error",
            Self::NotFound(_) => "not_found",
            Self::Download(_) => "download_failed",
            Self::Io(_) => "io_error",
        }
    }
}

/// Convenient Result alias for resolution.
pub type ResolveResult<T> = Result<T, ResolveError>;

// ─────────────────────────────────────────────────────────────────────────────
// Transport Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Voice transport failures: connection, playback start, and closure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No live transport for the guild.
    #[error("transport is not connected")]
    NotConnected,

    /// Connection attempts are suppressed after an endpoint rejection.
    #[error("connection attempts suppressed for another {remaining_secs}s")]
    CoolingDown { remaining_secs: u64 },

    /// Connection did not complete in time.
    #[error("connection timed out after {0}s")]
    Timeout(u64),

    /// The underlying socket closed with a close code.
    #[error("connection closed with code {0}")]
    Closed(u16),

    /// Connection establishment failed for another reason.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The external decoder executable is missing.
    #[error("decoder executable not found: {0}")]
    DecoderMissing(String),

    /// Playback could not be started.
    #[error("playback failed: {0}")]
    Playback(String),
}

impl ErrorCode for TransportError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::CoolingDown { .. } => "cooling_down",
            Self::Timeout(_) => "connect_timeout",
            Self::Closed(_) => "connection_closed",
            Self::Connect(_) => "connect_failed",
            Self::DecoderMissing(_) => "decoder_missing",
            Self::Playback(_) => "playback_failed",
        }
    }
}

/// Convenient Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

// ─────────────────────────────────────────────────────────────────────────────
// Control Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Rejections from the control surface. State is never mutated when one is returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlError {
    /// The actor does not own the panel the action came from.
    #[error("only the panel owner can use these controls")]
    NotPanelOwner,

    /// No session exists for the guild.
    #[error("the queue is empty")]
    NoSession,

    /// The action needs a track that is currently playing.
    #[error("nothing is playing")]
    NothingPlaying,

    /// Seek offset at or beyond the known track length.
    #[error("track is only {duration}s long (requested {requested}s)")]
    SeekOutOfRange { requested: u64, duration: u64 },

    /// A time specification could not be parsed.
    #[error("invalid time: {0}")]
    InvalidTime(String),

    /// The selection matched no queue entries.
    #[error("no queue entries selected")]
    EmptySelection,

    /// A panel button referenced an entry that no longer exists.
    #[error("queue entry {0} no longer exists")]
    StaleIndex(usize),
}

impl ErrorCode for ControlError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotPanelOwner => "not_panel_owner",
            Self::NoSession => "no_session",
            Self::NothingPlaying => "nothing_playing",
            Self::SeekOutOfRange { .. } => "seek_out_of_range",
            Self::InvalidTime(_) => "invalid_time",
            Self::EmptySelection => "empty_selection",
            Self::StaleIndex(_) => "stale_index",
        }
    }
}

/// Convenient Result alias for control actions.
pub type ControlResult<T> = Result<T, ControlError>;

// ─────────────────────────────────────────────────────────────────────────────
// Display Errors
// ─────────────────────────────────────────────────────────────────────────────

/// A display artifact could not be sent, edited or deleted.
///
/// Never fatal: callers log it and carry on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DisplayError {
    /// The artifact no longer exists (deleted by someone else).
    #[error("display artifact is gone")]
    Gone,

    /// The sink rejected the request.
    #[error("display sink error: {0}")]
    Sink(String),
}

impl ErrorCode for DisplayError {
    fn code(&self) -> &'static str {
        match self {
            Self::Gone => "artifact_gone",
            Self::Sink(_) => "sink_error",
        }
    }
}

/// Convenient Result alias for display sinks.
pub type DisplayResult<T> = Result<T, DisplayError>;

// ─────────────────────────────────────────────────────────────────────────────
// Application Error
// ─────────────────────────────────────────────────────────────────────────────

/// Application-wide error type for engine entry points and the status API.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum YoneError {
    /// Track resolution failed.
    #[error("Resolution failed: {0}")]
    Resolve(String),

    /// Voice transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Connection attempts are suppressed for the guild.
    #[error("Cooling down: {0}")]
    CoolingDown(String),

    /// A control action was rejected.
    #[error("Rejected: {0}")]
    Control(String),

    /// The requester is not in a voice channel.
    #[error("Requester is not in a voice channel")]
    NotInVoice,

    /// Requested session does not exist.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Server configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl YoneError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Resolve(_) => "resolve_failed",
            Self::Transport(_) => "transport_error",
            Self::CoolingDown(_) => "cooling_down",
            Self::Control(_) => "control_rejected",
            Self::NotInVoice => "not_in_voice",
            Self::SessionNotFound(_) => "session_not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) | Self::NotInVoice | Self::Control(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::CoolingDown(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Transport(_) | Self::Resolve(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type YoneResult<T> = Result<T, YoneError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for YoneError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ResolveError> for YoneError {
    fn from(err: ResolveError) -> Self {
        Self::Resolve(err.to_string())
    }
}

impl From<TransportError> for YoneError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::CoolingDown { .. } => Self::CoolingDown(err.to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<ControlError> for YoneError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::NoSession => Self::SessionNotFound(err.to_string()),
            other => Self::Control(other.to_string()),
        }
    }
}
