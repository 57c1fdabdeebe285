//! Fixed constants that should NOT be changed.
//!
//! These values are defined by the voice gateway close-code table, the decoder
//! command line, or the panel layout the chat client renders. Tunable timings
//! live in [`crate::state::Config`].

// ─────────────────────────────────────────────────────────────────────────────
// Voice Gateway Close Codes
// ─────────────────────────────────────────────────────────────────────────────

/// Normal closure (RFC 6455).
pub const CLOSE_NORMAL: u16 = 1000;

/// Disconnected by force: kicked, moved, or the channel was deleted.
///
/// The session may be movable, so a single reconnect is attempted.
pub const CLOSE_FORCED_DISCONNECT: u16 = 4014;

/// Voice server crashed; the client should not resume.
pub const CLOSE_VOICE_SERVER_CRASHED: u16 = 4015;

/// The voice endpoint is temporarily rejecting connections for this guild.
///
/// Triggers a per-guild cooldown instead of a retry loop.
pub const CLOSE_ENDPOINT_REJECTING: u16 = 4022;

// ─────────────────────────────────────────────────────────────────────────────
// Decoder
// ─────────────────────────────────────────────────────────────────────────────

/// Input options for remote sources so the decoder survives CDN hiccups.
pub const REMOTE_RECONNECT_OPTIONS: &str =
    "-reconnect 1 -reconnect_streamed 1 -reconnect_delay_max 5";

// ─────────────────────────────────────────────────────────────────────────────
// Panel Layout
// ─────────────────────────────────────────────────────────────────────────────

/// Number of cells in the progress bar (including the knob).
pub const PROGRESS_BAR_WIDTH: usize = 15;

/// Character budget for the "Up Next" field before it is truncated.
pub const UP_NEXT_CHAR_BUDGET: usize = 800;

/// Maximum number of per-entry remove buttons on a panel.
pub const MAX_REMOVE_BUTTONS: usize = 10;

/// Remove buttons per panel row.
pub const REMOVE_BUTTONS_PER_ROW: usize = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Playlists
// ─────────────────────────────────────────────────────────────────────────────

/// Canonical playlist URL prefix used once a `list` id has been extracted.
pub const PLAYLIST_URL_PREFIX: &str = "https://www.youtube.com/playlist?list=";

// ─────────────────────────────────────────────────────────────────────────────
// Status API
// ─────────────────────────────────────────────────────────────────────────────

/// Service name reported by `/health`.
pub const APP_NAME: &str = "yone";

/// Interval between keep-alive comments on the event stream.
pub const SSE_KEEPALIVE_SECS: u64 = 15;
