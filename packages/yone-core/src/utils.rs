//! General utilities shared across the engine.

use std::time::{SystemTime, UNIX_EPOCH};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Source Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Returns true if the locator is an `http://` or `https://` URL.
///
/// Remote sources get reconnect hints when handed to the decoder.
#[must_use]
pub fn is_http_source(locator: &str) -> bool {
    locator.starts_with("http://") || locator.starts_with("https://")
}

/// Truncates a string to at most `max_chars` characters, appending `…` when cut.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
