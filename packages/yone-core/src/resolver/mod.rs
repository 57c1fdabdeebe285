//! Track resolution: turning references and uploads into [`Track`]s.
//!
//! The engine only talks to the [`TrackResolver`] trait. The production
//! implementation, [`YtDlpResolver`], shells out to `yt-dlp`; tests plug in
//! canned resolvers.
//!
//! The free functions here handle the text side of a request: extracting URLs
//! from a query, splitting comma-separated requests, and recognising playlist
//! links.

mod ytdlp;

use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::Url;

pub use ytdlp::YtDlpResolver;

use crate::error::ResolveResult;
use crate::protocol_constants::PLAYLIST_URL_PREFIX;
use crate::track::Track;

/// An uploaded file attached to a play request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Original file name; becomes the track title and decides the staged extension.
    pub filename: String,
    pub source: AttachmentSource,
}

/// Where an attachment's bytes can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentSource {
    /// A downloadable URL (e.g. a chat CDN link).
    Url(String),
    /// A file already on local disk; it is copied, never moved.
    Path(PathBuf),
}

/// Resolves references into playable tracks.
///
/// Implementations may block on network or subprocess I/O; callers run them
/// outside any session critical section.
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Resolves a URL or search term. A search yields its first hit; a
    /// non-lazy playlist URL yields every entry.
    async fn resolve(&self, reference: &str) -> ResolveResult<Vec<Track>>;

    /// Lists the entry URLs of a playlist without resolving them.
    async fn playlist_entries(&self, playlist_url: &str) -> ResolveResult<Vec<String>>;

    /// Stages an uploaded file locally and returns a track owning it.
    async fn resolve_attachment(&self, attachment: &Attachment) -> ResolveResult<Track>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Reference Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Splits a query into the URLs it contains and the remaining free text.
///
/// A URL starts at `http://` or `https://` and runs to the next whitespace.
/// Whatever is left, whitespace-normalised, is the search term.
pub fn parse_urls_and_text(query: &str) -> (Vec<String>, String) {
    let mut urls = Vec::new();
    let mut words = Vec::new();

    for token in query.split_whitespace() {
        let start = [token.find("https://"), token.find("http://")]
            .into_iter()
            .flatten()
            .min();
        match start {
            Some(idx) => {
                if idx > 0 {
                    words.push(&token[..idx]);
                }
                urls.push(token[idx..].to_string());
            }
            None => words.push(token),
        }
    }

    (urls, words.join(" "))
}

/// Splits comma-separated requests, dropping empty pieces.
pub fn split_by_commas(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(str::to_string)
        .collect()
}

/// Returns the `list` query parameter of a URL, if present.
fn playlist_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == "list")
        .map(|(_, value)| value.into_owned())
}

/// Returns true if the URL carries a `list` query parameter.
pub fn is_playlist_url(url: &str) -> bool {
    playlist_id(url).is_some()
}

/// Rewrites a playlist link (e.g. a watch URL with `&list=`) to the canonical
/// playlist page. Links without a list id are returned unchanged.
pub fn canonical_playlist_url(url: &str) -> String {
    match playlist_id(url) {
        Some(id) if !id.is_empty() => format!("{PLAYLIST_URL_PREFIX}{id}"),
        _ => url.to_string(),
    }
}
