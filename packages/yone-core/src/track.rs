//! Playable track descriptors and their release.
//!
//! A [`Track`] is deliberately not `Clone`: it owns whatever backs its source
//! (possibly a staged temporary file), and the only way to dispose of one is
//! to hand it to a [`TrackJanitor`] by value. That makes "released exactly
//! once" a property of the type rather than of careful bookkeeping. Code that
//! only needs to look at a track uses the cloneable [`TrackSummary`].

use std::path::PathBuf;

use serde::Serialize;

use crate::utils::is_http_source;

/// Where a track's audio comes from.
#[derive(Debug, PartialEq, Eq)]
pub enum TrackSource {
    /// A remote stream URL (or any locator the decoder reads directly).
    Remote(String),
    /// A local file owned by the track; deleted on release.
    LocalFile(PathBuf),
}

impl TrackSource {
    /// Returns the locator handed to the decoder.
    pub fn locator(&self) -> String {
        match self {
            Self::Remote(url) => url.clone(),
            Self::LocalFile(path) => path.display().to_string(),
        }
    }
}

/// A playable item in a session queue.
#[derive(Debug)]
pub struct Track {
    pub title: String,
    pub source: TrackSource,
    /// Length in whole seconds, when the resolver knows it.
    pub duration: Option<u64>,
}

impl Track {
    pub fn remote(title: impl Into<String>, url: impl Into<String>, duration: Option<u64>) -> Self {
        Self {
            title: title.into(),
            source: TrackSource::Remote(url.into()),
            duration,
        }
    }

    pub fn local(title: impl Into<String>, path: PathBuf, duration: Option<u64>) -> Self {
        Self {
            title: title.into(),
            source: TrackSource::LocalFile(path),
            duration,
        }
    }

    /// Returns a cloneable view of the track.
    pub fn summary(&self) -> TrackSummary {
        let locator = self.source.locator();
        TrackSummary {
            title: self.title.clone(),
            remote: is_http_source(&locator),
            locator,
            duration: self.duration,
        }
    }
}

/// Read-only, cloneable view of a [`Track`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSummary {
    pub title: String,
    pub locator: String,
    pub duration: Option<u64>,
    /// Whether the locator is an http(s) URL.
    pub remote: bool,
}

/// Releases the resources backing tracks that leave a queue.
pub trait TrackJanitor: Send + Sync {
    /// Consumes the track and frees anything it owns. Failures are logged, never returned.
    fn release(&self, track: Track);
}

/// Janitor that deletes staged local files.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsJanitor;

impl TrackJanitor for FsJanitor {
    fn release(&self, track: Track) {
        if let TrackSource::LocalFile(path) = track.source {
            match std::fs::remove_file(&path) {
                Ok(()) => log::debug!("[Janitor] Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("[Janitor] Failed to remove {}: {}", path.display(), e),
            }
        }
    }
}
