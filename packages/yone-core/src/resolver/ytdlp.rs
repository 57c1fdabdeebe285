//! `yt-dlp` backed resolver.
//!
//! Every lookup runs `yt-dlp -J` as a child process and parses the JSON dump.
//! Playlist listing adds `--flat-playlist` so only entry URLs are fetched;
//! the lazy loader resolves each entry separately.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{Attachment, AttachmentSource, TrackResolver};
use crate::error::{ResolveError, ResolveResult};
use crate::state::ResolverConfig;
use crate::track::Track;
use crate::utils::is_http_source;

/// Subset of the `yt-dlp -J` document the resolver reads.
#[derive(Debug, Deserialize)]
struct InfoDict {
    #[serde(rename = "_type")]
    kind: Option<String>,
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    duration: Option<f64>,
    #[serde(default)]
    entries: Vec<Option<InfoDict>>,
}

impl InfoDict {
    fn is_playlist(&self) -> bool {
        self.kind.as_deref() == Some("playlist")
    }

    fn into_track(self) -> Option<Track> {
        let url = self.url.filter(|u| !u.is_empty())?;
        let title = self.title.unwrap_or_else(|| "?".to_string());
        let duration = self.duration.filter(|d| *d >= 0.0).map(|d| d.round() as u64);
        Some(Track::remote(title, url, duration))
    }
}

/// Resolver that delegates to the `yt-dlp` executable.
pub struct YtDlpResolver {
    config: ResolverConfig,
    http: reqwest::Client,
}

impl YtDlpResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    /// Uses a shared HTTP client for attachment downloads.
    pub fn with_client(config: ResolverConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    /// Turns free text into a search expression; URLs pass through.
    fn query_for(&self, reference: &str) -> String {
        if is_http_source(reference) {
            reference.to_string()
        } else {
            format!("{}1:{}", self.config.default_search, reference)
        }
    }

    async fn dump_json(&self, target: &str, flat: bool) -> ResolveResult<InfoDict> {
        let mut cmd = Command::new(&self.config.ytdlp_path);
        cmd.arg("-J")
            .arg("--no-warnings")
            .arg("-f")
            .arg(&self.config.format);
        if flat {
            cmd.arg("--flat-playlist");
        }
        cmd.arg("--")
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        log::debug!("[Resolver] yt-dlp -J {}{}", if flat { "--flat-playlist " } else { "" }, target);

        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ResolveError::Unavailable(self.config.ytdlp_path.clone())
            } else {
                ResolveError::Io(e)
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ResolveError::Process {
                status: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| ResolveError::Parse(e.to_string()))
    }

    /// Creates the staging file for an attachment, keeping its extension.
    fn staging_file(&self, filename: &str) -> ResolveResult<tempfile::NamedTempFile> {
        let suffix = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();
        Ok(tempfile::Builder::new()
            .prefix(&self.config.temp_prefix)
            .suffix(&suffix)
            .tempfile()?)
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve(&self, reference: &str) -> ResolveResult<Vec<Track>> {
        let info = self.dump_json(&self.query_for(reference), false).await?;

        let tracks: Vec<Track> = if info.is_playlist() && !info.entries.is_empty() {
            info.entries
                .into_iter()
                .flatten()
                .filter_map(InfoDict::into_track)
                .collect()
        } else if !info.entries.is_empty() {
            // Search results: only the first hit counts.
            info.entries
                .into_iter()
                .flatten()
                .next()
                .and_then(InfoDict::into_track)
                .into_iter()
                .collect()
        } else {
            info.into_track().into_iter().collect()
        };

        if tracks.is_empty() {
            return Err(ResolveError::NotFound(reference.to_string()));
        }
        log::info!("[Resolver] {} -> {} track(s)", reference, tracks.len());
        Ok(tracks)
    }

    async fn playlist_entries(&self, playlist_url: &str) -> ResolveResult<Vec<String>> {
        let info = self.dump_json(playlist_url, true).await?;
        let urls: Vec<String> = info
            .entries
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.url.or(entry.webpage_url))
            .filter(|url| !url.is_empty())
            .collect();
        log::info!("[Resolver] Playlist {} has {} entries", playlist_url, urls.len());
        Ok(urls)
    }

    async fn resolve_attachment(&self, attachment: &Attachment) -> ResolveResult<Track> {
        let staged = self.staging_file(&attachment.filename)?;
        // From here the file is ours; the janitor deletes it on release.
        let (_, path) = staged
            .keep()
            .map_err(|e| ResolveError::Io(e.error))?;

        let staged_result = match &attachment.source {
            AttachmentSource::Url(url) => self.download_to(url, &path).await,
            AttachmentSource::Path(src) => tokio::fs::copy(src, &path)
                .await
                .map(|_| ())
                .map_err(ResolveError::from),
        };

        if let Err(e) = staged_result {
            if let Err(rm) = tokio::fs::remove_file(&path).await {
                log::warn!("[Resolver] Failed to clean up {}: {}", path.display(), rm);
            }
            return Err(e);
        }

        log::info!(
            "[Resolver] Staged attachment '{}' at {}",
            attachment.filename,
            path.display()
        );
        Ok(Track::local(attachment.filename.clone(), path, None))
    }
}

impl YtDlpResolver {
    async fn download_to(&self, url: &str, path: &Path) -> ResolveResult<()> {
        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ResolveError::Download(e.to_string()))?;

        let mut file = tokio::fs::File::create(path).await?;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ResolveError::Download(e.to_string()))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}
