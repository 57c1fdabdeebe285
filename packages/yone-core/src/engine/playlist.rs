//! Lazy playlist expansion.
//!
//! A playlist is listed once, then its entries are resolved and queued one
//! at a time so playback can start after the first hit. The loader stops as
//! soon as it is cancelled or the session's transport goes away.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::events::{EventEmitter, SessionEvent};
use crate::player::PlayerContext;
use crate::resolver::{canonical_playlist_url, TrackResolver};
use crate::session::SessionHandle;
use crate::track::Track;
use crate::utils::now_millis;

/// Why a load stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadAbort {
    Cancelled,
    Disconnected,
    SessionGone,
}

/// Resolves playlist entries into a session's queue.
pub struct PlaylistLoader {
    resolver: Arc<dyn TrackResolver>,
    session: Arc<SessionHandle>,
    player: PlayerContext,
    emitter: Arc<dyn EventEmitter>,
}

impl PlaylistLoader {
    pub fn new(
        resolver: Arc<dyn TrackResolver>,
        session: Arc<SessionHandle>,
        player: PlayerContext,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            resolver,
            session,
            player,
            emitter,
        }
    }

    /// Loads each playlist in turn. Returns the number of tracks queued.
    pub async fn run(self, playlists: Vec<String>, token: CancellationToken) -> usize {
        let mut queued = 0;
        for url in playlists {
            match self.load(&url, &token).await {
                Ok(count) => queued += count,
                Err(abort) => {
                    log::info!(
                        "[Playlist] Guild {} stopped loading {}: {:?}",
                        self.session.guild(),
                        url,
                        abort
                    );
                    break;
                }
            }
        }
        queued
    }

    async fn load(&self, url: &str, token: &CancellationToken) -> Result<usize, LoadAbort> {
        let guild = self.session.guild();
        let playlist = canonical_playlist_url(url);
        let ttl = Some(self.player.player.notice_ttl());

        let entries = match self.resolver.playlist_entries(&playlist).await {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("[Playlist] Guild {} could not list {}: {}", guild, playlist, e);
                self.notify("⚠️ Could not load the playlist", ttl).await;
                return Ok(0);
            }
        };
        if entries.is_empty() {
            self.notify("⚠️ No tracks found in playlist", ttl).await;
            return Ok(0);
        }

        let total = entries.len();
        log::info!("[Playlist] Guild {} loading {} entries from {}", guild, total, playlist);
        self.notify(&format!("⏱️ Loading playlist... ({total} tracks)"), None)
            .await;

        let mut queued = 0;
        for entry in entries {
            self.check(token)?;
            let mut tracks = match self.resolver.resolve(&entry).await {
                Ok(tracks) => tracks.into_iter(),
                Err(e) => {
                    log::warn!("[Playlist] Guild {} skipping {}: {}", guild, entry, e);
                    continue;
                }
            };
            let Some(track) = tracks.next() else {
                continue;
            };
            self.session.release(tracks);

            if let Err(abort) = self.check(token) {
                self.session.release([track]);
                return Err(abort);
            }
            self.enqueue(track).await?;
            queued += 1;
        }

        self.notify(&format!("✅ Playlist loaded ({total} tracks)"), ttl)
            .await;
        Ok(queued)
    }

    fn check(&self, token: &CancellationToken) -> Result<(), LoadAbort> {
        if token.is_cancelled() {
            Err(LoadAbort::Cancelled)
        } else if self.session.is_destroyed() {
            Err(LoadAbort::SessionGone)
        } else if !self.session.transport().is_connected() {
            Err(LoadAbort::Disconnected)
        } else {
            Ok(())
        }
    }

    async fn enqueue(&self, track: Track) -> Result<(), LoadAbort> {
        let length = match self.session.enqueue(vec![track]) {
            Ok(length) => length,
            Err(leftover) => {
                self.session.release(leftover);
                return Err(LoadAbort::SessionGone);
            }
        };
        self.emitter.emit_session(SessionEvent::QueueChanged {
            guild_id: self.session.guild(),
            length,
            timestamp: now_millis(),
        });
        self.player.display.refresh(&self.session).await;
        self.player.ensure_player(&self.session);
        Ok(())
    }

    async fn notify(&self, text: &str, ttl: Option<Duration>) {
        if let Err(e) = self.session.sink().notify(text, ttl).await {
            log::debug!("[Playlist] Guild {} notice failed: {}", self.session.guild(), e);
        }
    }
}
