//! The music engine: the coordinator every front-end talks to.
//!
//! [`MusicEngine`] owns the session store, the transport connector and the
//! resolver, and exposes the command-level operations (add tracks, show the
//! panel, seek, stop ...) plus the single [`dispatch`](MusicEngine::dispatch)
//! entry point for panel buttons.

mod playlist;

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;

pub use playlist::{LoadAbort, PlaylistLoader};

use crate::control::{parse_seek_time, ControlAction, ControlOrigin, ControlOutcome, ControlSurface};
use crate::display::{ArtifactHandle, ChannelSink, DisplaySynchronizer};
use crate::error::{ControlError, ControlResult, TransportError, YoneError, YoneResult};
use crate::events::{EventEmitter, SessionEvent, TeardownReason};
use crate::player::PlayerContext;
use crate::resolver::{is_playlist_url, parse_urls_and_text, Attachment, TrackResolver};
use crate::runtime::{BackgroundTask, TaskSpawner, TokioSpawner};
use crate::session::{SessionHandle, SessionSnapshot, SessionStore};
use crate::state::Config;
use crate::track::{Track, TrackJanitor};
use crate::transport::{TransportConnector, TransportHandle, TransportLost, VoiceGateway};
use crate::types::{ChannelId, GuildId, UserId};
use crate::utils::now_millis;

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

/// Which half of a play request is resolved and queued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderPolicy {
    /// References, then attachments.
    QueryFirst,
    /// Attachments, then references.
    #[default]
    AttachmentsFirst,
}

/// A play request from the command layer.
pub struct AddRequest {
    pub guild: GuildId,
    /// The requester's voice channel, if they are in one.
    pub voice_channel: Option<ChannelId>,
    pub requester: UserId,
    /// URLs and/or search terms.
    pub references: Vec<String>,
    pub attachments: Vec<Attachment>,
    pub order: OrderPolicy,
    /// Text channel the session reports to.
    pub sink: Arc<dyn ChannelSink>,
}

/// Result of an accepted play request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOutcome {
    /// Tracks queued immediately.
    pub queued: usize,
    /// Playlists handed to the lazy loader.
    pub playlists: usize,
    /// References or attachments that failed to resolve.
    pub failed: usize,
    pub session_created: bool,
}

/// Voice occupancy change reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub guild: GuildId,
    pub channel: ChannelId,
    /// Non-bot members left in the channel.
    pub humans: usize,
}

/// External collaborators the engine is built from.
pub struct EngineDeps {
    pub gateway: Arc<dyn VoiceGateway>,
    pub resolver: Arc<dyn TrackResolver>,
    pub janitor: Arc<dyn TrackJanitor>,
    pub emitter: Arc<dyn EventEmitter>,
    pub spawner: TokioSpawner,
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

pub struct MusicEngine {
    config: Config,
    store: Arc<SessionStore>,
    connector: TransportConnector,
    resolver: Arc<dyn TrackResolver>,
    janitor: Arc<dyn TrackJanitor>,
    emitter: Arc<dyn EventEmitter>,
    control: ControlSurface,
    player: PlayerContext,
    spawner: TokioSpawner,
    listener: Mutex<Option<BackgroundTask>>,
}

impl MusicEngine {
    /// Builds the engine and starts listening for lost transports.
    pub fn new(config: Config, deps: EngineDeps) -> Arc<Self> {
        let store = Arc::new(SessionStore::new(deps.emitter.clone()));
        let (connector, lost_rx) = TransportConnector::new(
            deps.gateway,
            config.transport.clone(),
            deps.emitter.clone(),
            deps.spawner.clone(),
        );
        let display = DisplaySynchronizer::new(config.player.progress_interval(), deps.spawner.clone());
        let control = ControlSurface::new(
            display.clone(),
            deps.emitter.clone(),
            config.player.default_step_secs,
        );
        let player = PlayerContext {
            store: store.clone(),
            display,
            emitter: deps.emitter.clone(),
            player: config.player.clone(),
            decoder: config.decoder.clone(),
            spawner: deps.spawner.clone(),
        };

        let engine = Arc::new(Self {
            config,
            store,
            connector,
            resolver: deps.resolver,
            janitor: deps.janitor,
            emitter: deps.emitter,
            control,
            player,
            spawner: deps.spawner,
            listener: Mutex::new(None),
        });
        engine.spawn_lost_listener(lost_rx);
        engine
    }

    fn spawn_lost_listener(self: &Arc<Self>, mut lost_rx: mpsc::UnboundedReceiver<TransportLost>) {
        let engine: Weak<Self> = Arc::downgrade(self);
        let task = self.spawner.spawn_cancellable("transport-lost", move |token| async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    lost = lost_rx.recv() => {
                        let Some(lost) = lost else { break };
                        let Some(engine) = engine.upgrade() else { break };
                        engine.handle_transport_lost(lost).await;
                    }
                }
            }
        });
        *self.listener.lock() = Some(task);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn connector(&self) -> &TransportConnector {
        &self.connector
    }

    fn session(&self, guild: GuildId) -> ControlResult<Arc<SessionHandle>> {
        self.store.get(guild).ok_or(ControlError::NoSession)
    }

    // ── Play requests ───────────────────────────────────────────────────────

    /// Resolves a play request and queues the result, joining voice if needed.
    ///
    /// Individual references and attachments that fail to resolve are
    /// reported to the sink and skipped; they never fail the whole request.
    pub async fn add_tracks(&self, request: AddRequest) -> YoneResult<AddOutcome> {
        let AddRequest {
            guild,
            voice_channel,
            requester,
            references,
            attachments,
            order,
            sink,
        } = request;
        let ttl = Some(self.config.player.notice_ttl());

        let references: Vec<String> = references
            .into_iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        if references.is_empty() && attachments.is_empty() {
            notify(&sink, "Give me a URL, a search term or an attachment!", ttl).await;
            return Err(YoneError::InvalidRequest("nothing to add".into()));
        }
        let Some(channel) = voice_channel else {
            notify(&sink, "🎤 Join a voice channel first!", ttl).await;
            return Err(YoneError::NotInVoice);
        };

        let transport = self.join(guild, channel, &sink).await?;
        if let Some(stale) = self.store.get(guild) {
            if !same_transport(stale.transport(), &transport) || !stale.transport().is_connected() {
                log::info!("[Engine] Guild {} session outlived its transport, replacing", guild);
                self.store.destroy(&stale, TeardownReason::TransportLost).await;
            }
        }
        let (session, mut session_created) = self.session_for(guild, transport, sink);

        // A new request supersedes any playlist still loading.
        session.replace_playlist_task(None);

        log::info!(
            "[Engine] Guild {} request by {}: {} reference(s), {} attachment(s)",
            guild,
            requester,
            references.len(),
            attachments.len()
        );

        let mut failed = 0;
        let mut playlists = Vec::new();
        let (first, second) = match order {
            OrderPolicy::QueryFirst => {
                let queried = self.resolve_references(&session, &references, &mut playlists, &mut failed).await;
                let attached = self.resolve_attachments(&session, &attachments, &mut failed).await;
                (queried, attached)
            }
            OrderPolicy::AttachmentsFirst => {
                let attached = self.resolve_attachments(&session, &attachments, &mut failed).await;
                let queried = self.resolve_references(&session, &references, &mut playlists, &mut failed).await;
                (attached, queried)
            }
        };
        let mut tracks = first;
        tracks.extend(second);

        let queued = tracks.len();
        let mut session = session;
        if queued > 0 {
            let (live, revived) = self.enqueue(guild, channel, session, tracks).await?;
            session = live;
            session_created |= revived;
            self.player.display.refresh(&session).await;
            notify(
                session.sink(),
                &format!("⏱️ **{queued} tracks** added to the queue!"),
                None,
            )
            .await;
        }

        let playlist_count = playlists.len();
        if !playlists.is_empty() {
            if session.is_destroyed() {
                session = self.revive(guild, channel, &session).await?;
                session_created = true;
            }
            self.start_playlist_load(&session, playlists);
        }
        if !session.read(|s| s.is_empty()) {
            self.player.ensure_player(&session);
        }

        Ok(AddOutcome {
            queued,
            playlists: playlist_count,
            failed,
            session_created,
        })
    }

    /// Returns the live session for the guild, replacing one whose transport died.
    fn session_for(
        &self,
        guild: GuildId,
        transport: Arc<dyn TransportHandle>,
        sink: Arc<dyn ChannelSink>,
    ) -> (Arc<SessionHandle>, bool) {
        let janitor = self.janitor.clone();
        self.store.get_or_create(guild, move || {
            SessionHandle::new(guild, transport, sink, janitor)
        })
    }

    /// Joins `channel`, posting a notice unless the guild is cooling down.
    async fn join(
        &self,
        guild: GuildId,
        channel: ChannelId,
        sink: &Arc<dyn ChannelSink>,
    ) -> YoneResult<Arc<dyn TransportHandle>> {
        match self.connector.connect(guild, channel).await {
            Ok(transport) => Ok(transport),
            Err(e) => {
                if !matches!(e, TransportError::CoolingDown { .. }) {
                    let ttl = Some(self.config.player.notice_ttl());
                    notify(sink, "⚠️ Failed to join the voice channel. Try again!", ttl).await;
                }
                Err(e.into())
            }
        }
    }

    /// Rejoins voice and opens a fresh session after `stale` was torn down.
    async fn revive(
        &self,
        guild: GuildId,
        channel: ChannelId,
        stale: &SessionHandle,
    ) -> YoneResult<Arc<SessionHandle>> {
        log::info!("[Engine] Guild {} session ended during resolution, rejoining", guild);
        let transport = self.join(guild, channel, stale.sink()).await?;
        let (fresh, _) = self.session_for(guild, transport, stale.sink().clone());
        Ok(fresh)
    }

    /// Queues tracks on `session`, or on a revived one if it was torn down meanwhile.
    ///
    /// Returns the session now holding the tracks and whether it had to be revived.
    async fn enqueue(
        &self,
        guild: GuildId,
        channel: ChannelId,
        session: Arc<SessionHandle>,
        tracks: Vec<Track>,
    ) -> YoneResult<(Arc<SessionHandle>, bool)> {
        let tracks = match session.enqueue(tracks) {
            Ok(length) => {
                self.queue_changed(guild, length);
                return Ok((session, false));
            }
            Err(tracks) => tracks,
        };

        let fresh = match self.revive(guild, channel, &session).await {
            Ok(fresh) => fresh,
            Err(e) => {
                session.release(tracks);
                return Err(e);
            }
        };
        match fresh.enqueue(tracks) {
            Ok(length) => {
                self.queue_changed(guild, length);
                Ok((fresh, true))
            }
            Err(tracks) => {
                fresh.release(tracks);
                Err(YoneError::Internal("the session ended while queueing".into()))
            }
        }
    }

    fn queue_changed(&self, guild: GuildId, length: usize) {
        self.emitter.emit_session(SessionEvent::QueueChanged {
            guild_id: guild,
            length,
            timestamp: now_millis(),
        });
    }

    async fn resolve_references(
        &self,
        session: &SessionHandle,
        references: &[String],
        playlists: &mut Vec<String>,
        failed: &mut usize,
    ) -> Vec<Track> {
        let ttl = Some(self.config.player.notice_ttl());
        let mut tracks = Vec::new();
        for reference in references {
            let (urls, text) = parse_urls_and_text(reference);
            let mut lookups = Vec::new();
            for url in urls {
                if is_playlist_url(&url) {
                    playlists.push(url);
                } else {
                    lookups.push(url);
                }
            }
            if !text.is_empty() {
                lookups.push(text);
            }

            for lookup in lookups {
                match self.resolver.resolve(&lookup).await {
                    Ok(found) => tracks.extend(found),
                    Err(e) => {
                        *failed += 1;
                        log::warn!("[Resolver] Guild {} '{}' failed: {}", session.guild(), lookup, e);
                        notify(session.sink(), &format!("⚠️ Could not get a track from `{lookup}`"), ttl).await;
                    }
                }
            }
        }
        tracks
    }

    async fn resolve_attachments(
        &self,
        session: &SessionHandle,
        attachments: &[Attachment],
        failed: &mut usize,
    ) -> Vec<Track> {
        let ttl = Some(self.config.player.notice_ttl());
        let mut tracks = Vec::new();
        for attachment in attachments {
            match self.resolver.resolve_attachment(attachment).await {
                Ok(track) => tracks.push(track),
                Err(e) => {
                    *failed += 1;
                    log::warn!(
                        "[Resolver] Guild {} attachment '{}' failed: {}",
                        session.guild(),
                        attachment.filename,
                        e
                    );
                    notify(session.sink(), &format!("⚠️ Attachment error: {e}"), ttl).await;
                }
            }
        }
        tracks
    }

    fn start_playlist_load(&self, session: &Arc<SessionHandle>, playlists: Vec<String>) {
        let loader = PlaylistLoader::new(
            self.resolver.clone(),
            session.clone(),
            self.player.clone(),
            self.emitter.clone(),
        );
        let task = self.spawner.spawn_cancellable("playlist", move |token| async move {
            loader.run(playlists, token).await;
        });
        session.replace_playlist_task(Some(task));
    }

    // ── Panel and commands ──────────────────────────────────────────────────

    /// Posts a fresh queue panel owned by `owner`.
    pub async fn show_queue_panel(&self, guild: GuildId, owner: UserId) -> YoneResult<ArtifactHandle> {
        let session = self.session(guild)?;
        self.player
            .display
            .show_panel(&session, owner)
            .await
            .ok_or_else(|| YoneError::Internal("the panel could not be posted".into()))
    }

    /// Single entry point for control actions, authorization included.
    pub async fn dispatch(
        &self,
        guild: GuildId,
        origin: ControlOrigin,
        action: ControlAction,
    ) -> ControlResult<ControlOutcome> {
        let session = self.session(guild)?;
        self.control.apply(&session, origin, action).await
    }

    /// Runs a typed command and posts its confirmation.
    async fn command(&self, guild: GuildId, user: UserId, action: ControlAction) -> ControlResult<ControlOutcome> {
        let session = self.session(guild)?;
        let outcome = self
            .control
            .apply(&session, ControlOrigin::Command(user), action)
            .await?;
        notify(session.sink(), &outcome.notice(), None).await;
        Ok(outcome)
    }

    pub async fn remove_tracks(&self, guild: GuildId, user: UserId, indices: Vec<usize>) -> ControlResult<ControlOutcome> {
        self.command(guild, user, ControlAction::Remove(indices)).await
    }

    pub async fn keep_tracks(&self, guild: GuildId, user: UserId, indices: Vec<usize>) -> ControlResult<ControlOutcome> {
        self.command(guild, user, ControlAction::Keep(indices)).await
    }

    /// Seeks to an absolute time spec (`1:30`, `2m`, `90`).
    pub async fn seek(&self, guild: GuildId, user: UserId, spec: &str) -> ControlResult<ControlOutcome> {
        let offset = parse_seek_time(spec)?;
        self.command(guild, user, ControlAction::Seek(offset)).await
    }

    /// Jumps back by a time spec, or the default step when `spec` is empty.
    pub async fn rewind(&self, guild: GuildId, user: UserId, spec: Option<&str>) -> ControlResult<ControlOutcome> {
        let step = parse_step(spec)?;
        self.command(guild, user, ControlAction::Rewind(step)).await
    }

    /// Jumps ahead by a time spec, or the default step when `spec` is empty.
    pub async fn forward(&self, guild: GuildId, user: UserId, spec: Option<&str>) -> ControlResult<ControlOutcome> {
        let step = parse_step(spec)?;
        self.command(guild, user, ControlAction::Forward(step)).await
    }

    /// Tears the guild's session down and leaves voice.
    ///
    /// Returns false if there was no session (the transport is still disconnected).
    pub async fn stop(&self, guild: GuildId) -> bool {
        match self.store.get(guild) {
            Some(session) => self.store.destroy(&session, TeardownReason::Stopped).await,
            None => {
                self.connector.disconnect(guild).await;
                false
            }
        }
    }

    // ── Platform events ─────────────────────────────────────────────────────

    /// Leaves when the last human leaves the session's channel and auto-leave is on.
    ///
    /// Returns true if the session was torn down.
    pub async fn handle_presence(&self, update: PresenceUpdate) -> bool {
        let Some(session) = self.store.get(update.guild) else {
            return false;
        };
        if update.humans > 0
            || !session.read(|s| s.auto_leave)
            || session.transport().channel() != Some(update.channel)
        {
            return false;
        }
        log::info!(
            "[Engine] Guild {} channel {} is empty, leaving",
            update.guild,
            update.channel
        );
        self.store.destroy(&session, TeardownReason::AutoLeave).await
    }

    /// Destroys the session whose transport was lost for good.
    pub async fn handle_transport_lost(&self, lost: TransportLost) {
        let Some(session) = self.store.get(lost.guild) else {
            return;
        };
        if session.transport().is_connected() {
            // A newer connection already replaced the lost one.
            return;
        }
        log::warn!(
            "[Engine] Guild {} transport lost (code {:?}), tearing down",
            lost.guild,
            lost.code
        );
        self.store.destroy(&session, TeardownReason::TransportLost).await;
    }

    // ── Observation ─────────────────────────────────────────────────────────

    pub fn snapshot(&self, guild: GuildId) -> Option<SessionSnapshot> {
        self.store.get(guild).map(|session| session.snapshot())
    }

    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut snapshots: Vec<_> = self
            .store
            .all()
            .into_iter()
            .filter(|session| !session.is_destroyed())
            .map(|session| session.snapshot())
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.guild_id);
        snapshots
    }

    /// Destroys every session and disconnects every transport.
    pub async fn shutdown(&self) {
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            listener.cancel();
        }
        self.store.destroy_all(TeardownReason::Stopped).await;
        self.connector.disconnect_all().await;
        log::info!("[Engine] Shut down");
    }
}

fn same_transport(a: &Arc<dyn TransportHandle>, b: &Arc<dyn TransportHandle>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

fn parse_step(spec: Option<&str>) -> ControlResult<Option<u64>> {
    spec.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_seek_time)
        .transpose()
}

async fn notify(sink: &Arc<dyn ChannelSink>, text: &str, ttl: Option<std::time::Duration>) {
    if let Err(e) = sink.notify(text, ttl).await {
        log::debug!("[Engine] Notice failed: {}", e);
    }
}

#[cfg(test)]
mod tests;
