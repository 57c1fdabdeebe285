//! The per-session player loop.
//!
//! One loop runs per session. It drains the queue into the transport one
//! track at a time, applies the loop policy when a track ends and tears the
//! session down once the queue has stayed empty past the grace window.
//!
//! ```text
//! DrainingWait ──(tracks)──► Preparing ──(started)──► Playing
//!      ▲   │                   │    ▲                    │
//!      │   └─(grace expired)   └────┘ start failed       ▼
//!      │          ▼                                Transitioning
//!      │     Terminated ◄──(transport lost)──┐          │
//!      └─────────────────────────────────────┴──────────┘
//! ```

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::display::DisplaySynchronizer;
use crate::error::TransportError;
use crate::events::{EventEmitter, SessionEvent, TeardownReason};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::session::{Advance, PreparedTrack, Session, SessionHandle, SessionStore};
use crate::state::{DecoderConfig, PlayerConfig};
use crate::transport::{PlaybackCompletion, PlaybackEnd, StartOptions};
use crate::utils::now_millis;

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerPhase {
    DrainingWait,
    Preparing,
    Playing,
    Transitioning,
    Terminated,
}

/// Shared collaborators of every player loop.
#[derive(Clone)]
pub struct PlayerContext {
    pub store: Arc<SessionStore>,
    pub display: DisplaySynchronizer,
    pub emitter: Arc<dyn EventEmitter>,
    pub player: PlayerConfig,
    pub decoder: DecoderConfig,
    pub spawner: TokioSpawner,
}

impl PlayerContext {
    /// Starts a player loop for the session unless one is already running.
    ///
    /// Returns true if a loop was started.
    pub fn ensure_player(&self, session: &Arc<SessionHandle>) -> bool {
        if session.is_destroyed() || !session.with(Session::claim_player) {
            session.wake_player();
            return false;
        }

        let player = PlayerLoop::new(self.clone(), Arc::clone(session));
        let task = self
            .spawner
            .spawn_cancellable("player", move |token| player.run(token));
        session.set_player_task(task);
        log::debug!("[Player] Started loop for guild {}", session.guild());
        true
    }
}

/// State machine driving one session's playback.
pub struct PlayerLoop {
    ctx: PlayerContext,
    session: Arc<SessionHandle>,
    phase: PlayerPhase,
}

enum Started {
    Playing(PlaybackCompletion),
    Skipped,
}

impl PlayerLoop {
    pub fn new(ctx: PlayerContext, session: Arc<SessionHandle>) -> Self {
        Self {
            ctx,
            session,
            phase: PlayerPhase::DrainingWait,
        }
    }

    pub fn phase(&self) -> PlayerPhase {
        self.phase
    }

    fn enter(&mut self, phase: PlayerPhase) {
        if self.phase != phase {
            log::trace!(
                "[Player] Guild {} {:?} -> {:?}",
                self.session.guild(),
                self.phase,
                phase
            );
            self.phase = phase;
        }
    }

    /// Runs until the session is torn down or the token is cancelled.
    pub async fn run(mut self, token: CancellationToken) {
        let guild = self.session.guild();
        while self.phase != PlayerPhase::Terminated {
            if token.is_cancelled() || self.session.is_destroyed() {
                self.enter(PlayerPhase::Terminated);
                break;
            }

            if self.session.read(Session::is_empty) {
                self.enter(PlayerPhase::DrainingWait);
                if !self.wait_for_tracks(&token).await {
                    continue;
                }
            }

            if !self.session.transport().is_connected() {
                log::info!("[Player] Guild {} transport gone, stopping", guild);
                self.terminate(TeardownReason::TransportLost).await;
                continue;
            }

            self.enter(PlayerPhase::Preparing);
            let Some(prepared) = self.session.with(Session::prepare_next) else {
                continue;
            };
            let completion = match self.start(&prepared).await {
                Started::Playing(completion) => completion,
                Started::Skipped => continue,
            };

            self.enter(PlayerPhase::Playing);
            let end = tokio::select! {
                _ = token.cancelled() => {
                    self.enter(PlayerPhase::Terminated);
                    break;
                }
                end = completion => end,
            };

            self.enter(PlayerPhase::Transitioning);
            self.ctx.display.stop_progress(&self.session);
            self.finish(&prepared, end).await;
        }
        log::debug!("[Player] Loop for guild {} exited", guild);
    }

    /// Waits out the grace window. Returns true once the queue has tracks.
    ///
    /// Tears the session down if the window expires with the queue still empty.
    async fn wait_for_tracks(&mut self, token: &CancellationToken) -> bool {
        let deadline = Instant::now() + self.ctx.player.empty_queue_grace();
        loop {
            if !self.session.read(Session::is_empty) {
                return true;
            }
            tokio::select! {
                _ = token.cancelled() => {
                    self.enter(PlayerPhase::Terminated);
                    return false;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    if !self.session.read(Session::is_empty) {
                        return true;
                    }
                    log::info!(
                        "[Player] Guild {} queue empty for {}s, leaving",
                        self.session.guild(),
                        self.ctx.player.empty_queue_grace_secs
                    );
                    self.terminate(TeardownReason::QueueExhausted).await;
                    return false;
                }
                _ = self.session.player_woken() => {}
            }
        }
    }

    async fn terminate(&mut self, reason: TeardownReason) {
        self.enter(PlayerPhase::Terminated);
        self.ctx.store.destroy_from_player(&self.session, reason).await;
    }

    async fn start(&self, prepared: &PreparedTrack) -> Started {
        let session = &self.session;
        let title = &prepared.track.title;
        let options = StartOptions::for_track(&prepared.track, prepared.seek, &self.ctx.decoder);

        let completion = match session.transport().play(&prepared.track, &options) {
            Ok(completion) => completion,
            Err(e) => {
                log::error!("[Player] Guild {} failed to start '{}': {}", session.guild(), title, e);
                let notice = match e {
                    TransportError::DecoderMissing(_) => {
                        "⚠️ **ffmpeg not found**: install it on the host and try again".to_string()
                    }
                    other => format!("⚠️ Failed to play `{title}` ({other})"),
                };
                self.notify(&notice).await;
                let dropped = session.with(Session::drop_current);
                session.release(dropped);
                return Started::Skipped;
            }
        };

        let offset = prepared.seek.unwrap_or(0);
        session.with(|s| s.begin_playback(Instant::now(), offset));
        log::info!(
            "[Player] Guild {} playing '{}' from {}s",
            session.guild(),
            title,
            offset
        );
        self.ctx.emitter.emit_session(SessionEvent::TrackStarted {
            guild_id: session.guild(),
            title: title.clone(),
            start_offset: offset,
            timestamp: now_millis(),
        });

        if prepared.announce {
            if let Err(e) = session
                .sink()
                .notify(&format!("▶️ **Now playing**: {title}"), None)
                .await
            {
                log::debug!("[Player] Guild {} announce failed: {}", session.guild(), e);
            }
        }
        self.ctx.display.refresh(session).await;
        self.ctx.display.start_progress(session);
        Started::Playing(completion)
    }

    async fn finish(&self, prepared: &PreparedTrack, end: PlaybackEnd) {
        let session = &self.session;
        match &end {
            PlaybackEnd::Failed(reason) => log::warn!(
                "[Player] Guild {} playback of '{}' failed: {}",
                session.guild(),
                prepared.track.title,
                reason
            ),
            other => log::debug!(
                "[Player] Guild {} '{}' ended: {:?}",
                session.guild(),
                prepared.track.title,
                other
            ),
        }

        let (advance, loop_mode) = session.with(|s| (s.finish_track(), s.loop_mode));
        match advance {
            Advance::Restart => {}
            Advance::Next { released } => {
                session.release(released);
                self.ctx.emitter.emit_session(SessionEvent::TrackFinished {
                    guild_id: session.guild(),
                    title: prepared.track.title.clone(),
                    loop_mode,
                    timestamp: now_millis(),
                });
            }
        }
        self.ctx.display.refresh(session).await;
    }

    async fn notify(&self, text: &str) {
        let ttl = Some(self.ctx.player.notice_ttl());
        if let Err(e) = self.session.sink().notify(text, ttl).await {
            log::debug!("[Player] Guild {} notice failed: {}", self.session.guild(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::testing::RecordingSink;
    use crate::events::NoopEventEmitter;
    use crate::track::{Track, TrackJanitor};
    use crate::transport::testing::MockTransport;
    use crate::transport::TransportHandle;
    use crate::types::{ChannelId, GuildId};
    use parking_lot::Mutex;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingJanitor {
        released: Mutex<Vec<String>>,
    }

    impl TrackJanitor for RecordingJanitor {
        fn release(&self, track: Track) {
            self.released.lock().push(track.title);
        }
    }

    struct Fixture {
        ctx: PlayerContext,
        session: Arc<SessionHandle>,
        transport: Arc<MockTransport>,
        sink: Arc<RecordingSink>,
        janitor: Arc<RecordingJanitor>,
    }

    fn fixture(titles: &[&str]) -> Fixture {
        let store = Arc::new(SessionStore::new(Arc::new(NoopEventEmitter)));
        let transport = MockTransport::new(ChannelId(1));
        let sink = Arc::new(RecordingSink::default());
        let janitor = Arc::new(RecordingJanitor::default());
        let (session, _) = store.get_or_create(GuildId(1), {
            let (transport, sink, janitor) = (transport.clone(), sink.clone(), janitor.clone());
            move || SessionHandle::new(GuildId(1), transport, sink, janitor)
        });
        session.with(|s| {
            s.push_tracks(
                titles
                    .iter()
                    .map(|t| Track::remote(*t, format!("https://x/{t}"), Some(100))),
            )
        });
        let spawner = TokioSpawner::current();
        let ctx = PlayerContext {
            store,
            display: DisplaySynchronizer::new(Duration::from_secs(1), spawner.clone()),
            emitter: Arc::new(NoopEventEmitter),
            player: PlayerConfig::default(),
            decoder: DecoderConfig::default(),
            spawner,
        };
        Fixture {
            ctx,
            session,
            transport,
            sink,
            janitor,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn released(f: &Fixture) -> Vec<String> {
        f.janitor.released.lock().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn drains_queue_then_leaves_after_grace() {
        let f = fixture(&["a", "b"]);
        assert!(f.ctx.ensure_player(&f.session));
        settle().await;
        assert_eq!(f.transport.played_titles(), vec!["a"]);
        assert!(f.sink.has_notice("▶️ **Now playing**: a"));

        assert!(f.transport.finish());
        settle().await;
        assert_eq!(f.transport.played_titles(), vec!["a", "b"]);
        assert_eq!(released(&f), vec!["a"]);

        assert!(f.transport.finish());
        settle().await;
        assert!(!f.session.is_destroyed());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(f.session.is_destroyed());
        assert_eq!(f.transport.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(released(&f), vec!["a", "b"]);
        assert!(f.ctx.store.get(GuildId(1)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn tracks_added_during_grace_resume_playback() {
        let f = fixture(&[]);
        f.ctx.ensure_player(&f.session);
        tokio::time::sleep(Duration::from_secs(2)).await;

        f.session
            .with(|s| s.push_tracks([Track::remote("late", "https://x/late", None)]));
        assert!(!f.ctx.ensure_player(&f.session));
        settle().await;

        assert_eq!(f.transport.played_titles(), vec!["late"]);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!f.session.is_destroyed());
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_loop_per_session() {
        let f = fixture(&["a"]);
        assert!(f.ctx.ensure_player(&f.session));
        assert!(!f.ctx.ensure_player(&f.session));
        settle().await;
        assert_eq!(f.transport.played_titles(), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn start_failure_drops_track_and_continues() {
        let f = fixture(&["bad", "good"]);
        f.transport
            .fail_next
            .lock()
            .push_back(TransportError::Playback("boom".into()));

        f.ctx.ensure_player(&f.session);
        settle().await;

        assert_eq!(f.transport.played_titles(), vec!["good"]);
        assert_eq!(released(&f), vec!["bad"]);
        assert!(f.sink.has_notice("Failed to play `bad`"));
    }

    #[tokio::test(start_paused = true)]
    async fn seek_restarts_current_without_announcing() {
        let f = fixture(&["a", "b"]);
        f.ctx.ensure_player(&f.session);
        settle().await;

        f.session.with(|s| s.request_seek(30)).unwrap();
        f.transport.stop();
        settle().await;

        let plays = f.transport.plays.lock().clone();
        assert_eq!(plays.len(), 2);
        assert_eq!(plays[1].0, "a");
        assert_eq!(plays[1].1.start_offset, Some(30));
        assert!(plays[1].1.before_options.starts_with("-ss 30"));
        assert_eq!(
            f.sink
                .notices()
                .iter()
                .filter(|n| n.contains("Now playing"))
                .count(),
            1
        );
        assert!(released(&f).is_empty());
        assert_eq!(f.session.read(|s| s.position(Instant::now())), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_transport_terminates_loop() {
        let f = fixture(&["a", "b"]);
        f.ctx.ensure_player(&f.session);
        settle().await;

        f.transport.connected.store(false, Ordering::SeqCst);
        f.transport.finish();
        settle().await;

        assert!(f.session.is_destroyed());
        assert_eq!(released(&f), vec!["a", "b"]);
        assert_eq!(f.transport.played_titles(), vec!["a"]);
    }
}
