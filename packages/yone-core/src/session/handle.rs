//! Shared handle around one guild's [`Session`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{LoopMode, Session};
use crate::display::{ArtifactHandle, ChannelSink};
use crate::runtime::BackgroundTask;
use crate::track::{Track, TrackJanitor, TrackSummary};
use crate::transport::TransportHandle;
use crate::types::{GuildId, UserId};

/// Background tasks owned by a session.
#[derive(Default)]
pub struct SessionTasks {
    pub player: Option<BackgroundTask>,
    pub playlist: Option<BackgroundTask>,
    pub progress: Option<BackgroundTask>,
}

impl SessionTasks {
    /// Cancels the loader and refresher; the player task is returned to the caller.
    fn cancel_auxiliary(&mut self) {
        if let Some(task) = self.playlist.take() {
            task.cancel();
        }
        if let Some(task) = self.progress.take() {
            task.cancel();
        }
    }
}

/// Everything a destroyed session still owned.
pub struct Teardown {
    pub tracks: Vec<Track>,
    pub panel: Option<ArtifactHandle>,
    pub player: Option<BackgroundTask>,
}

/// Read-only view served by the status API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub guild_id: GuildId,
    pub session_id: String,
    pub now_playing: Option<TrackSummary>,
    /// Seconds into the current track.
    pub position: u64,
    pub paused: bool,
    pub loop_mode: LoopMode,
    pub auto_leave: bool,
    pub up_next: Vec<TrackSummary>,
    /// Queue length including the now-playing entry.
    pub queue_length: usize,
    pub connected: bool,
    pub playlist_loading: bool,
    pub panel_owner: Option<UserId>,
}

/// A live session plus the collaborators bound to it.
///
/// All state access goes through [`with`](Self::with) or [`read`](Self::read),
/// which hold a `parking_lot` mutex for the duration of a synchronous closure.
/// Nothing awaits while the lock is held.
pub struct SessionHandle {
    guild: GuildId,
    id: String,
    created_at: Instant,
    state: Mutex<Session>,
    transport: Arc<dyn TransportHandle>,
    sink: Arc<dyn ChannelSink>,
    janitor: Arc<dyn TrackJanitor>,
    tasks: Mutex<SessionTasks>,
    wakeup: Notify,
    destroyed: AtomicBool,
}

impl SessionHandle {
    pub fn new(
        guild: GuildId,
        transport: Arc<dyn TransportHandle>,
        sink: Arc<dyn ChannelSink>,
        janitor: Arc<dyn TrackJanitor>,
    ) -> Arc<Self> {
        Arc::new(Self {
            guild,
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Instant::now(),
            state: Mutex::new(Session::new()),
            transport,
            sink,
            janitor,
            tasks: Mutex::new(SessionTasks::default()),
            wakeup: Notify::new(),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn guild(&self) -> GuildId {
        self.guild
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn transport(&self) -> &Arc<dyn TransportHandle> {
        &self.transport
    }

    pub fn sink(&self) -> &Arc<dyn ChannelSink> {
        &self.sink
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Runs `f` inside the session's critical section.
    pub fn with<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn read<R>(&self, f: impl FnOnce(&Session) -> R) -> R {
        f(&self.state.lock())
    }

    /// Hands departing tracks to the janitor. Returns how many were released.
    pub fn release(&self, tracks: impl IntoIterator<Item = Track>) -> usize {
        let mut released = 0;
        for track in tracks {
            self.janitor.release(track);
            released += 1;
        }
        released
    }

    /// Appends tracks and returns the new queue length.
    ///
    /// If the session has been torn down the tracks are handed back instead.
    pub fn enqueue(&self, tracks: Vec<Track>) -> Result<usize, Vec<Track>> {
        let mut state = self.state.lock();
        // Teardown sets the flag before draining under this lock.
        if self.is_destroyed() {
            return Err(tracks);
        }
        state.push_tracks(tracks);
        Ok(state.len())
    }

    /// Wakes a player loop idling on an empty queue.
    pub fn wake_player(&self) {
        self.wakeup.notify_one();
    }

    /// Resolves after the next [`wake_player`](Self::wake_player) call.
    pub async fn player_woken(&self) {
        self.wakeup.notified().await;
    }

    // ── Task slots ──────────────────────────────────────────────────────────

    pub fn set_player_task(&self, task: BackgroundTask) {
        if self.is_destroyed() {
            task.cancel();
            return;
        }
        if let Some(previous) = self.tasks.lock().player.replace(task) {
            previous.detach();
        }
    }

    /// Installs a playlist loader, cancelling the previous one.
    pub fn replace_playlist_task(&self, task: Option<BackgroundTask>) {
        let task = match task {
            Some(task) if self.is_destroyed() => {
                task.cancel();
                None
            }
            other => other,
        };
        let previous = std::mem::replace(&mut self.tasks.lock().playlist, task);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    /// Installs the progress refresher, cancelling the previous one.
    pub fn replace_progress_task(&self, task: Option<BackgroundTask>) {
        let task = match task {
            Some(task) if self.is_destroyed() => {
                task.cancel();
                None
            }
            other => other,
        };
        let previous = std::mem::replace(&mut self.tasks.lock().progress, task);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    pub fn playlist_loading(&self) -> bool {
        self.tasks
            .lock()
            .playlist
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    // ── Observation ─────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> SessionSnapshot {
        let now = Instant::now();
        let playlist_loading = self.playlist_loading();
        let connected = self.transport.is_connected();
        self.read(|s| {
            let mut summaries = s.summaries();
            let now_playing = if s.current().is_some() && !summaries.is_empty() {
                Some(summaries.remove(0))
            } else {
                None
            };
            SessionSnapshot {
                guild_id: self.guild,
                session_id: self.id.clone(),
                now_playing,
                position: s.position(now),
                paused: s.clock().is_paused(),
                loop_mode: s.loop_mode,
                auto_leave: s.auto_leave,
                up_next: summaries,
                queue_length: s.len(),
                connected,
                playlist_loading,
                panel_owner: s.panel_owner(),
            }
        })
    }

    // ── Teardown ────────────────────────────────────────────────────────────

    /// Marks the session destroyed and strips it of everything it owns.
    ///
    /// Only the first call returns `Some`. Loader and refresher tasks are
    /// cancelled here; the player task is handed back so the caller decides
    /// whether to cancel or detach it.
    pub fn teardown(&self) -> Option<Teardown> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return None;
        }
        let player = {
            let mut tasks = self.tasks.lock();
            tasks.cancel_auxiliary();
            tasks.player.take()
        };
        let (tracks, panel) = self.with(|s| (s.drain_all(), s.take_panel()));
        Some(Teardown {
            tracks,
            panel,
            player,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::testing::RecordingSink;
    use crate::runtime::{TaskSpawner, TokioSpawner};
    use crate::transport::testing::MockTransport;
    use crate::types::ChannelId;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingJanitor {
        released: AtomicUsize,
    }

    impl TrackJanitor for CountingJanitor {
        fn release(&self, _track: Track) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn handle(janitor: Arc<CountingJanitor>) -> Arc<SessionHandle> {
        SessionHandle::new(
            GuildId(9),
            MockTransport::new(ChannelId(1)),
            Arc::new(RecordingSink::default()),
            janitor,
        )
    }

    #[tokio::test]
    async fn teardown_happens_once_and_cancels_loader() {
        let janitor = Arc::new(CountingJanitor::default());
        let session = handle(janitor.clone());
        session.with(|s| {
            s.push_tracks([
                Track::remote("a", "https://a", None),
                Track::remote("b", "https://b", None),
            ])
        });
        let loader = TokioSpawner::current().spawn_cancellable("playlist", |token| async move {
            token.cancelled().await;
        });
        let token = loader.token();
        session.replace_playlist_task(Some(loader));
        assert!(session.playlist_loading());

        let teardown = session.teardown().unwrap();
        assert!(token.is_cancelled());
        assert_eq!(session.release(teardown.tracks), 2);
        assert_eq!(janitor.released.load(Ordering::SeqCst), 2);

        assert!(session.teardown().is_none());
        assert!(session.is_destroyed());
        assert!(session.read(Session::is_empty));
    }

    #[tokio::test]
    async fn tasks_installed_after_teardown_are_cancelled() {
        let session = handle(Arc::new(CountingJanitor::default()));
        session.teardown();

        let task = TokioSpawner::current().spawn_cancellable("progress", |token| async move {
            token.cancelled().await;
        });
        let token = task.token();
        session.replace_progress_task(Some(task));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn replacing_loader_cancels_previous() {
        let session = handle(Arc::new(CountingJanitor::default()));
        let spawner = TokioSpawner::current();
        let first = spawner.spawn_cancellable("playlist", |token| async move {
            token.cancelled().await;
        });
        let first_token = first.token();
        session.replace_playlist_task(Some(first));
        let second = spawner.spawn_cancellable("playlist", |token| async move {
            token.cancelled().await;
        });
        session.replace_playlist_task(Some(second));
        assert!(first_token.is_cancelled());
        assert!(session.playlist_loading());
    }

    #[tokio::test]
    async fn snapshot_splits_now_playing_from_up_next() {
        let session = handle(Arc::new(CountingJanitor::default()));
        session.with(|s| {
            s.push_tracks([
                Track::remote("a", "https://a", Some(10)),
                Track::remote("b", "https://b", None),
            ]);
            s.prepare_next();
            s.begin_playback(Instant::now(), 0);
        });

        let snap = session.snapshot();
        assert_eq!(snap.now_playing.unwrap().title, "a");
        assert_eq!(snap.up_next.len(), 1);
        assert_eq!(snap.queue_length, 2);
        assert!(snap.connected);
        assert!(!snap.playlist_loading);

        let json = serde_json::to_value(session.snapshot()).unwrap();
        assert_eq!(json["guildId"], 9);
        assert_eq!(json["loopMode"], "off");
    }
}
