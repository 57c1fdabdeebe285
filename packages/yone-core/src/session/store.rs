//! Keyed registry of live sessions.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::SessionHandle;
use crate::events::{EventEmitter, SessionEvent, TeardownReason};
use crate::types::GuildId;
use crate::utils::now_millis;

/// One [`SessionHandle`] per guild.
///
/// The store is the only place sessions are created and destroyed, so the
/// "release every track, disconnect once" teardown sequence lives here.
pub struct SessionStore {
    sessions: DashMap<GuildId, Arc<SessionHandle>>,
    emitter: Arc<dyn EventEmitter>,
}

impl SessionStore {
    pub fn new(emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            sessions: DashMap::new(),
            emitter,
        }
    }

    pub fn get(&self, guild: GuildId) -> Option<Arc<SessionHandle>> {
        self.sessions
            .get(&guild)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|handle| !handle.is_destroyed())
    }

    /// Returns the guild's session, creating it with `make` if there is none.
    ///
    /// The boolean is true when a new session was created.
    pub fn get_or_create(
        &self,
        guild: GuildId,
        make: impl FnOnce() -> Arc<SessionHandle>,
    ) -> (Arc<SessionHandle>, bool) {
        let mut created = false;
        let handle = match self.sessions.entry(guild) {
            // A destroyed handle can linger between teardown and removal.
            Entry::Occupied(mut entry) if entry.get().is_destroyed() => {
                created = true;
                let handle = make();
                entry.insert(Arc::clone(&handle));
                handle
            }
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                created = true;
                let handle = make();
                entry.insert(Arc::clone(&handle));
                handle
            }
        };

        if created {
            log::info!("[Engine] Created session {} for guild {}", handle.id(), guild);
            self.emitter.emit_session(SessionEvent::Created {
                guild_id: guild,
                session_id: handle.id().to_string(),
                timestamp: now_millis(),
            });
        }
        (handle, created)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn all(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Destroys a session from outside its player loop.
    ///
    /// Returns false if the session was already destroyed.
    pub async fn destroy(&self, handle: &Arc<SessionHandle>, reason: TeardownReason) -> bool {
        self.teardown(handle, reason, false).await
    }

    /// Destroys a session from inside its own player loop.
    ///
    /// The player task is detached instead of cancelled so the caller can
    /// finish the teardown it started.
    pub async fn destroy_from_player(&self, handle: &Arc<SessionHandle>, reason: TeardownReason) -> bool {
        self.teardown(handle, reason, true).await
    }

    /// Destroys every session (shutdown).
    pub async fn destroy_all(&self, reason: TeardownReason) {
        for handle in self.all() {
            self.destroy(&handle, reason).await;
        }
    }

    async fn teardown(&self, handle: &Arc<SessionHandle>, reason: TeardownReason, from_player: bool) -> bool {
        let guild = handle.guild();
        self.sessions
            .remove_if(&guild, |_, stored| Arc::ptr_eq(stored, handle));

        let Some(teardown) = handle.teardown() else {
            return false;
        };

        if let Some(player) = teardown.player {
            if from_player {
                player.detach();
            } else {
                player.cancel();
            }
        }

        handle.transport().stop();
        let released = handle.release(teardown.tracks);

        if let Some(panel) = teardown.panel {
            if let Err(e) = handle.sink().delete(panel).await {
                log::debug!("[Engine] Guild {} panel delete failed: {}", guild, e);
            }
        }

        handle.transport().disconnect().await;

        log::info!(
            "[Engine] Destroyed session for guild {} ({:?}, released {} track(s))",
            guild,
            reason,
            released
        );
        self.emitter.emit_session(SessionEvent::Destroyed {
            guild_id: guild,
            reason,
            released,
            timestamp: now_millis(),
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::testing::RecordingSink;
    use crate::events::{NoopEventEmitter, TransportEvent};
    use crate::track::{Track, TrackJanitor};
    use crate::transport::testing::MockTransport;
    use crate::types::{ChannelId, UserId};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingJanitor {
        released: Mutex<Vec<String>>,
    }

    impl TrackJanitor for RecordingJanitor {
        fn release(&self, track: Track) {
            self.released.lock().push(track.title);
        }
    }

    #[derive(Default)]
    struct CountingEmitter {
        created: AtomicUsize,
        destroyed: AtomicUsize,
    }

    impl EventEmitter for CountingEmitter {
        fn emit_session(&self, event: SessionEvent) {
            match event {
                SessionEvent::Created { .. } => self.created.fetch_add(1, Ordering::SeqCst),
                SessionEvent::Destroyed { .. } => self.destroyed.fetch_add(1, Ordering::SeqCst),
                _ => 0,
            };
        }

        fn emit_transport(&self, _event: TransportEvent) {}
    }

    fn make(
        transport: &Arc<MockTransport>,
        sink: &Arc<RecordingSink>,
        janitor: &Arc<RecordingJanitor>,
    ) -> impl FnOnce() -> Arc<SessionHandle> {
        let (transport, sink, janitor) = (transport.clone(), sink.clone(), janitor.clone());
        move || SessionHandle::new(GuildId(1), transport, sink, janitor)
    }

    #[tokio::test]
    async fn destroy_releases_everything_and_disconnects_once() {
        let emitter = Arc::new(CountingEmitter::default());
        let store = SessionStore::new(emitter.clone());
        let transport = MockTransport::new(ChannelId(2));
        let sink = Arc::new(RecordingSink::default());
        let janitor = Arc::new(RecordingJanitor::default());

        let (handle, created) = store.get_or_create(GuildId(1), make(&transport, &sink, &janitor));
        assert!(created);
        handle.with(|s| {
            s.push_tracks([
                Track::remote("a", "https://a", None),
                Track::remote("b", "https://b", None),
            ]);
            s.set_panel(crate::display::ArtifactHandle(7), UserId(3));
        });

        assert!(store.destroy(&handle, TeardownReason::Stopped).await);
        assert!(!store.destroy(&handle, TeardownReason::Stopped).await);

        assert_eq!(*janitor.released.lock(), vec!["a", "b"]);
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(*sink.deleted.lock(), vec![crate::display::ArtifactHandle(7)]);
        assert!(store.get(GuildId(1)).is_none());
        assert_eq!(emitter.created.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn get_or_create_reuses_live_session() {
        let store = SessionStore::new(Arc::new(NoopEventEmitter));
        let transport = MockTransport::new(ChannelId(2));
        let sink = Arc::new(RecordingSink::default());
        let janitor = Arc::new(RecordingJanitor::default());

        let (first, _) = store.get_or_create(GuildId(1), make(&transport, &sink, &janitor));
        let (second, created) = store.get_or_create(GuildId(1), make(&transport, &sink, &janitor));
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn destroyed_entry_is_replaced() {
        let store = SessionStore::new(Arc::new(NoopEventEmitter));
        let transport = MockTransport::new(ChannelId(2));
        let sink = Arc::new(RecordingSink::default());
        let janitor = Arc::new(RecordingJanitor::default());

        let (first, _) = store.get_or_create(GuildId(1), make(&transport, &sink, &janitor));
        // Simulate a teardown that has not yet removed the entry.
        first.teardown();
        assert!(store.get(GuildId(1)).is_none());

        let (second, created) = store.get_or_create(GuildId(1), make(&transport, &sink, &janitor));
        assert!(created);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn destroy_all_empties_store() {
        let store = SessionStore::new(Arc::new(NoopEventEmitter));
        for guild in 1..=3 {
            let transport = MockTransport::new(ChannelId(guild));
            store.get_or_create(GuildId(guild), move || {
                SessionHandle::new(
                    GuildId(guild),
                    transport,
                    Arc::new(RecordingSink::default()),
                    Arc::new(RecordingJanitor::default()),
                )
            });
        }
        store.destroy_all(TeardownReason::Stopped).await;
        assert!(store.is_empty());
    }
}
