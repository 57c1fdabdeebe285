use super::*;
use crate::display::testing::RecordingSink;
use crate::error::{ResolveError, ResolveResult};
use crate::events::TransportEvent;
use crate::protocol_constants::CLOSE_ENDPOINT_REJECTING;
use crate::resolver::AttachmentSource;
use crate::transport::testing::{MockGateway, ScriptedLink};
use crate::transport::LinkClosed;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const ALICE: UserId = UserId(100);
const VOICE: ChannelId = ChannelId(10);
const LIST_URL: &str = "https://www.youtube.com/watch?v=abc&list=PL1";
const LIST_CANONICAL: &str = "https://www.youtube.com/playlist?list=PL1";

/// Resolver answering from canned data. Titles are the references themselves.
#[derive(Default)]
struct MockResolver {
    playlists: HashMap<String, Vec<String>>,
    entry_delay: Option<Duration>,
    resolved: Mutex<Vec<String>>,
}

impl MockResolver {
    fn with_playlist(mut self, url: &str, entries: &[&str]) -> Self {
        self.playlists
            .insert(url.to_string(), entries.iter().map(|e| e.to_string()).collect());
        self
    }

    fn with_entry_delay(mut self, delay: Duration) -> Self {
        self.entry_delay = Some(delay);
        self
    }
}

#[async_trait]
impl TrackResolver for MockResolver {
    async fn resolve(&self, reference: &str) -> ResolveResult<Vec<Track>> {
        self.resolved.lock().push(reference.to_string());
        if reference.starts_with("https://p/") {
            if let Some(delay) = self.entry_delay {
                tokio::time::sleep(delay).await;
            }
        }
        if reference.contains("fail") {
            return Err(ResolveError::NotFound(reference.to_string()));
        }
        Ok(vec![Track::remote(reference, format!("https://media/{reference}"), Some(200))])
    }

    async fn playlist_entries(&self, playlist_url: &str) -> ResolveResult<Vec<String>> {
        self.playlists
            .get(playlist_url)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound(playlist_url.to_string()))
    }

    async fn resolve_attachment(&self, attachment: &Attachment) -> ResolveResult<Track> {
        if attachment.filename.contains("bad") {
            return Err(ResolveError::Download("403".into()));
        }
        Ok(Track::remote(attachment.filename.clone(), "https://cdn/file", None))
    }
}

#[derive(Default)]
struct CountingJanitor {
    released: AtomicUsize,
}

impl TrackJanitor for CountingJanitor {
    fn release(&self, _track: Track) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RecordingEmitter {
    destroyed: Mutex<Vec<(GuildId, TeardownReason)>>,
    queue_changes: AtomicUsize,
}

impl EventEmitter for RecordingEmitter {
    fn emit_session(&self, event: SessionEvent) {
        match event {
            SessionEvent::Destroyed { guild_id, reason, .. } => {
                self.destroyed.lock().push((guild_id, reason));
            }
            SessionEvent::QueueChanged { .. } => {
                self.queue_changes.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }

    fn emit_transport(&self, _event: TransportEvent) {}
}

struct Fixture {
    engine: Arc<MusicEngine>,
    gateway: Arc<MockGateway>,
    resolver: Arc<MockResolver>,
    janitor: Arc<CountingJanitor>,
    emitter: Arc<RecordingEmitter>,
    sink: Arc<RecordingSink>,
}

impl Fixture {
    fn new() -> Self {
        Self::with(MockGateway::new(), MockResolver::default())
    }

    fn with(gateway: Arc<MockGateway>, resolver: MockResolver) -> Self {
        let resolver = Arc::new(resolver);
        let janitor = Arc::new(CountingJanitor::default());
        let emitter = Arc::new(RecordingEmitter::default());
        let engine = MusicEngine::new(
            Config::default(),
            EngineDeps {
                gateway: gateway.clone(),
                resolver: resolver.clone(),
                janitor: janitor.clone(),
                emitter: emitter.clone(),
                spawner: TokioSpawner::current(),
            },
        );
        Self {
            engine,
            gateway,
            resolver,
            janitor,
            emitter,
            sink: Arc::new(RecordingSink::default()),
        }
    }

    fn request(&self, guild: u64, references: &[&str]) -> AddRequest {
        AddRequest {
            guild: GuildId(guild),
            voice_channel: Some(VOICE),
            requester: ALICE,
            references: references.iter().map(|r| r.to_string()).collect(),
            attachments: Vec::new(),
            order: OrderPolicy::default(),
            sink: self.sink.clone(),
        }
    }

    async fn add(&self, guild: u64, references: &[&str]) -> YoneResult<AddOutcome> {
        self.engine.add_tracks(self.request(guild, references)).await
    }

    fn titles(&self, guild: u64) -> Vec<String> {
        self.engine
            .store()
            .get(GuildId(guild))
            .map(|session| session.read(|s| s.summaries()))
            .unwrap_or_default()
            .into_iter()
            .map(|summary| summary.title)
            .collect()
    }

    fn played(&self) -> Vec<String> {
        self.gateway
            .last_transport()
            .map(|t| t.played_titles())
            .unwrap_or_default()
    }
}

fn attachment(name: &str) -> Attachment {
    Attachment {
        filename: name.to_string(),
        source: AttachmentSource::Url(format!("https://cdn/{name}")),
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Play requests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn add_joins_queues_and_starts_playback() {
    let f = Fixture::new();
    let outcome = f.add(1, &["first song", "second song"]).await.unwrap();

    assert_eq!(
        outcome,
        AddOutcome {
            queued: 2,
            playlists: 0,
            failed: 0,
            session_created: true,
        }
    );
    assert!(f.sink.has_notice("⏱️ **2 tracks** added to the queue!"));

    settle().await;
    assert_eq!(f.played(), vec!["first song"]);
    assert!(f.sink.has_notice("▶️ **Now playing**: first song"));
    assert_eq!(f.gateway.connects(), 1);
    assert!(f.emitter.queue_changes.load(Ordering::SeqCst) >= 1);
}

#[tokio::test(start_paused = true)]
async fn second_add_reuses_session_and_connection() {
    let f = Fixture::new();
    f.add(1, &["a"]).await.unwrap();
    settle().await;
    let outcome = f.add(1, &["b"]).await.unwrap();

    assert!(!outcome.session_created);
    assert_eq!(f.gateway.connects(), 1);
    assert_eq!(f.titles(1), vec!["a", "b"]);
}

#[tokio::test(start_paused = true)]
async fn request_resolving_past_grace_window_rejoins_and_plays() {
    let resolver = MockResolver::default().with_entry_delay(Duration::from_secs(6));
    let f = Fixture::with(MockGateway::new(), resolver);
    f.add(1, &["a"]).await.unwrap();
    settle().await;
    let first = f.gateway.last_transport().unwrap();
    assert!(first.finish());
    settle().await;

    // The empty-queue grace window runs out while this one is still resolving.
    let outcome = f.add(1, &["https://p/slow"]).await.unwrap();
    assert_eq!(outcome.queued, 1);
    assert!(outcome.session_created);
    assert_eq!(
        f.emitter.destroyed.lock().clone(),
        vec![(GuildId(1), TeardownReason::QueueExhausted)]
    );
    assert!(!first.is_connected());
    assert_eq!(f.gateway.connects(), 2);

    settle().await;
    let session = f.engine.store().get(GuildId(1)).unwrap();
    assert!(session.transport().is_connected());
    assert_eq!(f.titles(1), vec!["https://p/slow"]);
    assert_eq!(f.played(), vec!["https://p/slow"]);
    assert_eq!(first.played_titles(), vec!["a"]);
}

#[tokio::test(start_paused = true)]
async fn failed_items_are_reported_and_skipped() {
    let f = Fixture::new();
    let mut request = f.request(1, &["good", "will fail"]);
    request.attachments = vec![attachment("bad.mp3")];
    let outcome = f.engine.add_tracks(request).await.unwrap();

    assert_eq!(outcome.queued, 1);
    assert_eq!(outcome.failed, 2);
    assert!(f.sink.has_notice("⚠️ Could not get a track from `will fail`"));
    assert!(f.sink.has_notice("⚠️ Attachment error:"));
    assert!(f.sink.has_notice("⏱️ **1 tracks** added to the queue!"));
    assert_eq!(f.titles(1), vec!["good"]);
}

#[tokio::test(start_paused = true)]
async fn order_policy_decides_which_half_goes_first() {
    let f = Fixture::new();

    let mut attachments_first = f.request(1, &["query"]);
    attachments_first.attachments = vec![attachment("upload.mp3")];
    f.engine.add_tracks(attachments_first).await.unwrap();

    let mut query_first = f.request(2, &["query"]);
    query_first.attachments = vec![attachment("upload.mp3")];
    query_first.order = OrderPolicy::QueryFirst;
    f.engine.add_tracks(query_first).await.unwrap();

    assert_eq!(f.titles(1), vec!["upload.mp3", "query"]);
    assert_eq!(f.titles(2), vec!["query", "upload.mp3"]);
}

#[tokio::test]
async fn requester_outside_voice_is_refused() {
    let f = Fixture::new();
    let mut request = f.request(1, &["song"]);
    request.voice_channel = None;

    let err = f.engine.add_tracks(request).await.unwrap_err();
    assert!(matches!(err, YoneError::NotInVoice));
    assert!(f.sink.has_notice("🎤 Join a voice channel first!"));
    assert_eq!(f.gateway.connects(), 0);
    assert!(f.engine.store().is_empty());
}

#[tokio::test]
async fn blank_request_is_invalid() {
    let f = Fixture::new();
    let err = f.add(1, &["  ", ""]).await.unwrap_err();
    assert!(matches!(err, YoneError::InvalidRequest(_)));
    assert_eq!(f.gateway.connects(), 0);
}

#[tokio::test]
async fn rejected_endpoint_cools_down_further_requests() {
    let gateway =
        MockGateway::new().with_failures(vec![TransportError::Closed(CLOSE_ENDPOINT_REJECTING)]);
    let f = Fixture::with(gateway, MockResolver::default());

    let err = f.add(1, &["song"]).await.unwrap_err();
    assert!(matches!(err, YoneError::Transport(_)));
    assert!(f.sink.has_notice("Failed to join the voice channel"));

    let notices_before = f.sink.notices().len();
    let err = f.add(1, &["song"]).await.unwrap_err();
    assert!(matches!(err, YoneError::CoolingDown(_)));
    assert_eq!(f.sink.notices().len(), notices_before);
    assert_eq!(f.gateway.connects(), 1);
    assert!(f.resolver.resolved.lock().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Playlists
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn playlist_entries_are_queued_lazily() {
    let resolver =
        MockResolver::default().with_playlist(LIST_CANONICAL, &["https://p/1", "https://p/2", "https://p/3"]);
    let f = Fixture::with(MockGateway::new(), resolver);

    let outcome = f.add(1, &[LIST_URL]).await.unwrap();
    assert_eq!(outcome.queued, 0);
    assert_eq!(outcome.playlists, 1);

    settle().await;
    assert!(f.sink.has_notice("⏱️ Loading playlist... (3 tracks)"));
    assert!(f.sink.has_notice("✅ Playlist loaded (3 tracks)"));
    assert_eq!(f.titles(1), vec!["https://p/1", "https://p/2", "https://p/3"]);
    assert_eq!(f.played(), vec!["https://p/1"]);
}

#[tokio::test(start_paused = true)]
async fn new_request_cancels_playlist_in_progress() {
    let resolver = MockResolver::default()
        .with_playlist(LIST_CANONICAL, &["https://p/1", "https://p/2", "https://p/3"])
        .with_entry_delay(Duration::from_secs(1));
    let f = Fixture::with(MockGateway::new(), resolver);

    f.add(1, &[LIST_URL]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(f.titles(1), vec!["https://p/1"]);

    f.add(1, &["next"]).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(f.titles(1), vec!["https://p/1", "next"]);
    assert!(!f.sink.has_notice("✅ Playlist loaded"));
    let session = f.engine.store().get(GuildId(1)).unwrap();
    assert!(!session.playlist_loading());
}

#[tokio::test(start_paused = true)]
async fn unknown_playlist_is_reported() {
    let f = Fixture::new();
    f.add(1, &[LIST_URL]).await.unwrap();
    settle().await;

    assert!(f.sink.has_notice("⚠️ Could not load the playlist"));
    assert!(f.titles(1).is_empty());
}

#[tokio::test(start_paused = true)]
async fn empty_playlist_is_reported() {
    let resolver = MockResolver::default().with_playlist(LIST_CANONICAL, &[]);
    let f = Fixture::with(MockGateway::new(), resolver);
    f.add(1, &[LIST_URL]).await.unwrap();
    settle().await;

    assert!(f.sink.has_notice("⚠️ No tracks found in playlist"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn seek_command_posts_confirmation() {
    let f = Fixture::new();
    f.add(1, &["song"]).await.unwrap();
    settle().await;

    let outcome = f.engine.seek(GuildId(1), ALICE, "1:30").await.unwrap();
    assert_eq!(outcome, ControlOutcome::Seeking { target: 90 });
    assert!(f.sink.has_notice("1分30秒から再生します"));

    settle().await;
    let transport = f.gateway.last_transport().unwrap();
    let plays = transport.plays.lock().clone();
    assert_eq!(plays.len(), 2);
    assert_eq!(plays[1].1.start_offset, Some(90));
}

#[tokio::test(start_paused = true)]
async fn malformed_seek_time_is_rejected() {
    let f = Fixture::new();
    f.add(1, &["song"]).await.unwrap();
    settle().await;

    let err = f.engine.seek(GuildId(1), ALICE, "soon").await.unwrap_err();
    assert_eq!(err, ControlError::InvalidTime("soon".into()));
    let err = f.engine.forward(GuildId(1), ALICE, Some("x")).await.unwrap_err();
    assert_eq!(err, ControlError::InvalidTime("x".into()));
}

#[tokio::test(start_paused = true)]
async fn remove_command_reports_titles() {
    let f = Fixture::new();
    f.add(1, &["a", "b", "c"]).await.unwrap();
    settle().await;

    let outcome = f.engine.remove_tracks(GuildId(1), ALICE, vec![2]).await.unwrap();
    assert_eq!(outcome, ControlOutcome::Removed { titles: vec!["c".to_string()] });
    assert!(f.sink.has_notice("🗑 Removed **c**"));
    assert_eq!(f.titles(1), vec!["a", "b"]);
    assert_eq!(f.janitor.released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn commands_without_session_are_rejected() {
    let f = Fixture::new();
    let err = f
        .engine
        .dispatch(GuildId(1), ControlOrigin::Command(ALICE), ControlAction::Skip)
        .await
        .unwrap_err();
    assert_eq!(err, ControlError::NoSession);

    let err = f.engine.show_queue_panel(GuildId(1), ALICE).await.unwrap_err();
    assert!(matches!(err, YoneError::SessionNotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn queue_panel_is_posted_and_owned() {
    let f = Fixture::new();
    f.add(1, &["a", "b"]).await.unwrap();
    settle().await;

    f.engine.show_queue_panel(GuildId(1), ALICE).await.unwrap();
    assert_eq!(f.sink.sent.lock().len(), 1);

    let stranger = ControlOrigin::Panel(UserId(999));
    let err = f
        .engine
        .dispatch(GuildId(1), stranger, ControlAction::Shuffle)
        .await
        .unwrap_err();
    assert_eq!(err, ControlError::NotPanelOwner);

    let outcome = f
        .engine
        .dispatch(GuildId(1), ControlOrigin::Panel(ALICE), ControlAction::CycleLoop)
        .await
        .unwrap();
    assert!(matches!(outcome, ControlOutcome::LoopChanged { .. }));
}

#[tokio::test(start_paused = true)]
async fn pause_toggle_resumes_on_second_press() {
    let f = Fixture::new();
    f.add(1, &["a"]).await.unwrap();
    settle().await;
    let transport = f.gateway.last_transport().unwrap();
    let origin = ControlOrigin::Command(ALICE);

    let paused = f
        .engine
        .dispatch(GuildId(1), origin, ControlAction::TogglePause)
        .await;
    assert_eq!(paused, Ok(ControlOutcome::Paused));
    assert!(transport.is_paused());
    assert!(!transport.is_playing());

    let resumed = f
        .engine
        .dispatch(GuildId(1), origin, ControlAction::TogglePause)
        .await;
    assert_eq!(resumed, Ok(ControlOutcome::Resumed));
    assert!(transport.is_playing());
    assert!(!transport.is_paused());
}

// ─────────────────────────────────────────────────────────────────────────────
// Teardown paths
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn stop_tears_down_and_disconnects_once() {
    let f = Fixture::new();
    f.add(1, &["a", "b"]).await.unwrap();
    settle().await;

    assert!(f.engine.stop(GuildId(1)).await);
    settle().await;
    assert!(f.engine.store().get(GuildId(1)).is_none());
    assert_eq!(f.gateway.transport_disconnects(), 1);
    assert_eq!(f.janitor.released.load(Ordering::SeqCst), 2);
    assert_eq!(
        f.emitter.destroyed.lock().clone(),
        vec![(GuildId(1), TeardownReason::Stopped)]
    );

    assert!(!f.engine.stop(GuildId(1)).await);
    assert_eq!(f.gateway.transport_disconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn last_human_leaving_triggers_auto_leave() {
    let f = Fixture::new();
    f.add(1, &["a"]).await.unwrap();
    settle().await;

    let crowded = PresenceUpdate { guild: GuildId(1), channel: VOICE, humans: 2 };
    assert!(!f.engine.handle_presence(crowded).await);
    let elsewhere = PresenceUpdate { guild: GuildId(1), channel: ChannelId(77), humans: 0 };
    assert!(!f.engine.handle_presence(elsewhere).await);

    let empty = PresenceUpdate { guild: GuildId(1), channel: VOICE, humans: 0 };
    assert!(f.engine.handle_presence(empty).await);
    assert!(f.engine.store().is_empty());
    assert_eq!(f.gateway.transport_disconnects(), 1);
    assert_eq!(
        f.emitter.destroyed.lock().clone(),
        vec![(GuildId(1), TeardownReason::AutoLeave)]
    );
}

#[tokio::test(start_paused = true)]
async fn auto_leave_off_keeps_session() {
    let f = Fixture::new();
    f.add(1, &["a"]).await.unwrap();
    settle().await;
    f.engine
        .dispatch(GuildId(1), ControlOrigin::Command(ALICE), ControlAction::ToggleAutoLeave)
        .await
        .unwrap();

    let empty = PresenceUpdate { guild: GuildId(1), channel: VOICE, humans: 0 };
    assert!(!f.engine.handle_presence(empty).await);
    assert!(f.engine.store().get(GuildId(1)).is_some());
}

#[tokio::test(start_paused = true)]
async fn lost_transport_destroys_session() {
    let gateway = MockGateway::new().with_link(ScriptedLink::new(vec![LinkClosed::Code(1000)]));
    let f = Fixture::with(gateway, MockResolver::default());
    f.add(1, &["a", "b"]).await.unwrap();
    settle().await;

    assert!(f.engine.store().get(GuildId(1)).is_none());
    assert_eq!(f.janitor.released.load(Ordering::SeqCst), 2);
    assert_eq!(f.gateway.transport_disconnects(), 1);
    assert_eq!(
        f.emitter.destroyed.lock().clone(),
        vec![(GuildId(1), TeardownReason::TransportLost)]
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_destroys_every_session() {
    let f = Fixture::new();
    f.add(2, &["a"]).await.unwrap();
    f.add(1, &["b"]).await.unwrap();
    settle().await;

    let guilds: Vec<_> = f.engine.snapshots().iter().map(|s| s.guild_id).collect();
    assert_eq!(guilds, vec![GuildId(1), GuildId(2)]);
    assert_eq!(f.engine.snapshot(GuildId(1)).unwrap().now_playing.unwrap().title, "b");

    f.engine.shutdown().await;
    assert!(f.engine.store().is_empty());
    assert!(f.engine.snapshots().is_empty());
    assert_eq!(f.gateway.transport_disconnects(), 2);
    assert_eq!(f.engine.connector().live_count(), 0);
}
