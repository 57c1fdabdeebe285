//! Local backend for the console front-end.
//!
//! "Voice" is the machine's speakers: each track is played by an `ffplay`
//! child process, pause and resume stop and continue that process, and
//! channel messages are printed to stdout.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use yone_core::{
    ArtifactHandle, ChannelId, ChannelSink, DisplayResult, GuildId, LinkClosed, PanelView,
    PlaybackCompletion, PlaybackEnd, StartOptions, TaskSpawner, TokioSpawner, TrackSummary,
    TransportError, TransportHandle, TransportResult, VoiceConnection, VoiceGateway, VoiceLink,
};

// ─────────────────────────────────────────────────────────────────────────────
// Gateway
// ─────────────────────────────────────────────────────────────────────────────

/// Hands out [`FfplayTransport`]s.
pub struct LocalGateway {
    player_path: String,
    spawner: TokioSpawner,
}

impl LocalGateway {
    pub fn new(player_path: impl Into<String>, spawner: TokioSpawner) -> Arc<Self> {
        Arc::new(Self {
            player_path: player_path.into(),
            spawner,
        })
    }
}

#[async_trait]
impl VoiceGateway for LocalGateway {
    async fn connect(&self, guild: GuildId, channel: ChannelId) -> TransportResult<VoiceConnection> {
        log::info!("[Local] Guild {} joined local channel {}", guild, channel);
        Ok(VoiceConnection {
            handle: Arc::new(FfplayTransport::new(
                self.player_path.clone(),
                channel,
                self.spawner.clone(),
            )),
            link: Box::new(LocalLink),
        })
    }
}

/// A link that never drops; there is no socket behind the local speakers.
struct LocalLink;

#[async_trait]
impl VoiceLink for LocalLink {
    async fn closed(&mut self) -> LinkClosed {
        std::future::pending().await
    }

    async fn potential_reconnect(&mut self) -> bool {
        true
    }

    async fn reconnect(&mut self) -> TransportResult<()> {
        Ok(())
    }

    async fn disconnect(&mut self) {}
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

struct Playback {
    id: u64,
    pid: Option<u32>,
    paused: bool,
    stop: CancellationToken,
}

/// Plays tracks through an `ffplay` child process.
pub struct FfplayTransport {
    player_path: String,
    spawner: TokioSpawner,
    channel: Mutex<Option<ChannelId>>,
    connected: AtomicBool,
    current: Arc<Mutex<Option<Playback>>>,
    next_id: AtomicU64,
}

impl FfplayTransport {
    pub fn new(player_path: String, channel: ChannelId, spawner: TokioSpawner) -> Self {
        Self {
            player_path,
            spawner,
            channel: Mutex::new(Some(channel)),
            connected: AtomicBool::new(true),
            current: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    fn command(&self, track: &TrackSummary, options: &StartOptions) -> Command {
        let mut cmd = Command::new(&self.player_path);
        cmd.args(["-nodisp", "-autoexit", "-loglevel", "error"])
            .args(options.before_args())
            .arg("-i")
            .arg(&track.locator)
            .args(options.output_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Stops or continues the playing process. Returns false if nothing changed.
    fn signal_current(&self, paused: bool) -> bool {
        let mut current = self.current.lock();
        let Some(playback) = current.as_mut() else {
            return false;
        };
        if playback.paused == paused {
            return false;
        }
        let Some(pid) = playback.pid else {
            return false;
        };
        if !send_stop_signal(pid, paused) {
            return false;
        }
        playback.paused = paused;
        true
    }
}

#[cfg(unix)]
fn send_stop_signal(pid: u32, stop: bool) -> bool {
    let signal = if stop { libc::SIGSTOP } else { libc::SIGCONT };
    // SAFETY: kill(2) has no memory-safety preconditions; the pid belongs to our own child.
    unsafe { libc::kill(pid as libc::pid_t, signal) == 0 }
}

#[cfg(not(unix))]
fn send_stop_signal(_pid: u32, _stop: bool) -> bool {
    false
}

#[async_trait]
impl TransportHandle for FfplayTransport {
    fn channel(&self) -> Option<ChannelId> {
        *self.channel.lock()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_playing(&self) -> bool {
        self.current.lock().as_ref().is_some_and(|p| !p.paused)
    }

    fn is_paused(&self) -> bool {
        self.current.lock().as_ref().is_some_and(|p| p.paused)
    }

    fn play(&self, track: &TrackSummary, options: &StartOptions) -> TransportResult<PlaybackCompletion> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.stop();

        let mut child = self.command(track, options).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TransportError::DecoderMissing(self.player_path.clone())
            } else {
                TransportError::Playback(e.to_string())
            }
        })?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let stop = CancellationToken::new();
        *self.current.lock() = Some(Playback {
            id,
            pid: child.id(),
            paused: false,
            stop: stop.clone(),
        });
        log::debug!("[Local] Playing '{}' (pid {:?})", track.title, child.id());

        let (notifier, completion) = PlaybackCompletion::channel();
        let current = Arc::clone(&self.current);
        self.spawner.spawn(async move {
            let end = tokio::select! {
                _ = stop.cancelled() => {
                    if let Err(e) = child.kill().await {
                        log::debug!("[Local] Failed to kill player: {}", e);
                    }
                    PlaybackEnd::Stopped
                }
                status = child.wait() => match status {
                    Ok(status) if status.success() => PlaybackEnd::Finished,
                    Ok(status) => PlaybackEnd::Failed(format!("player exited with {status}")),
                    Err(e) => PlaybackEnd::Failed(e.to_string()),
                },
            };
            {
                let mut current = current.lock();
                if current.as_ref().is_some_and(|p| p.id == id) {
                    *current = None;
                }
            }
            notifier.notify(end);
        });
        Ok(completion)
    }

    fn stop(&self) {
        if let Some(playback) = self.current.lock().take() {
            if playback.paused {
                if let Some(pid) = playback.pid {
                    send_stop_signal(pid, false);
                }
            }
            playback.stop.cancel();
        }
    }

    fn pause(&self) -> bool {
        self.signal_current(true)
    }

    fn resume(&self) -> bool {
        self.signal_current(false)
    }

    async fn move_to(&self, channel: ChannelId) -> TransportResult<()> {
        *self.channel.lock() = Some(channel);
        Ok(())
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.stop();
            log::info!("[Local] Left local channel");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Console channel
// ─────────────────────────────────────────────────────────────────────────────

/// Prints panels and notices to stdout.
///
/// Progress-only edits are suppressed so the terminal is not redrawn every tick.
#[derive(Default)]
pub struct ConsoleChannel {
    next_id: AtomicU64,
    last_shown: Mutex<Option<PanelView>>,
}

impl ConsoleChannel {
    fn print_panel(&self, view: &PanelView) {
        println!("\n{}\n", view.to_text());
        *self.last_shown.lock() = Some(view.clone());
    }

    fn differs_beyond_progress(&self, view: &PanelView) -> bool {
        match self.last_shown.lock().as_ref() {
            Some(last) => {
                last.now_playing != view.now_playing
                    || last.up_next != view.up_next
                    || last.footer != view.footer
            }
            None => true,
        }
    }
}

#[async_trait]
impl ChannelSink for ConsoleChannel {
    async fn send_panel(&self, view: &PanelView) -> DisplayResult<ArtifactHandle> {
        self.print_panel(view);
        Ok(ArtifactHandle(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn edit_panel(&self, _handle: ArtifactHandle, view: &PanelView) -> DisplayResult<()> {
        if self.differs_beyond_progress(view) {
            self.print_panel(view);
        }
        Ok(())
    }

    async fn delete(&self, _handle: ArtifactHandle) -> DisplayResult<()> {
        *self.last_shown.lock() = None;
        Ok(())
    }

    async fn notify(&self, text: &str, _ttl: Option<Duration>) -> DisplayResult<()> {
        println!("» {text}");
        Ok(())
    }
}
