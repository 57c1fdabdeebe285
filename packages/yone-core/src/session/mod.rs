//! Per-guild session state.
//!
//! [`Session`] is the authoritative record for one guild: queue, loop mode,
//! clock, pending seek and panel bookkeeping. Every method is synchronous and
//! never suspends, so a whole multi-field transformation happens inside one
//! critical section of [`SessionHandle`].
//!
//! The now-playing track is not stored separately: while a track is current
//! it is always `queue[0]`, and `has_current` records that fact.
//!
//! Methods that take tracks out of the queue return them by value. The caller
//! hands them to a [`TrackJanitor`](crate::track::TrackJanitor) after leaving
//! the critical section.

mod handle;
mod store;

use std::collections::{BTreeSet, VecDeque};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tokio::time::Instant;

pub use handle::{SessionHandle, SessionSnapshot, Teardown};
pub use store::SessionStore;

use crate::display::ArtifactHandle;
use crate::error::{ControlError, ControlResult};
use crate::track::{Track, TrackSummary};
use crate::types::UserId;

// ─────────────────────────────────────────────────────────────────────────────
// Loop Mode
// ─────────────────────────────────────────────────────────────────────────────

/// What happens to a track when it finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LoopMode {
    /// Pop the finished track and release it.
    #[default]
    Off,
    /// Leave it at the front and play it again.
    Track,
    /// Rotate it to the back of the queue.
    Queue,
}

impl LoopMode {
    /// OFF → TRACK → QUEUE → OFF.
    pub fn next(self) -> Self {
        match self {
            Self::Off => Self::Track,
            Self::Track => Self::Queue,
            Self::Queue => Self::Off,
        }
    }

    /// Label shown on the panel footer and loop button.
    pub fn label(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Track => "Song",
            Self::Queue => "Queue",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Playback Clock
// ─────────────────────────────────────────────────────────────────────────────

/// Wall-clock position tracking with pause and seek correction.
///
/// Position is `offset + (now - started_at)` while running and the frozen
/// `paused_at` value while paused.
#[derive(Debug, Clone, Default)]
pub struct PlaybackClock {
    started_at: Option<Instant>,
    offset: u64,
    paused_at: Option<u64>,
}

impl PlaybackClock {
    /// Whether the current track has actually started playing.
    pub fn has_started(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Elapsed seconds, unclamped. Zero before start.
    pub fn elapsed(&self, now: Instant) -> u64 {
        if let Some(frozen) = self.paused_at {
            return frozen;
        }
        match self.started_at {
            Some(start) => self.offset + now.saturating_duration_since(start).as_secs(),
            None => 0,
        }
    }

    fn start(&mut self, now: Instant, offset: u64) {
        self.started_at = Some(now);
        self.offset = offset;
        self.paused_at = None;
    }

    fn clear(&mut self) {
        *self = Self::default();
    }

    fn pause(&mut self, now: Instant) {
        if self.started_at.is_some() && self.paused_at.is_none() {
            self.paused_at = Some(self.elapsed(now));
        }
    }

    fn resume(&mut self, now: Instant) {
        if let Some(frozen) = self.paused_at.take() {
            self.started_at = Some(now);
            self.offset = frozen;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// What the player loop should start next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTrack {
    pub track: TrackSummary,
    /// Start offset from a consumed seek request.
    pub seek: Option<u64>,
    /// False for seek restarts, which are not re-announced.
    pub announce: bool,
}

/// Result of applying the end-of-track policy.
#[derive(Debug)]
pub enum Advance {
    /// A seek is pending: restart the same track without loop policy.
    Restart,
    /// Move on. `released` is the finished track when the policy popped it.
    Next { released: Option<Track> },
}

/// Authoritative per-guild state.
#[derive(Debug)]
pub struct Session {
    queue: VecDeque<Track>,
    has_current: bool,
    pub loop_mode: LoopMode,
    pub auto_leave: bool,
    clock: PlaybackClock,
    pending_seek: Option<u64>,
    suppress_announce: bool,
    skip_requested: bool,
    panel: Option<ArtifactHandle>,
    panel_owner: Option<UserId>,
    player_active: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            has_current: false,
            loop_mode: LoopMode::Off,
            auto_leave: true,
            clock: PlaybackClock::default(),
            pending_seek: None,
            suppress_announce: false,
            skip_requested: false,
            panel: None,
            panel_owner: None,
            player_active: false,
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    /// Queue length including the now-playing entry.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// The now-playing track (always `queue[0]` when present).
    pub fn current(&self) -> Option<&Track> {
        if self.has_current {
            self.queue.front()
        } else {
            None
        }
    }

    /// Queue entries after the now-playing track.
    pub fn up_next(&self) -> impl Iterator<Item = &Track> {
        self.queue.iter().skip(self.up_next_base())
    }

    pub fn up_next_len(&self) -> usize {
        self.queue.len() - self.up_next_base()
    }

    fn up_next_base(&self) -> usize {
        usize::from(self.has_current && !self.queue.is_empty())
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    /// Pause-aware position clamped to `[0, duration]`.
    pub fn position(&self, now: Instant) -> u64 {
        let elapsed = self.clock.elapsed(now);
        match self.current().and_then(|t| t.duration) {
            Some(duration) => elapsed.min(duration),
            None => elapsed,
        }
    }

    pub fn pending_seek(&self) -> Option<u64> {
        self.pending_seek
    }

    pub fn panel(&self) -> Option<ArtifactHandle> {
        self.panel
    }

    pub fn panel_owner(&self) -> Option<UserId> {
        self.panel_owner
    }

    // ── Queue mutation ──────────────────────────────────────────────────────

    pub fn push_tracks(&mut self, tracks: impl IntoIterator<Item = Track>) {
        self.queue.extend(tracks);
    }

    /// Shuffles the Up Next entries; the now-playing track stays at the head.
    pub fn shuffle_up_next<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let base = self.up_next_base();
        self.queue.make_contiguous()[base..].shuffle(rng);
    }

    /// Removes Up Next entries by 1-based index. Out-of-range indices are ignored.
    pub fn remove_up_next(&mut self, indices: &[usize]) -> ControlResult<Vec<Track>> {
        let base = self.up_next_base();
        let valid: BTreeSet<usize> = indices
            .iter()
            .copied()
            .filter(|&i| i >= 1 && i <= self.up_next_len())
            .collect();
        if valid.is_empty() {
            return Err(ControlError::EmptySelection);
        }
        Ok(valid
            .into_iter()
            .rev()
            .filter_map(|i| self.queue.remove(base + i - 1))
            .collect())
    }

    /// Removes a single Up Next entry from a panel button.
    pub fn remove_at(&mut self, index: usize) -> ControlResult<Track> {
        if index == 0 || index > self.up_next_len() {
            return Err(ControlError::StaleIndex(index));
        }
        let base = self.up_next_base();
        self.queue
            .remove(base + index - 1)
            .ok_or(ControlError::StaleIndex(index))
    }

    /// Keeps only the selected Up Next entries (original order); the rest are returned.
    pub fn keep_up_next(&mut self, indices: &[usize]) -> ControlResult<Vec<Track>> {
        let up_next_len = self.up_next_len();
        let keep: BTreeSet<usize> = indices
            .iter()
            .copied()
            .filter(|&i| i >= 1 && i <= up_next_len)
            .collect();
        if keep.is_empty() {
            return Err(ControlError::EmptySelection);
        }

        let base = self.up_next_base();
        let mut rest = self.queue.split_off(base);
        let mut removed = Vec::new();
        for (i, track) in rest.drain(..).enumerate() {
            if keep.contains(&(i + 1)) {
                self.queue.push_back(track);
            } else {
                removed.push(track);
            }
        }
        Ok(removed)
    }

    /// Empties the queue, returning every track for release.
    pub fn drain_all(&mut self) -> Vec<Track> {
        self.has_current = false;
        self.clock.clear();
        self.pending_seek = None;
        self.queue.drain(..).collect()
    }

    // ── Controls ────────────────────────────────────────────────────────────

    pub fn cycle_loop(&mut self) -> LoopMode {
        self.loop_mode = self.loop_mode.next();
        self.loop_mode
    }

    pub fn toggle_auto_leave(&mut self) -> bool {
        self.auto_leave = !self.auto_leave;
        self.auto_leave
    }

    /// Marks the in-flight track as skipped so TRACK loop does not replay it.
    ///
    /// A seek still waiting for the player is dropped; the later action wins.
    pub fn request_skip(&mut self) {
        if self.has_current {
            self.skip_requested = true;
            self.pending_seek = None;
            self.suppress_announce = false;
        }
    }

    /// Validates and records a seek; the player restarts the track at `offset`.
    pub fn request_seek(&mut self, offset: u64) -> ControlResult<()> {
        let current = self.current().ok_or(ControlError::NothingPlaying)?;
        if let Some(duration) = current.duration {
            if offset >= duration {
                return Err(ControlError::SeekOutOfRange {
                    requested: offset,
                    duration,
                });
            }
        }
        self.pending_seek = Some(offset);
        self.suppress_announce = true;
        Ok(())
    }

    pub fn pause_clock(&mut self, now: Instant) {
        self.clock.pause(now);
    }

    pub fn resume_clock(&mut self, now: Instant) {
        self.clock.resume(now);
    }

    pub fn set_panel(&mut self, panel: ArtifactHandle, owner: UserId) {
        self.panel = Some(panel);
        self.panel_owner = Some(owner);
    }

    /// Forgets the panel, returning the handle so the caller can delete it.
    pub fn take_panel(&mut self) -> Option<ArtifactHandle> {
        self.panel_owner = None;
        self.panel.take()
    }

    // ── Player loop transitions ─────────────────────────────────────────────

    /// Claims the player loop slot. Returns false if a loop is already running.
    pub fn claim_player(&mut self) -> bool {
        !std::mem::replace(&mut self.player_active, true)
    }

    /// Makes `queue[0]` current and consumes the pending seek.
    pub fn prepare_next(&mut self) -> Option<PreparedTrack> {
        let front = self.queue.front()?;
        let track = front.summary();
        self.has_current = true;
        let seek = self.pending_seek.take();
        let announce = !std::mem::take(&mut self.suppress_announce);
        self.clock.clear();
        Some(PreparedTrack {
            track,
            seek,
            announce,
        })
    }

    /// Records that playback of the current track started at `offset`.
    pub fn begin_playback(&mut self, now: Instant, offset: u64) {
        self.has_current = !self.queue.is_empty();
        self.clock.start(now, offset);
    }

    /// Drops the current track after a failed start.
    pub fn drop_current(&mut self) -> Option<Track> {
        if !self.has_current {
            return None;
        }
        self.has_current = false;
        self.skip_requested = false;
        self.clock.clear();
        self.queue.pop_front()
    }

    /// Applies the end-of-track policy.
    pub fn finish_track(&mut self) -> Advance {
        self.clock.clear();
        if self.pending_seek.is_some() && self.has_current {
            self.skip_requested = false;
            return Advance::Restart;
        }

        let mode = match self.loop_mode {
            LoopMode::Track if self.skip_requested => LoopMode::Off,
            mode => mode,
        };
        self.skip_requested = false;
        let was_current = std::mem::take(&mut self.has_current);
        if !was_current || self.queue.is_empty() {
            return Advance::Next { released: None };
        }

        match mode {
            LoopMode::Off => Advance::Next {
                released: self.queue.pop_front(),
            },
            LoopMode::Queue => {
                self.queue.rotate_left(1);
                Advance::Next { released: None }
            }
            LoopMode::Track => Advance::Next { released: None },
        }
    }

    /// Summaries of the whole queue, now-playing first.
    pub fn summaries(&self) -> Vec<TrackSummary> {
        self.queue.iter().map(Track::summary).collect()
    }

    /// Seconds the clock would report for a relative jump, before seek validation.
    pub fn relative_target(&self, now: Instant, delta: i64) -> Option<u64> {
        let current = self.current()?;
        let pos = self.position(now) as i64;
        let target = (pos + delta).max(0) as u64;
        Some(match current.duration {
            Some(duration) if delta > 0 => target.min(duration),
            _ => target,
        })
    }
}
