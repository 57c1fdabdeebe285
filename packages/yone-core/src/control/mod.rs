//! Control surface: the user-facing mutations of a live session.
//!
//! Every action is a [`ControlAction`] variant and goes through
//! [`ControlSurface::apply`], which checks authorization and mutates the
//! session in one critical section. Side effects on the transport (stop,
//! pause, resume) and the panel refresh happen after the lock is released.
//! A rejected action never changes state.

mod seek;

use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;

pub use seek::parse_seek_time;

use crate::display::{fmt_time_jp, DisplaySynchronizer};
use crate::error::{ControlError, ControlResult};
use crate::events::{EventEmitter, SessionEvent};
use crate::session::{LoopMode, Session, SessionHandle};
use crate::track::Track;
use crate::types::UserId;
use crate::utils::now_millis;

// ─────────────────────────────────────────────────────────────────────────────
// Actions
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a user can do to a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    Skip,
    Shuffle,
    TogglePause,
    CycleLoop,
    ToggleAutoLeave,
    /// Remove one Up Next entry (1-based), as sent by a panel button.
    RemoveAt(usize),
    /// Remove several Up Next entries (1-based).
    Remove(Vec<usize>),
    /// Keep only these Up Next entries (1-based).
    Keep(Vec<usize>),
    /// Restart the current track at an absolute offset in seconds.
    Seek(u64),
    /// Jump back; `None` uses the configured default step.
    Rewind(Option<u64>),
    /// Jump ahead; `None` uses the configured default step.
    Forward(Option<u64>),
}

impl ControlAction {
    fn mutates_queue(&self) -> bool {
        matches!(
            self,
            Self::Shuffle | Self::RemoveAt(_) | Self::Remove(_) | Self::Keep(_)
        )
    }
}

/// Where an action came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOrigin {
    /// A button on a panel; only the panel owner may press it.
    Panel(UserId),
    /// A typed command; anyone in the guild may issue it.
    Command(UserId),
}

impl ControlOrigin {
    pub fn user(self) -> UserId {
        match self {
            Self::Panel(user) | Self::Command(user) => user,
        }
    }
}

/// What an accepted action did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlOutcome {
    Skipped,
    Shuffled { count: usize },
    Paused,
    Resumed,
    LoopChanged { mode: LoopMode },
    AutoLeaveChanged { enabled: bool },
    Removed { titles: Vec<String> },
    Kept { removed: usize },
    Seeking { target: u64 },
}

impl ControlOutcome {
    /// Short confirmation shown to the user.
    pub fn notice(&self) -> String {
        match self {
            Self::Skipped => "⏭ Skipped".to_string(),
            Self::Shuffled { count } => format!("🔀 Shuffled {count} track(s)"),
            Self::Paused => "⏸ Paused".to_string(),
            Self::Resumed => "▶️ Resumed".to_string(),
            Self::LoopChanged { mode } => format!("🔁 Loop: {}", mode.label()),
            Self::AutoLeaveChanged { enabled } => {
                format!("🚪 Auto Leave: {}", if *enabled { "ON" } else { "OFF" })
            }
            Self::Removed { titles } => match titles.as_slice() {
                [title] => format!("🗑 Removed **{title}**"),
                _ => format!("🗑 Removed {} tracks", titles.len()),
            },
            Self::Kept { removed } => format!("✂️ Kept the selection, removed {removed} track(s)"),
            Self::Seeking { target } => format!("{}から再生します", fmt_time_jp(*target)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Surface
// ─────────────────────────────────────────────────────────────────────────────

/// Transport call to make once the session lock is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    None,
    Stop,
    Pause,
    Resume,
}

struct Applied {
    outcome: ControlOutcome,
    released: Vec<Track>,
    effect: Effect,
}

impl Applied {
    fn state(outcome: ControlOutcome) -> Self {
        Self {
            outcome,
            released: Vec::new(),
            effect: Effect::None,
        }
    }
}

/// Applies control actions to sessions.
pub struct ControlSurface {
    display: DisplaySynchronizer,
    emitter: Arc<dyn EventEmitter>,
    default_step: u64,
}

impl ControlSurface {
    pub fn new(display: DisplaySynchronizer, emitter: Arc<dyn EventEmitter>, default_step: u64) -> Self {
        Self {
            display,
            emitter,
            default_step,
        }
    }

    /// Authorizes and applies `action`, then refreshes the panel.
    pub async fn apply(
        &self,
        session: &Arc<SessionHandle>,
        origin: ControlOrigin,
        action: ControlAction,
    ) -> ControlResult<ControlOutcome> {
        let transport = session.transport();
        let playing = transport.is_playing();
        let paused = transport.is_paused();
        let connected = transport.is_connected();
        let now = Instant::now();

        let (applied, length) = session.with(|s| {
            authorize(s, origin)?;
            let applied = self.mutate(s, &action, now, TransportState { playing, paused, connected })?;
            Ok::<_, ControlError>((applied, s.len()))
        })
        .map_err(|e| {
            log::debug!("[Control] Guild {} rejected {:?}: {}", session.guild(), action, e);
            e
        })?;

        match applied.effect {
            Effect::Stop => transport.stop(),
            Effect::Pause => {
                transport.pause();
            }
            Effect::Resume => {
                transport.resume();
            }
            Effect::None => {}
        }

        let released = session.release(applied.released);
        log::info!(
            "[Control] Guild {} {:?} by {} -> {:?} (released {})",
            session.guild(),
            action,
            origin.user(),
            applied.outcome,
            released
        );

        if action.mutates_queue() {
            self.emitter.emit_session(SessionEvent::QueueChanged {
                guild_id: session.guild(),
                length,
                timestamp: now_millis(),
            });
        }
        self.display.refresh(session).await;
        Ok(applied.outcome)
    }

    fn mutate(
        &self,
        s: &mut Session,
        action: &ControlAction,
        now: Instant,
        transport: TransportState,
    ) -> ControlResult<Applied> {
        let applied = match action {
            ControlAction::Skip => {
                if !transport.active() {
                    return Err(ControlError::NothingPlaying);
                }
                s.request_skip();
                Applied {
                    effect: Effect::Stop,
                    ..Applied::state(ControlOutcome::Skipped)
                }
            }
            ControlAction::Shuffle => {
                s.shuffle_up_next(&mut rand::thread_rng());
                Applied::state(ControlOutcome::Shuffled {
                    count: s.up_next_len(),
                })
            }
            ControlAction::TogglePause => {
                if transport.playing {
                    s.pause_clock(now);
                    Applied {
                        effect: Effect::Pause,
                        ..Applied::state(ControlOutcome::Paused)
                    }
                } else if transport.paused {
                    s.resume_clock(now);
                    Applied {
                        effect: Effect::Resume,
                        ..Applied::state(ControlOutcome::Resumed)
                    }
                } else {
                    return Err(ControlError::NothingPlaying);
                }
            }
            ControlAction::CycleLoop => Applied::state(ControlOutcome::LoopChanged {
                mode: s.cycle_loop(),
            }),
            ControlAction::ToggleAutoLeave => Applied::state(ControlOutcome::AutoLeaveChanged {
                enabled: s.toggle_auto_leave(),
            }),
            ControlAction::RemoveAt(index) => {
                let track = s.remove_at(*index)?;
                Applied {
                    outcome: ControlOutcome::Removed {
                        titles: vec![track.title.clone()],
                    },
                    released: vec![track],
                    effect: Effect::None,
                }
            }
            ControlAction::Remove(indices) => {
                let removed = s.remove_up_next(indices)?;
                Applied {
                    outcome: ControlOutcome::Removed {
                        titles: removed.iter().map(|t| t.title.clone()).collect(),
                    },
                    released: removed,
                    effect: Effect::None,
                }
            }
            ControlAction::Keep(indices) => {
                let removed = s.keep_up_next(indices)?;
                Applied {
                    outcome: ControlOutcome::Kept {
                        removed: removed.len(),
                    },
                    released: removed,
                    effect: Effect::None,
                }
            }
            ControlAction::Seek(offset) => seek_to(s, *offset, transport)?,
            ControlAction::Rewind(step) => {
                let step = step.unwrap_or(self.default_step) as i64;
                let target = s
                    .relative_target(now, -step)
                    .ok_or(ControlError::NothingPlaying)?;
                seek_to(s, target, transport)?
            }
            ControlAction::Forward(step) => {
                let step = step.unwrap_or(self.default_step) as i64;
                let target = s
                    .relative_target(now, step)
                    .ok_or(ControlError::NothingPlaying)?;
                seek_to(s, target, transport)?
            }
        };
        Ok(applied)
    }
}

#[derive(Debug, Clone, Copy)]
struct TransportState {
    playing: bool,
    paused: bool,
    connected: bool,
}

impl TransportState {
    fn active(self) -> bool {
        self.playing || self.paused
    }
}

fn authorize(s: &Session, origin: ControlOrigin) -> ControlResult<()> {
    match origin {
        ControlOrigin::Panel(user) if s.panel_owner() != Some(user) => Err(ControlError::NotPanelOwner),
        _ => Ok(()),
    }
}

fn seek_to(s: &mut Session, target: u64, transport: TransportState) -> ControlResult<Applied> {
    if !transport.connected {
        return Err(ControlError::NothingPlaying);
    }
    s.request_seek(target)?;
    Ok(Applied {
        effect: Effect::Stop,
        ..Applied::state(ControlOutcome::Seeking { target })
    })
}
