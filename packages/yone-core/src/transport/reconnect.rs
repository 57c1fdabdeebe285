//! Supervision of a live voice socket.
//!
//! The supervisor waits for the socket to close, classifies the close reason
//! and either resumes, reconnects with backoff, records a cooldown, or gives
//! the connection up. It runs until the connection is lost for good or its
//! cancellation token fires (explicit disconnect).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::backoff::ExponentialBackoff;
use super::connector::CooldownRegistry;
use super::{LinkClosed, VoiceLink};
use crate::events::{EventEmitter, TransportEvent};
use crate::protocol_constants::{
    CLOSE_ENDPOINT_REJECTING, CLOSE_FORCED_DISCONNECT, CLOSE_NORMAL, CLOSE_VOICE_SERVER_CRASHED,
};
use crate::state::TransportConfig;
use crate::types::GuildId;
use crate::utils::now_millis;

/// What to do about a closed socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Disconnect without retrying.
    Terminate,
    /// Try one resume at the same endpoint, else disconnect.
    ResumeOnce,
    /// Record a cooldown for the guild and disconnect.
    Cooldown,
    /// Sleep with backoff and reconnect the socket.
    Backoff,
}

/// Maps a close reason to the supervisor's response.
pub fn classify_close(closed: LinkClosed, reconnect: bool) -> CloseAction {
    match closed {
        LinkClosed::Code(CLOSE_NORMAL | CLOSE_VOICE_SERVER_CRASHED) => CloseAction::Terminate,
        LinkClosed::Code(CLOSE_FORCED_DISCONNECT) => CloseAction::ResumeOnce,
        LinkClosed::Code(CLOSE_ENDPOINT_REJECTING) => CloseAction::Cooldown,
        _ if reconnect => CloseAction::Backoff,
        _ => CloseAction::Terminate,
    }
}

/// How a supervisor run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// The connection was disconnected on purpose.
    Cancelled,
    /// The socket closed and was not (or could not be) resumed.
    Closed(Option<u16>),
    /// The endpoint rejected the guild; a cooldown was recorded.
    Cooldown,
    /// Reconnecting failed too many times in a row.
    GaveUp(Option<u16>),
}

impl SupervisorExit {
    /// Close code to report, when there is one.
    pub fn code(self) -> Option<u16> {
        match self {
            Self::Closed(code) | Self::GaveUp(code) => code,
            Self::Cooldown => Some(CLOSE_ENDPOINT_REJECTING),
            Self::Cancelled => None,
        }
    }
}

fn code_of(closed: LinkClosed) -> Option<u16> {
    match closed {
        LinkClosed::Code(code) => Some(code),
        LinkClosed::Timeout => None,
    }
}

/// Watches one voice socket for its whole lifetime.
pub struct ReconnectSupervisor {
    guild: GuildId,
    link: Box<dyn VoiceLink>,
    config: TransportConfig,
    cooldowns: Arc<CooldownRegistry>,
    emitter: Arc<dyn EventEmitter>,
    backoff: ExponentialBackoff,
}

impl ReconnectSupervisor {
    pub fn new(
        guild: GuildId,
        link: Box<dyn VoiceLink>,
        config: TransportConfig,
        cooldowns: Arc<CooldownRegistry>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        let backoff = ExponentialBackoff::from_config(&config);
        Self {
            guild,
            link,
            config,
            cooldowns,
            emitter,
            backoff,
        }
    }

    /// Supervises the socket until it is lost or `token` is cancelled.
    pub async fn run(mut self, token: CancellationToken) -> SupervisorExit {
        loop {
            let closed = tokio::select! {
                _ = token.cancelled() => {
                    self.link.disconnect().await;
                    return SupervisorExit::Cancelled;
                }
                closed = self.link.closed() => closed,
            };

            match classify_close(closed, self.config.reconnect) {
                CloseAction::Terminate => {
                    log::info!(
                        "[Reconnect] Guild {} voice closed ({:?}), disconnecting",
                        self.guild,
                        closed
                    );
                    self.link.disconnect().await;
                    return SupervisorExit::Closed(code_of(closed));
                }
                CloseAction::ResumeOnce => {
                    log::info!(
                        "[Reconnect] Guild {} disconnected by force, attempting resume",
                        self.guild
                    );
                    if self.link.potential_reconnect().await {
                        continue;
                    }
                    log::info!("[Reconnect] Guild {} resume failed, disconnecting", self.guild);
                    self.link.disconnect().await;
                    return SupervisorExit::Closed(code_of(closed));
                }
                CloseAction::Cooldown => {
                    self.cooldowns.record(self.guild);
                    log::warn!(
                        "[Reconnect] Guild {} endpoint rejecting, suppressing connects for {}s",
                        self.guild,
                        self.config.cooldown_secs
                    );
                    self.emitter.emit_transport(TransportEvent::CooldownStarted {
                        guild_id: self.guild,
                        duration_secs: self.config.cooldown_secs,
                        timestamp: now_millis(),
                    });
                    self.link.disconnect().await;
                    return SupervisorExit::Cooldown;
                }
                CloseAction::Backoff => {
                    if let Some(exit) = self.reconnect_with_backoff(closed, &token).await {
                        return exit;
                    }
                }
            }
        }
    }

    /// Retries the socket until it comes back. Returns an exit if the
    /// supervisor should stop instead.
    async fn reconnect_with_backoff(
        &mut self,
        closed: LinkClosed,
        token: &CancellationToken,
    ) -> Option<SupervisorExit> {
        let mut failures = 0u32;
        loop {
            let delay = self.backoff.next_delay();
            let attempt = failures + 1;
            log::warn!(
                "[Reconnect] Guild {} voice dropped ({:?}), reconnecting in {:.2}s (attempt {})",
                self.guild,
                closed,
                delay.as_secs_f64(),
                attempt
            );
            self.emitter.emit_transport(TransportEvent::Reconnecting {
                guild_id: self.guild,
                code: code_of(closed),
                attempt,
                delay_ms: delay.as_millis() as u64,
                timestamp: now_millis(),
            });

            tokio::select! {
                _ = token.cancelled() => {
                    self.link.disconnect().await;
                    return Some(SupervisorExit::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }

            match tokio::time::timeout(self.config.connect_timeout(), self.link.reconnect()).await {
                Ok(Ok(())) => {
                    log::info!("[Reconnect] Guild {} voice reconnected", self.guild);
                    self.backoff.reset();
                    return None;
                }
                Ok(Err(e)) => log::warn!("[Reconnect] Guild {} reconnect failed: {}", self.guild, e),
                Err(_) => log::warn!(
                    "[Reconnect] Guild {} could not connect within {}s, retrying",
                    self.guild,
                    self.config.connect_timeout_secs
                ),
            }

            failures += 1;
            if failures >= self.config.max_reconnect_failures {
                log::error!(
                    "[Reconnect] Guild {} giving up after {} failed reconnects",
                    self.guild,
                    failures
                );
                self.link.disconnect().await;
                return Some(SupervisorExit::GaveUp(code_of(closed)));
            }
        }
    }
}
