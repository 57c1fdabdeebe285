//! Per-guild connection establishment.
//!
//! [`TransportConnector`] is the only way the engine obtains a transport.
//! Establishment is serialized per guild with an async mutex so concurrent
//! joiners share one underlying attempt; everything else about a connection
//! is plain synchronous state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::reconnect::{ReconnectSupervisor, SupervisorExit};
use super::{PlaybackCompletion, StartOptions, TransportHandle, VoiceGateway};
use crate::error::{TransportError, TransportResult};
use crate::events::{EventEmitter, TransportEvent};
use crate::protocol_constants::CLOSE_ENDPOINT_REJECTING;
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::state::TransportConfig;
use crate::track::TrackSummary;
use crate::types::{ChannelId, GuildId};
use crate::utils::now_millis;

// ─────────────────────────────────────────────────────────────────────────────
// Cooldowns
// ─────────────────────────────────────────────────────────────────────────────

/// Per-guild suppression window after an endpoint rejection.
pub struct CooldownRegistry {
    rejected_at: DashMap<GuildId, Instant>,
    window: Duration,
}

impl CooldownRegistry {
    pub fn new(window: Duration) -> Self {
        Self {
            rejected_at: DashMap::new(),
            window,
        }
    }

    /// Starts (or restarts) the window for a guild.
    pub fn record(&self, guild: GuildId) {
        self.rejected_at.insert(guild, Instant::now());
    }

    /// Time left in the guild's window, if any. Expired entries are dropped.
    pub fn remaining(&self, guild: GuildId) -> Option<Duration> {
        let elapsed = self.rejected_at.get(&guild)?.elapsed();
        if elapsed < self.window {
            Some(self.window - elapsed)
        } else {
            self.rejected_at.remove_if(&guild, |_, at| at.elapsed() >= self.window);
            None
        }
    }
}

/// Notification that a guild's transport was lost without being asked to disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportLost {
    pub guild: GuildId,
    pub code: Option<u16>,
}

type LiveMap = DashMap<GuildId, Arc<ManagedTransport>>;

// ─────────────────────────────────────────────────────────────────────────────
// Managed Transport
// ─────────────────────────────────────────────────────────────────────────────

/// A live connection registered with the connector.
///
/// Disconnecting cancels the reconnect supervisor and unregisters the
/// connection before disconnecting the platform handle.
struct ManagedTransport {
    guild: GuildId,
    inner: Arc<dyn TransportHandle>,
    supervisor: CancellationToken,
    closed: AtomicBool,
    live: Weak<LiveMap>,
}

impl ManagedTransport {
    fn unregister(&self) {
        if let Some(live) = self.live.upgrade() {
            live.remove_if(&self.guild, |_, entry| std::ptr::eq(entry.as_ref(), self));
        }
    }
}

#[async_trait]
impl TransportHandle for ManagedTransport {
    fn channel(&self) -> Option<ChannelId> {
        self.inner.channel()
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.inner.is_connected()
    }

    fn is_playing(&self) -> bool {
        self.inner.is_playing()
    }

    fn is_paused(&self) -> bool {
        self.inner.is_paused()
    }

    fn play(&self, track: &TrackSummary, options: &StartOptions) -> TransportResult<PlaybackCompletion> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.inner.play(track, options)
    }

    fn stop(&self) {
        self.inner.stop();
    }

    fn pause(&self) -> bool {
        self.inner.pause()
    }

    fn resume(&self) -> bool {
        self.inner.resume()
    }

    async fn move_to(&self, channel: ChannelId) -> TransportResult<()> {
        self.inner.move_to(channel).await
    }

    async fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.supervisor.cancel();
        self.unregister();
        self.inner.disconnect().await;
        log::info!("[Transport] Guild {} disconnected", self.guild);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connector
// ─────────────────────────────────────────────────────────────────────────────

/// Opens, reuses and supervises voice connections.
pub struct TransportConnector {
    gateway: Arc<dyn VoiceGateway>,
    config: TransportConfig,
    cooldowns: Arc<CooldownRegistry>,
    locks: DashMap<GuildId, Arc<AsyncMutex<()>>>,
    live: Arc<LiveMap>,
    emitter: Arc<dyn EventEmitter>,
    spawner: TokioSpawner,
    lost_tx: mpsc::UnboundedSender<TransportLost>,
}

impl TransportConnector {
    /// Creates a connector plus the receiver of unrequested connection losses.
    pub fn new(
        gateway: Arc<dyn VoiceGateway>,
        config: TransportConfig,
        emitter: Arc<dyn EventEmitter>,
        spawner: TokioSpawner,
    ) -> (Self, mpsc::UnboundedReceiver<TransportLost>) {
        let (lost_tx, lost_rx) = mpsc::unbounded_channel();
        let cooldowns = Arc::new(CooldownRegistry::new(config.cooldown()));
        let connector = Self {
            gateway,
            config,
            cooldowns,
            locks: DashMap::new(),
            live: Arc::new(DashMap::new()),
            emitter,
            spawner,
            lost_tx,
        };
        (connector, lost_rx)
    }

    pub fn cooldowns(&self) -> &CooldownRegistry {
        &self.cooldowns
    }

    /// Returns the guild's live, connected transport.
    pub fn current(&self, guild: GuildId) -> Option<Arc<dyn TransportHandle>> {
        let entry = self.live.get(&guild)?;
        let handle = entry.value().clone();
        drop(entry);
        if handle.is_connected() {
            Some(handle)
        } else {
            None
        }
    }

    /// Number of registered connections.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Returns a connected transport in `channel`, connecting or moving as needed.
    ///
    /// Refused while the guild is cooling down. Concurrent callers for one
    /// guild wait for the first attempt and reuse its handle.
    pub async fn connect(
        &self,
        guild: GuildId,
        channel: ChannelId,
    ) -> TransportResult<Arc<dyn TransportHandle>> {
        self.check_cooldown(guild)?;

        if let Some(handle) = self.current(guild) {
            return self.ensure_channel(guild, handle, channel).await;
        }

        let lock = self.locks.entry(guild).or_default().clone();
        let _guard = lock.lock().await;

        // Someone else may have connected while we waited.
        if let Some(handle) = self.current(guild) {
            return self.ensure_channel(guild, handle, channel).await;
        }
        self.check_cooldown(guild)?;

        log::info!("[Transport] Connecting guild {} to channel {}", guild, channel);
        let connection =
            match tokio::time::timeout(self.config.connect_timeout(), self.gateway.connect(guild, channel))
                .await
            {
                Err(_) => {
                    log::warn!(
                        "[Transport] Guild {} connect timed out after {}s",
                        guild,
                        self.config.connect_timeout_secs
                    );
                    return Err(TransportError::Timeout(self.config.connect_timeout_secs));
                }
                Ok(Err(TransportError::Closed(CLOSE_ENDPOINT_REJECTING))) => {
                    self.cooldowns.record(guild);
                    log::warn!(
                        "[Transport] Guild {} endpoint rejecting, suppressing connects for {}s",
                        guild,
                        self.config.cooldown_secs
                    );
                    self.emitter.emit_transport(TransportEvent::CooldownStarted {
                        guild_id: guild,
                        duration_secs: self.config.cooldown_secs,
                        timestamp: now_millis(),
                    });
                    return Err(TransportError::Closed(CLOSE_ENDPOINT_REJECTING));
                }
                Ok(Err(e)) => {
                    log::warn!("[Transport] Guild {} connect failed: {}", guild, e);
                    return Err(e);
                }
                Ok(Ok(connection)) => connection,
            };

        let token = CancellationToken::new();
        let managed = Arc::new(ManagedTransport {
            guild,
            inner: connection.handle,
            supervisor: token.clone(),
            closed: AtomicBool::new(false),
            live: Arc::downgrade(&self.live),
        });
        self.live.insert(guild, managed.clone());

        let supervisor = ReconnectSupervisor::new(
            guild,
            connection.link,
            self.config.clone(),
            self.cooldowns.clone(),
            self.emitter.clone(),
        );
        let watched = managed.clone();
        let emitter = self.emitter.clone();
        let lost_tx = self.lost_tx.clone();
        self.spawner.spawn(async move {
            let exit = supervisor.run(token).await;
            if exit == SupervisorExit::Cancelled {
                emitter.emit_transport(TransportEvent::Disconnected {
                    guild_id: guild,
                    code: None,
                    timestamp: now_millis(),
                });
                return;
            }
            watched.disconnect().await;
            emitter.emit_transport(TransportEvent::Disconnected {
                guild_id: guild,
                code: exit.code(),
                timestamp: now_millis(),
            });
            if lost_tx
                .send(TransportLost {
                    guild,
                    code: exit.code(),
                })
                .is_err()
            {
                log::debug!("[Transport] No listener for lost transport of guild {}", guild);
            }
        });

        self.emitter.emit_transport(TransportEvent::Connected {
            guild_id: guild,
            channel_id: channel,
            timestamp: now_millis(),
        });
        log::info!("[Transport] Guild {} connected to channel {}", guild, channel);
        Ok(managed)
    }

    /// Disconnects the guild's transport, if any.
    pub async fn disconnect(&self, guild: GuildId) {
        let handle = self.live.get(&guild).map(|entry| entry.value().clone());
        if let Some(handle) = handle {
            handle.disconnect().await;
        }
    }

    /// Disconnects every live transport.
    pub async fn disconnect_all(&self) {
        let handles: Vec<_> = self.live.iter().map(|entry| entry.value().clone()).collect();
        futures::future::join_all(handles.iter().map(|h| h.disconnect())).await;
    }

    fn check_cooldown(&self, guild: GuildId) -> TransportResult<()> {
        match self.cooldowns.remaining(guild) {
            Some(remaining) => {
                log::info!(
                    "[Transport] Guild {} cooling down, {}s left",
                    guild,
                    remaining.as_secs()
                );
                Err(TransportError::CoolingDown {
                    remaining_secs: remaining.as_secs().max(1),
                })
            }
            None => Ok(()),
        }
    }

    async fn ensure_channel(
        &self,
        guild: GuildId,
        handle: Arc<dyn TransportHandle>,
        channel: ChannelId,
    ) -> TransportResult<Arc<dyn TransportHandle>> {
        if handle.channel() != Some(channel) {
            log::info!("[Transport] Moving guild {} to channel {}", guild, channel);
            handle.move_to(channel).await?;
            self.emitter.emit_transport(TransportEvent::Connected {
                guild_id: guild,
                channel_id: channel,
                timestamp: now_millis(),
            });
        }
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventEmitter;
    use crate::transport::testing::{MockGateway, ScriptedLink};
    use crate::transport::LinkClosed;

    fn same(a: &Arc<dyn TransportHandle>, b: &Arc<dyn TransportHandle>) -> bool {
        Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
    }

    fn connector(gateway: Arc<MockGateway>) -> (TransportConnector, mpsc::UnboundedReceiver<TransportLost>) {
        TransportConnector::new(
            gateway,
            TransportConfig::default(),
            Arc::new(NoopEventEmitter),
            TokioSpawner::current(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_connects_share_one_attempt() {
        let gateway = MockGateway::new().with_delay(Duration::from_millis(200));
        let (connector, _lost) = connector(gateway.clone());

        let results = futures::future::join_all(
            (0..5).map(|_| connector.connect(GuildId(1), ChannelId(10))),
        )
        .await;

        assert_eq!(gateway.connects(), 1);
        let handles: Vec<_> = results.into_iter().map(Result::unwrap).collect();
        assert!(handles.iter().all(|h| same(h, &handles[0])));
    }

    #[tokio::test]
    async fn connected_guild_in_other_channel_moves() {
        let gateway = MockGateway::new();
        let (connector, _lost) = connector(gateway.clone());

        let first = connector.connect(GuildId(1), ChannelId(10)).await.unwrap();
        let second = connector.connect(GuildId(1), ChannelId(11)).await.unwrap();

        assert!(same(&first, &second));
        assert_eq!(gateway.connects(), 1);
        assert_eq!(second.channel(), Some(ChannelId(11)));
    }

    #[tokio::test]
    async fn rejection_on_connect_starts_cooldown() {
        let gateway = MockGateway::new()
            .with_failures(vec![TransportError::Closed(CLOSE_ENDPOINT_REJECTING)]);
        let (connector, _lost) = connector(gateway.clone());

        let err = connector.connect(GuildId(1), ChannelId(10)).await.err().unwrap();
        assert_eq!(err, TransportError::Closed(CLOSE_ENDPOINT_REJECTING));

        let err = connector.connect(GuildId(1), ChannelId(10)).await.err().unwrap();
        assert!(matches!(err, TransportError::CoolingDown { .. }));
        assert_eq!(gateway.connects(), 1);

        // Other guilds are unaffected.
        assert!(connector.connect(GuildId(2), ChannelId(20)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_expires_after_window() {
        let registry = CooldownRegistry::new(Duration::from_secs(60));
        registry.record(GuildId(5));
        assert!(registry.remaining(GuildId(5)).is_some());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(registry.remaining(GuildId(5)).is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(registry.remaining(GuildId(5)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_gateway_times_out() {
        let gateway = MockGateway::new().with_delay(Duration::from_secs(30));
        let (connector, _lost) = connector(gateway);

        let err = connector.connect(GuildId(1), ChannelId(10)).await.err().unwrap();
        assert_eq!(err, TransportError::Timeout(10));
        assert_eq!(connector.live_count(), 0);
    }

    #[tokio::test]
    async fn explicit_disconnect_unregisters_without_loss_notice() {
        let gateway = MockGateway::new();
        let (connector, mut lost) = connector(gateway.clone());

        let handle = connector.connect(GuildId(1), ChannelId(10)).await.unwrap();
        handle.disconnect().await;
        handle.disconnect().await;

        assert_eq!(connector.live_count(), 0);
        assert!(!handle.is_connected());
        assert_eq!(gateway.transport_disconnects(), 1);
        tokio::task::yield_now().await;
        assert!(lost.try_recv().is_err());
    }

    #[tokio::test]
    async fn socket_loss_is_reported() {
        let gateway = MockGateway::new()
            .with_link(ScriptedLink::new(vec![LinkClosed::Code(1000)]));
        let (connector, mut lost) = connector(gateway.clone());

        let handle = connector.connect(GuildId(7), ChannelId(70)).await.unwrap();
        let notice = lost.recv().await.unwrap();

        assert_eq!(notice, TransportLost { guild: GuildId(7), code: Some(1000) });
        assert!(!handle.is_connected());
        assert!(connector.current(GuildId(7)).is_none());
    }
}
