//! Keeps the visible panel in step with session state.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

use super::{ArtifactHandle, PanelView};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::session::SessionHandle;
use crate::types::UserId;

/// Re-renders session panels on demand and once per interval while playing.
#[derive(Clone)]
pub struct DisplaySynchronizer {
    interval: Duration,
    spawner: TokioSpawner,
}

impl DisplaySynchronizer {
    pub fn new(interval: Duration, spawner: TokioSpawner) -> Self {
        Self { interval, spawner }
    }

    /// Re-renders the session's panel, if it has one.
    ///
    /// When the transport is no longer connected the stale panel is deleted
    /// and forgotten instead. Sink failures are logged and swallowed.
    pub async fn refresh(&self, session: &SessionHandle) {
        let connected = session.transport().is_connected();
        let (panel, view) = session.with(|s| {
            if !connected {
                return (s.take_panel(), None);
            }
            let view = s.panel().map(|_| PanelView::render(s, Instant::now()));
            (s.panel(), view)
        });

        match (panel, view) {
            (Some(handle), None) => {
                log::debug!(
                    "[Display] Guild {} transport gone, removing panel",
                    session.guild()
                );
                self.delete_quietly(session, handle).await;
            }
            (Some(handle), Some(view)) => {
                if let Err(e) = session.sink().edit_panel(handle, &view).await {
                    log::debug!("[Display] Guild {} panel edit failed: {}", session.guild(), e);
                }
            }
            _ => {}
        }
    }

    /// Posts a fresh panel owned by `owner`, replacing any previous one.
    pub async fn show_panel(&self, session: &SessionHandle, owner: UserId) -> Option<ArtifactHandle> {
        let (old, view) = session.with(|s| (s.take_panel(), PanelView::render(s, Instant::now())));
        if let Some(old) = old {
            self.delete_quietly(session, old).await;
        }

        let handle = match session.sink().send_panel(&view).await {
            Ok(handle) => handle,
            Err(e) => {
                log::warn!("[Display] Guild {} panel send failed: {}", session.guild(), e);
                return None;
            }
        };

        if session.is_destroyed() {
            self.delete_quietly(session, handle).await;
            return None;
        }

        // Another caller may have posted a panel while we were sending.
        let displaced = session.with(|s| {
            let displaced = s.take_panel();
            s.set_panel(handle, owner);
            displaced
        });
        if let Some(displaced) = displaced {
            self.delete_quietly(session, displaced).await;
        }
        Some(handle)
    }

    /// Starts the periodic refresher for the track that just started.
    ///
    /// Replaces (and cancels) any refresher already running for the session.
    pub fn start_progress(&self, session: &Arc<SessionHandle>) {
        let interval = self.interval;
        let sync = self.clone();
        let target = Arc::clone(session);
        let task = self.spawner.spawn_cancellable("progress", move |token| async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => sync.refresh(&target).await,
                }
            }
        });
        session.replace_progress_task(Some(task));
    }

    /// Stops the periodic refresher.
    pub fn stop_progress(&self, session: &SessionHandle) {
        session.replace_progress_task(None);
    }

    async fn delete_quietly(&self, session: &SessionHandle, handle: ArtifactHandle) {
        if let Err(e) = session.sink().delete(handle).await {
            log::debug!("[Display] Guild {} panel delete failed: {}", session.guild(), e);
        }
    }
}
