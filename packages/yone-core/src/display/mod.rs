//! Queue panel display.
//!
//! The engine never talks to a chat client directly. It renders a
//! [`PanelView`] and hands it to a [`ChannelSink`], which turns it into
//! whatever the platform shows (an embed with buttons, console text).
//! Sink failures are never fatal.

mod render;
mod sync;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

pub use render::{fmt_time, fmt_time_jp, make_bar, num_emoji, PanelView, RemoveButton};
pub use sync::DisplaySynchronizer;

use crate::error::DisplayResult;

/// Opaque reference to a message the sink created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ArtifactHandle(pub u64);

/// Text channel a session reports to.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    /// Posts a new panel and returns a handle for later edits.
    async fn send_panel(&self, view: &PanelView) -> DisplayResult<ArtifactHandle>;

    /// Replaces an existing panel's content.
    async fn edit_panel(&self, handle: ArtifactHandle, view: &PanelView) -> DisplayResult<()>;

    /// Deletes a panel.
    async fn delete(&self, handle: ArtifactHandle) -> DisplayResult<()>;

    /// Posts a plain notice. With a `ttl` the notice removes itself afterwards.
    async fn notify(&self, text: &str, ttl: Option<Duration>) -> DisplayResult<()>;
}
