//! Yone Core - the per-guild music queue engine.
//!
//! This crate owns everything between a chat command and the voice socket:
//! one [`SessionHandle`] per guild, a player loop that drains its queue
//! through a voice transport, an interactive queue panel, and supervision
//! of flaky voice connections. Chat front-ends drive it through
//! [`MusicEngine`].
//!
//! # Architecture
//!
//! - [`engine`]: The coordinator front-ends call into
//! - [`session`]: Queue state, loop/seek policy and the session registry
//! - [`player`]: The per-session playback loop
//! - [`control`]: Authorization and application of control actions
//! - [`display`]: Queue panel rendering and the progress refresher
//! - [`resolver`]: References and uploads to playable tracks
//! - [`transport`]: Voice connections, cooldowns and reconnects
//! - [`events`]: Observable engine events
//! - [`api`]: Read-only status API
//!
//! # Abstraction Traits
//!
//! The platform plugs in through a handful of traits:
//!
//! - [`VoiceGateway`](transport::VoiceGateway) / [`TransportHandle`](transport::TransportHandle): Voice connections and playback
//! - [`ChannelSink`](display::ChannelSink): Posting panels and notices to a text channel
//! - [`TrackResolver`](resolver::TrackResolver): Resolving references
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//! - [`EventEmitter`](events::EventEmitter): Emitting domain events

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod control;
pub mod display;
pub mod engine;
pub mod error;
pub mod events;
pub mod player;
pub mod protocol_constants;
pub mod resolver;
pub mod runtime;
pub mod session;
pub mod state;
pub mod track;
pub mod transport;
pub mod types;
pub mod utils;

// Re-export commonly used types at the crate root
pub use control::{parse_seek_time, ControlAction, ControlOrigin, ControlOutcome};
pub use display::{ArtifactHandle, ChannelSink, PanelView, RemoveButton};
pub use engine::{AddOutcome, AddRequest, EngineDeps, MusicEngine, OrderPolicy, PresenceUpdate};
pub use error::{
    ControlError, ControlResult, DisplayError, DisplayResult, ErrorCode, ResolveError, ResolveResult,
    TransportError, TransportResult, YoneError, YoneResult,
};
pub use events::{
    BroadcastEvent, BroadcastEventBridge, EventEmitter, SessionEvent, TeardownReason, TransportEvent,
};
pub use resolver::{split_by_commas, Attachment, AttachmentSource, TrackResolver, YtDlpResolver};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use session::{LoopMode, SessionHandle, SessionSnapshot};
pub use state::Config;
pub use track::{FsJanitor, Track, TrackJanitor, TrackSummary};
pub use transport::{
    LinkClosed, PlaybackCompletion, PlaybackEnd, PlaybackNotifier, StartOptions, TransportHandle,
    VoiceConnection, VoiceGateway, VoiceLink,
};
pub use types::{ChannelId, GuildId, UserId};
pub use utils::now_millis;

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, bootstrap_with_resolver, BootstrappedServices};

// Re-export API types
pub use api::{start_server, AppState, ServerError};
