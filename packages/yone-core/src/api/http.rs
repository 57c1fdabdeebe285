//! HTTP route handlers.
//!
//! All handlers are thin - they read snapshots from the engine.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, Method},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::get,
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::AppState;
use crate::error::{YoneError, YoneResult};
use crate::events::BroadcastEvent;
use crate::protocol_constants::{APP_NAME, SSE_KEEPALIVE_SECS};
use crate::session::SessionSnapshot;
use crate::types::GuildId;

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let trusted = state.trusted_origins.clone();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let origin = origin.to_str().unwrap_or("");
            trusted.iter().any(|allowed| origin.starts_with(allowed.as_str()))
        }))
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/{guild}", get(get_session))
        .route("/api/events", get(event_stream))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": APP_NAME,
        "sessions": state.engine.store().len(),
        "connections": state.engine.connector().live_count(),
    }))
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSnapshot>> {
    Json(state.engine.snapshots())
}

async fn get_session(
    State(state): State<AppState>,
    Path(guild): Path<u64>,
) -> YoneResult<Json<SessionSnapshot>> {
    state
        .engine
        .snapshot(GuildId(guild))
        .map(Json)
        .ok_or_else(|| YoneError::SessionNotFound(guild.to_string()))
}

/// Streams engine events as server-sent events, one JSON object per event.
async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    log::debug!("[Api] Event stream client connected");
    let stream = BroadcastStream::new(state.event_bridge.subscribe()).filter_map(|result| async move {
        match result {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().event(event_name(&event)).data(json))),
                Err(e) => {
                    log::warn!("[Api] Failed to serialize event: {}", e);
                    None
                }
            },
            Err(e) => {
                log::warn!("[Api] Event stream lagged: {}", e);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(SSE_KEEPALIVE_SECS))
            .text("keep-alive"),
    )
}

fn event_name(event: &BroadcastEvent) -> &'static str {
    match event {
        BroadcastEvent::Session(_) => "session",
        BroadcastEvent::Transport(_) => "transport",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::testing::RecordingSink;
    use crate::engine::{AddRequest, EngineDeps, MusicEngine, OrderPolicy};
    use crate::error::ResolveResult;
    use crate::events::{EventEmitter, SessionEvent};
    use crate::resolver::{Attachment, TrackResolver};
    use crate::runtime::TokioSpawner;
    use crate::state::Config;
    use crate::track::{FsJanitor, Track};
    use crate::transport::testing::MockGateway;
    use crate::types::{ChannelId, UserId};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct EchoResolver;

    #[async_trait]
    impl TrackResolver for EchoResolver {
        async fn resolve(&self, reference: &str) -> ResolveResult<Vec<Track>> {
            Ok(vec![Track::remote(reference, "https://media/x", Some(60))])
        }

        async fn playlist_entries(&self, _url: &str) -> ResolveResult<Vec<String>> {
            Ok(Vec::new())
        }

        async fn resolve_attachment(&self, attachment: &Attachment) -> ResolveResult<Track> {
            Ok(Track::remote(attachment.filename.clone(), "https://cdn/x", None))
        }
    }

    fn state() -> AppState {
        let bridge = Arc::new(crate::events::BroadcastEventBridge::new(16));
        let engine = MusicEngine::new(
            Config::default(),
            EngineDeps {
                gateway: MockGateway::new(),
                resolver: Arc::new(EchoResolver),
                janitor: Arc::new(FsJanitor),
                emitter: bridge.clone(),
                spawner: TokioSpawner::current(),
            },
        );
        AppState::new(engine, bridge)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_reports_counts() {
        let (status, body) = get_json(create_router(state()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"], 0);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let (status, body) = get_json(create_router(state()), "/api/sessions/42").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "session_not_found");
    }

    #[tokio::test]
    async fn sessions_are_listed_after_a_request() {
        let state = state();
        state
            .engine
            .add_tracks(AddRequest {
                guild: GuildId(5),
                voice_channel: Some(ChannelId(1)),
                requester: UserId(1),
                references: vec!["tune".to_string()],
                attachments: Vec::new(),
                order: OrderPolicy::default(),
                sink: Arc::new(RecordingSink::default()),
            })
            .await
            .unwrap();

        let (status, body) = get_json(create_router(state.clone()), "/api/sessions").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["guildId"], 5);
        assert_eq!(body[0]["queueLength"], 1);

        let (status, body) = get_json(create_router(state), "/api/sessions/5").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connected"], true);
    }

    #[tokio::test]
    async fn bridge_feeds_event_subscribers() {
        let state = state();
        let mut rx = state.event_bridge.subscribe();
        state.event_bridge.emit_session(SessionEvent::QueueChanged {
            guild_id: GuildId(1),
            length: 3,
            timestamp: 0,
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event_name(&event), "session");
    }
}
