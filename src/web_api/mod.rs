//! WebAPI - HTTP and WebSocket Endpoints
//!
//! ## Responsibilities
//!
//! - REST routes for health, session inspection and session stop
//! - The per-camera video WebSocket: binary frames in, annotated JPEG
//!   preview frames out
//! - Request validation and response formatting
//!
//! The WebSocket halves are wrapped as `FrameSource`/`FrameSink` so the
//! session pipeline stays transport-agnostic.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::error::{Error, Result};
use crate::models::CameraInfo;
use crate::session::{FrameSink, FrameSource, SessionOrchestrator};
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/:camera_id/stop", post(stop_session))
        .route("/api/events", get(list_events))
        .route("/ws/video", get(video_socket_handler))
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_sessions": state.registry.count().await,
    }))
}

async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.list().await)
}

async fn stop_session(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.registry.stop(&camera_id).await?;
    Ok(Json(json!({ "stopped": camera_id })))
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    camera_id: Option<String>,
    #[serde(default = "default_event_limit")]
    limit: usize,
}

fn default_event_limit() -> usize {
    100
}

async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    let events = match &query.camera_id {
        Some(camera_id) => state.event_log.by_camera(camera_id, query.limit).await,
        None => state.event_log.latest(query.limit).await,
    };
    Json(events)
}

#[derive(Debug, Deserialize)]
struct VideoSocketQuery {
    cam_id: String,
    camera_name: Option<String>,
    room: Option<String>,
}

/// Camera video WebSocket
///
/// A duplicate connection for a camera that already has a live session is
/// rejected before the upgrade completes.
async fn video_socket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<VideoSocketQuery>,
) -> Result<Response> {
    if query.cam_id.trim().is_empty() {
        return Err(Error::Validation("cam_id must not be empty".into()));
    }
    let camera = CameraInfo::with_names(
        query.cam_id.clone(),
        query.camera_name.unwrap_or(query.cam_id),
        query.room,
    );

    let session = state.registry.create(camera, &state.config).await?;
    Ok(ws.on_upgrade(move |socket| handle_video_socket(socket, state, session)))
}

async fn handle_video_socket(
    socket: WebSocket,
    state: AppState,
    session: std::sync::Arc<crate::session::Session>,
) {
    tracing::info!(
        camera_id = %session.camera.camera_id,
        "Camera WebSocket connected"
    );
    let (sender, receiver) = socket.split();

    let orchestrator = SessionOrchestrator::new(
        session,
        state.registry.clone(),
        state.detector.clone(),
        state.events.clone(),
        state.encoder_factory.clone(),
        state.config.clone(),
    );
    orchestrator
        .run(
            Box::new(WsFrameSource { receiver }),
            Box::new(WsFrameSink { sender }),
        )
        .await;
}

/// Receive half of the camera WebSocket as a pipeline frame source
struct WsFrameSource {
    receiver: SplitStream<WebSocket>,
}

#[async_trait::async_trait]
impl FrameSource for WsFrameSource {
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            match self.receiver.next().await {
                Some(Ok(Message::Binary(bytes))) => return Ok(Some(bytes)),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // Pong is handled by axum; text and ping carry no frames
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(Error::Internal(format!("websocket receive: {}", e)))
                }
            }
        }
    }
}

/// Send half of the camera WebSocket as the preview frame sink
struct WsFrameSink {
    sender: SplitSink<WebSocket, Message>,
}

#[async_trait::async_trait]
impl FrameSink for WsFrameSink {
    async fn send_frame(&mut self, jpeg: Vec<u8>) -> Result<()> {
        self.sender
            .send(Message::Binary(jpeg))
            .await
            .map_err(|e| Error::Internal(format!("websocket send: {}", e)))
    }
}
