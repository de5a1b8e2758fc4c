//! HTTP routes
//!
//! Room creation, the room page, and the embedded front-end assets. The
//! WebSocket endpoint lives in `ws`; everything here is plain HTTP.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::ws::ws_handler;
use crate::room::RoomRegistry;
use crate::video;

const INDEX_HTML: &str = include_str!("../../assets/index.html");
const ROOM_HTML: &str = include_str!("../../assets/room.html");
const ROOM_JS: &str = include_str!("../../assets/room.js");

/// Shared state passed to all handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
}

/// User-visible rejections at the HTTP boundary
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("room ID is not a valid UUID")]
    InvalidRoomId,

    #[error("room not found")]
    RoomNotFound,

    #[error("room is full")]
    RoomFull,

    #[error("video URL is incorrect")]
    InvalidVideoUrl,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::RoomNotFound => StatusCode::NOT_FOUND,
            ApiError::InvalidRoomId | ApiError::RoomFull | ApiError::InvalidVideoUrl => {
                StatusCode::BAD_REQUEST
            }
        };
        (status, self.to_string()).into_response()
    }
}

/// Body of POST /rooms
#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    #[serde(rename = "videoURL")]
    pub video_url: String,
}

/// Response of POST /rooms: the shareable room path
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRoomResponse {
    pub pathname: String,
}

/// Build the router with all routes
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route("/assets/room.js", get(room_script))
        .route("/rooms", post(create_room))
        .route("/rooms/{id}", get(room_page))
        .route("/ws/{id}", get(ws_handler))
        .with_state(state)
}

async fn index_page() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn room_script() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/javascript")], ROOM_JS)
}

/// POST /rooms — start a session: validate the pasted video URL, create a
/// room, and return the shareable path.
async fn create_room(
    State(state): State<AppState>,
    Json(body): Json<CreateRoomRequest>,
) -> Result<Json<CreateRoomResponse>, ApiError> {
    let video_id = video::extract_video_id(&body.video_url).ok_or(ApiError::InvalidVideoUrl)?;
    let id = state.registry.create().await;
    Ok(Json(CreateRoomResponse {
        pathname: format!("/rooms/{}?videoid={}", id, video_id),
    }))
}

#[derive(Debug, Deserialize)]
struct RoomPageQuery {
    #[serde(default)]
    videoid: String,
}

/// GET /rooms/{id} — the room page for an existing, non-full room
async fn room_page(
    Path(id): Path<String>,
    Query(query): Query<RoomPageQuery>,
    State(state): State<AppState>,
) -> Result<Html<String>, ApiError> {
    let room_id = Uuid::parse_str(&id).map_err(|_| ApiError::InvalidRoomId)?;
    match state.registry.occupancy(room_id).await {
        None => Err(ApiError::RoomNotFound),
        Some(2) => Err(ApiError::RoomFull),
        Some(_) => Ok(Html(render_room_page(&query.videoid))),
    }
}

/// Substitute the video ID into the room page template. The ID arrives from
/// the client's query string, so it is re-filtered to the video-ID charset
/// before landing in markup.
fn render_room_page(video_id: &str) -> String {
    let safe: String = video_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    ROOM_HTML.replace("{{VIDEO_ID}}", &safe)
}
