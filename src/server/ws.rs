//! Server runtime and WebSocket admission
//!
//! Hosts the HTTP + WebSocket app on a single port and admits upgraded
//! connections into room slots before handing them to the relay loop.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use uuid::Uuid;

use super::routes::{router, AppState};
use crate::room::{run_relay, JoinError, RoomRegistry};

/// Close codes sent when the post-upgrade join loses a race with another
/// connection or a teardown.
const CLOSE_ROOM_NOT_FOUND: u16 = 1011;
const CLOSE_ROOM_FULL: u16 = 1008;

/// Configuration for the server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(bind: String, port: u16) -> Self {
        Self { bind, port }
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// HTTP + WebSocket server pairing browsers into sync rooms
pub struct SyncServer {
    config: ServerConfig,
    registry: Arc<RoomRegistry>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SyncServer {
    /// Create a new server
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            registry: Arc::new(RoomRegistry::new()),
            shutdown_tx,
        }
    }

    /// Trigger server shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Run the server until a shutdown signal is received.
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(&addr).await?;
        info!("Server listening on http://{}", addr);

        let app = router(AppState {
            registry: Arc::clone(&self.registry),
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Shutdown signal received, stopping server");
            })
            .await?;

        let room_count = self.registry.room_count().await;
        if room_count > 0 {
            info!("{} rooms still active at shutdown", room_count);
        }
        Ok(())
    }
}

/// GET /ws/{id} — upgrade and attach to a room slot
pub async fn ws_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    let Ok(room_id) = Uuid::parse_str(&id) else {
        return (StatusCode::BAD_REQUEST, "room ID is not a valid UUID").into_response();
    };

    // Courtesy checks before the upgrade; the join after the upgrade is the
    // authoritative admission.
    match state.registry.occupancy(room_id).await {
        None => {
            return (StatusCode::INTERNAL_SERVER_ERROR, "room does not exist").into_response()
        }
        Some(2) => return (StatusCode::BAD_REQUEST, "room is full").into_response(),
        Some(_) => {}
    }

    let registry = Arc::clone(&state.registry);
    ws.on_upgrade(move |socket| admit(socket, registry, room_id))
}

/// Claim a slot for the upgraded connection and run the relay loop, or close
/// immediately when no slot can be claimed.
async fn admit(mut socket: WebSocket, registry: Arc<RoomRegistry>, room_id: Uuid) {
    let (tx, rx) = mpsc::unbounded_channel();
    let slot = match registry.join(room_id, tx).await {
        Ok(slot) => slot,
        Err(e) => {
            let code = match e {
                JoinError::NotFound => CLOSE_ROOM_NOT_FOUND,
                JoinError::RoomFull => CLOSE_ROOM_FULL,
            };
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code,
                    reason: e.to_string().into(),
                })))
                .await;
            return;
        }
    };

    info!("Connection admitted to room {} at slot {}", room_id, slot);
    run_relay(registry, room_id, slot, socket, rx).await;
}
