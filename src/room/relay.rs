//! Per-connection relay loop
//!
//! Runs once per admitted connection: reads inbound frames from the socket
//! and forwards them to the other occupant of the room. A separate writer
//! task drains the slot's channel into the socket sink, so a slow or failing
//! peer write can never stall a reader. Whatever path ends the loop, the
//! slot is vacated exactly once.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{Frame, RoomRegistry};

/// Relay frames between an admitted connection and its room peer until the
/// connection closes, errors, or a forward to the peer fails.
///
/// `slot` is the index assigned by a successful join; `rx` is the receiving
/// end of the channel whose sender occupies that slot.
pub async fn run_relay(
    registry: Arc<RoomRegistry>,
    room_id: Uuid,
    slot: usize,
    socket: WebSocket,
    rx: mpsc::UnboundedReceiver<Frame>,
) {
    let (ws_sender, mut ws_receiver) = socket.split();
    tokio::spawn(write_peer_frames(ws_sender, rx));

    loop {
        let frame = match ws_receiver.next().await {
            Some(Ok(Message::Text(text))) => Frame::Text(text.to_string()),
            Some(Ok(Message::Binary(data))) => Frame::Binary(data.to_vec()),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                // axum answers pings itself
                continue;
            }
            Some(Ok(Message::Close(_))) => {
                info!("Room {} slot {} requested close", room_id, slot);
                break;
            }
            Some(Err(e)) => {
                debug!("WebSocket error in room {} slot {}: {}", room_id, slot, e);
                break;
            }
            None => {
                info!("Room {} slot {} connection closed", room_id, slot);
                break;
            }
        };

        if let Err(e) = registry.forward(room_id, slot, frame).await {
            debug!("Forward from room {} slot {} failed: {}", room_id, slot, e);
            break;
        }
    }

    // Single exit point for every termination path. Vacating the slot drops
    // its sender, which lets the writer task finish with a Close frame.
    registry.leave(room_id, slot).await;
    info!("Room {} slot {} vacated", room_id, slot);
}

/// Drain frames destined for this connection into its socket sink. Ends when
/// the slot is vacated (channel closed, sends a Close frame) or the socket
/// rejects a write (the channel then reads as closed to forwarding peers).
async fn write_peer_frames(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Frame>,
) {
    while let Some(frame) = rx.recv().await {
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data.into()),
        };
        if ws_sender.send(message).await.is_err() {
            return;
        }
    }
    let _ = ws_sender.send(Message::Close(None)).await;
}
