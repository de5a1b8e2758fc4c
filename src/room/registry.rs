//! Room registry and slot management
//!
//! Maintains the map of active rooms and provides the four lifecycle
//! operations (create, lookup, join, leave) plus frame forwarding between
//! the two occupants of a room. All slot mutations for a given room are
//! serialized by that room's lock; the registry map lock is only held for
//! lookups and structural changes, so unrelated rooms never contend.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// A relay payload. Text/binary discrimination and message boundaries are
/// preserved verbatim from one socket to the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Outbound channel of a room occupant. The relay writer task on the other
/// end drains this into the occupant's socket, so sends never block the
/// forwarding reader.
pub type PeerSender = mpsc::UnboundedSender<Frame>;

/// Errors that can occur when admitting a connection into a room
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JoinError {
    #[error("room not found")]
    NotFound,

    #[error("room is full")]
    RoomFull,
}

/// Errors that can occur when forwarding a frame to the peer slot
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ForwardError {
    #[error("peer connection closed")]
    PeerClosed,
}

/// The slot pair of a room. `retired` is set when a leave empties the room
/// and the entry is about to be removed from the map, so a join racing the
/// removal observes NotFound instead of occupying a slot in a dead room.
struct Slots {
    members: [Option<PeerSender>; 2],
    retired: bool,
}

/// A session pairing at most two connections for verbatim frame relay
pub struct Room {
    slots: Mutex<Slots>,
}

impl Room {
    fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                members: [None, None],
                retired: false,
            }),
        }
    }

    /// Number of occupied slots (0..=2)
    pub async fn occupancy(&self) -> usize {
        let slots = self.slots.lock().await;
        slots.members.iter().filter(|m| m.is_some()).count()
    }
}

/// Registry of active rooms
///
/// Owned, injectable component constructed at process start; all room state
/// is accessed through its operations. Rooms are created by the session
/// endpoint, occupied by admitted connections, and removed the moment the
/// last occupant leaves.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<Uuid, Arc<Room>>>,
}

impl RoomRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Allocate a fresh room with both slots empty and return its ID
    pub async fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        let mut rooms = self.rooms.write().await;
        rooms.insert(id, Arc::new(Room::new()));
        info!("Room {} created", id);
        id
    }

    /// Look up a room by ID
    pub async fn lookup(&self, id: Uuid) -> Option<Arc<Room>> {
        self.rooms.read().await.get(&id).cloned()
    }

    /// Occupant count of a room, or None if the room does not exist
    pub async fn occupancy(&self, id: Uuid) -> Option<usize> {
        let room = self.lookup(id).await?;
        Some(room.occupancy().await)
    }

    /// Number of active rooms
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Assign `sender` to the first empty slot of the room (index 0 checked
    /// before index 1) and return the slot index.
    pub async fn join(&self, id: Uuid, sender: PeerSender) -> Result<usize, JoinError> {
        let room = self.lookup(id).await.ok_or(JoinError::NotFound)?;

        let mut slots = room.slots.lock().await;
        if slots.retired {
            // A concurrent leave emptied the room and is removing it.
            return Err(JoinError::NotFound);
        }

        let slot = slots
            .members
            .iter()
            .position(|m| m.is_none())
            .ok_or(JoinError::RoomFull)?;
        slots.members[slot] = Some(sender);

        debug!("Connection joined room {} at slot {}", id, slot);
        Ok(slot)
    }

    /// Clear the given slot; removes the room once both slots are empty.
    /// Idempotent: clearing an already-empty slot is a no-op.
    pub async fn leave(&self, id: Uuid, slot: usize) {
        let Some(room) = self.lookup(id).await else {
            return;
        };

        let emptied = {
            let mut slots = room.slots.lock().await;
            let vacated = slots.members[slot].take();
            if vacated.is_some() && slots.members.iter().all(|m| m.is_none()) {
                slots.retired = true;
                true
            } else {
                false
            }
        };

        if emptied {
            let mut rooms = self.rooms.write().await;
            rooms.remove(&id);
            info!("Room {} removed after last occupant left", id);
        }
    }

    /// Forward a frame from one slot to the other occupant of the room.
    ///
    /// An empty peer slot drops the frame silently. A closed peer channel is
    /// reported so the sender's relay loop can terminate.
    pub async fn forward(
        &self,
        id: Uuid,
        from_slot: usize,
        frame: Frame,
    ) -> Result<(), ForwardError> {
        let Some(room) = self.lookup(id).await else {
            // Unreachable while the sender occupies a slot; drop regardless.
            debug!("Dropping frame for vanished room {}", id);
            return Ok(());
        };

        let slots = room.slots.lock().await;
        match &slots.members[1 - from_slot] {
            Some(peer) => peer.send(frame).map_err(|_| ForwardError::PeerClosed),
            None => Ok(()),
        }
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> (PeerSender, mpsc::UnboundedReceiver<Frame>) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn test_first_join_gets_slot_zero() {
        let registry = RoomRegistry::new();
        let id = registry.create().await;

        let (tx, _rx) = sender();
        assert_eq!(registry.join(id, tx).await, Ok(0));
        assert_eq!(registry.occupancy(id).await, Some(1));
    }

    #[tokio::test]
    async fn test_second_join_gets_slot_one() {
        let registry = RoomRegistry::new();
        let id = registry.create().await;

        let (tx0, _rx0) = sender();
        let (tx1, _rx1) = sender();
        assert_eq!(registry.join(id, tx0).await, Ok(0));
        assert_eq!(registry.join(id, tx1).await, Ok(1));
        assert_eq!(registry.occupancy(id).await, Some(2));
    }

    #[tokio::test]
    async fn test_third_join_is_rejected() {
        let registry = RoomRegistry::new();
        let id = registry.create().await;

        let (tx0, _rx0) = sender();
        let (tx1, _rx1) = sender();
        let (tx2, _rx2) = sender();
        registry.join(id, tx0).await.unwrap();
        registry.join(id, tx1).await.unwrap();

        assert_eq!(registry.join(id, tx2).await, Err(JoinError::RoomFull));
        assert_eq!(registry.occupancy(id).await, Some(2));
    }

    #[tokio::test]
    async fn test_join_unknown_room() {
        let registry = RoomRegistry::new();
        let (tx, _rx) = sender();
        assert_eq!(
            registry.join(Uuid::new_v4(), tx).await,
            Err(JoinError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_room_removed_after_both_leave() {
        let registry = RoomRegistry::new();
        let id = registry.create().await;

        let (tx0, _rx0) = sender();
        let (tx1, _rx1) = sender();
        let slot0 = registry.join(id, tx0).await.unwrap();
        let slot1 = registry.join(id, tx1).await.unwrap();

        registry.leave(id, slot0).await;
        assert_eq!(registry.occupancy(id).await, Some(1));

        registry.leave(id, slot1).await;
        assert_eq!(registry.room_count().await, 0);

        let (tx2, _rx2) = sender();
        assert_eq!(registry.join(id, tx2).await, Err(JoinError::NotFound));
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let registry = RoomRegistry::new();
        let id = registry.create().await;

        let (tx0, _rx0) = sender();
        let (tx1, _rx1) = sender();
        registry.join(id, tx0).await.unwrap();
        registry.join(id, tx1).await.unwrap();

        registry.leave(id, 0).await;
        registry.leave(id, 0).await;

        // Slot 1 is still occupied, so the room must survive the double clear.
        assert_eq!(registry.occupancy(id).await, Some(1));
    }

    #[tokio::test]
    async fn test_leave_on_fresh_room_keeps_it() {
        let registry = RoomRegistry::new();
        let id = registry.create().await;

        // Clearing an empty slot never occupied is a no-op; a room that was
        // never joined is not torn down by it.
        registry.leave(id, 0).await;
        registry.leave(id, 1).await;
        assert_eq!(registry.occupancy(id).await, Some(0));
    }

    #[tokio::test]
    async fn test_freed_slot_can_be_reoccupied() {
        let registry = RoomRegistry::new();
        let id = registry.create().await;

        let (tx0, _rx0) = sender();
        let (tx1, _rx1) = sender();
        registry.join(id, tx0).await.unwrap();
        registry.join(id, tx1).await.unwrap();

        registry.leave(id, 0).await;

        let (tx2, _rx2) = sender();
        assert_eq!(registry.join(id, tx2).await, Ok(0));
        assert_eq!(registry.occupancy(id).await, Some(2));
    }

    #[tokio::test]
    async fn test_forward_delivers_in_order_and_never_echoes() {
        let registry = RoomRegistry::new();
        let id = registry.create().await;

        let (tx0, mut rx0) = sender();
        let (tx1, mut rx1) = sender();
        registry.join(id, tx0).await.unwrap();
        registry.join(id, tx1).await.unwrap();

        for text in ["m1", "m2", "m3"] {
            registry
                .forward(id, 0, Frame::Text(text.to_string()))
                .await
                .unwrap();
        }

        assert_eq!(rx1.recv().await, Some(Frame::Text("m1".to_string())));
        assert_eq!(rx1.recv().await, Some(Frame::Text("m2".to_string())));
        assert_eq!(rx1.recv().await, Some(Frame::Text("m3".to_string())));
        assert!(rx0.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_forward_preserves_binary_frames() {
        let registry = RoomRegistry::new();
        let id = registry.create().await;

        let (tx0, _rx0) = sender();
        let (tx1, mut rx1) = sender();
        registry.join(id, tx0).await.unwrap();
        registry.join(id, tx1).await.unwrap();

        let payload = vec![0u8, 159, 146, 150];
        registry
            .forward(id, 0, Frame::Binary(payload.clone()))
            .await
            .unwrap();
        assert_eq!(rx1.recv().await, Some(Frame::Binary(payload)));
    }

    #[tokio::test]
    async fn test_forward_to_empty_peer_drops_silently() {
        let registry = RoomRegistry::new();
        let id = registry.create().await;

        let (tx0, _rx0) = sender();
        registry.join(id, tx0).await.unwrap();

        registry
            .forward(id, 0, Frame::Text("lost".to_string()))
            .await
            .unwrap();

        // A peer joining afterwards must not receive the dropped frame.
        let (tx1, mut rx1) = sender();
        registry.join(id, tx1).await.unwrap();
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_forward_to_closed_peer_reports_error() {
        let registry = RoomRegistry::new();
        let id = registry.create().await;

        let (tx0, _rx0) = sender();
        let (tx1, rx1) = sender();
        registry.join(id, tx0).await.unwrap();
        registry.join(id, tx1).await.unwrap();
        drop(rx1);

        assert_eq!(
            registry.forward(id, 0, Frame::Text("x".to_string())).await,
            Err(ForwardError::PeerClosed)
        );
    }

    #[tokio::test]
    async fn test_concurrent_joins_never_exceed_two_slots() {
        let registry = Arc::new(RoomRegistry::new());
        let id = registry.create().await;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let (tx, rx) = sender();
                let result = registry.join(id, tx).await;
                // Keep the receiver alive so the slot stays plausibly live.
                (result, rx)
            }));
        }

        let mut admitted = Vec::new();
        let mut receivers = Vec::new();
        for handle in handles {
            let (result, rx) = handle.await.unwrap();
            if let Ok(slot) = result {
                admitted.push(slot);
                receivers.push(rx);
            }
        }

        admitted.sort_unstable();
        assert_eq!(admitted, vec![0, 1]);
        assert_eq!(registry.occupancy(id).await, Some(2));
    }

    #[tokio::test]
    async fn test_join_racing_teardown_is_consistent() {
        let registry = Arc::new(RoomRegistry::new());

        for _ in 0..50 {
            let id = registry.create().await;
            let (tx0, _rx0) = sender();
            let slot = registry.join(id, tx0).await.unwrap();

            let leaver = {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.leave(id, slot).await })
            };
            let joiner = {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    let (tx, rx) = sender();
                    (registry.join(id, tx).await, rx)
                })
            };

            leaver.await.unwrap();
            let (joined, _rx) = joiner.await.unwrap();

            match joined {
                // Joined before the teardown finished: the room must still
                // exist with exactly one occupant.
                Ok(_) => assert_eq!(registry.occupancy(id).await, Some(1)),
                // Lost the race: the room must be gone.
                Err(JoinError::NotFound) => assert_eq!(registry.occupancy(id).await, None),
                Err(other) => panic!("unexpected join error: {other}"),
            }

            // Reset for the next iteration.
            if registry.occupancy(id).await.is_some() {
                registry.leave(id, 0).await;
                registry.leave(id, 1).await;
            }
        }
    }
}
