//! Process-wide table of rooms keyed by room id
//!
//! Rooms are created lazily by the first join and evicted as soon as they
//! drain. A later join to the same id therefore starts a brand new room with a
//! fresh seed and an empty frame log.

use crate::error::ServerError;
use crate::room::{Room, RoomSettings};
use crate::udp::OutboundDatagram;
use log::info;
use parking_lot::RwLock;
use shared::protocol::FrameSample;
use shared::{PlayerId, RoomId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Result of placing a player into a room
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub room: Arc<Room>,
    pub player_index: u32,
    pub created: bool,
}

#[derive(Debug)]
pub struct RoomManager {
    rooms: RwLock<HashMap<RoomId, Arc<Room>>>,
    settings: RoomSettings,
    outbound: mpsc::UnboundedSender<OutboundDatagram>,
}

impl RoomManager {
    pub fn new(settings: RoomSettings, outbound: mpsc::UnboundedSender<OutboundDatagram>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            settings,
            outbound,
        }
    }

    /// Places the player in the room, creating the room if needed
    pub fn join_room(&self, room_id: RoomId, player_id: PlayerId) -> Result<JoinOutcome, ServerError> {
        let mut rooms = self.rooms.write();

        let mut created = false;
        let room = rooms
            .entry(room_id)
            .or_insert_with(|| {
                created = true;
                let seed = rand::random::<i32>();
                info!("Created room {} with seed {}", room_id, seed);
                Room::new(room_id, seed, self.settings, self.outbound.clone())
            })
            .clone();

        let player_index = room.join(player_id)?;
        Ok(JoinOutcome {
            room,
            player_index,
            created,
        })
    }

    pub fn set_player_state(
        &self,
        room_id: RoomId,
        player_id: PlayerId,
        endpoint: SocketAddr,
    ) -> Result<(), ServerError> {
        self.room(room_id)?.set_player_state(player_id, endpoint)
    }

    /// Takes the player out of play and evicts the room once it drains
    ///
    /// Returns true if the room was evicted.
    pub fn exit_room(&self, room_id: RoomId, player_id: PlayerId) -> Result<bool, ServerError> {
        let mut rooms = self.rooms.write();
        let room = rooms
            .get(&room_id)
            .cloned()
            .ok_or(ServerError::UnknownRoom(room_id))?;

        let drained = room.exit(player_id)?;
        if drained {
            rooms.remove(&room_id);
            info!("Room {} evicted", room_id);
        }
        Ok(drained)
    }

    pub fn sample_frame(&self, sample: &FrameSample) -> Result<(), ServerError> {
        self.room(sample.room_id)?.sample_frame(sample)
    }

    pub fn get(&self, room_id: RoomId) -> Option<Arc<Room>> {
        self.rooms.read().get(&room_id).cloned()
    }

    fn room(&self, room_id: RoomId) -> Result<Arc<Room>, ServerError> {
        self.get(room_id).ok_or(ServerError::UnknownRoom(room_id))
    }

    /// Closes and forgets every room
    pub fn close_all(&self) -> usize {
        let rooms: Vec<Arc<Room>> = self.rooms.write().drain().map(|(_, room)| room).collect();
        for room in &rooms {
            room.close();
        }
        rooms.len()
    }

    pub fn len(&self) -> usize {
        self.rooms.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
