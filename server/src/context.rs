//! Process context shared by every server task
//!
//! Built once at startup and handed to the accept loop, the UDP receiver and
//! the handlers. Nothing in here owns a socket, so the room and dispatch logic
//! can be exercised without binding any ports.

use crate::config::ServerConfig;
use crate::connection_manager::{ConnectionId, ConnectionManager};
use crate::dispatch::Dispatcher;
use crate::error::ServerError;
use crate::players::PlayerRegistry;
use crate::room::RoomSettings;
use crate::room_manager::RoomManager;
use crate::udp::OutboundDatagram;
use log::{debug, info};
use serde::Serialize;
use shared::codec::encode_message;
use shared::{MessageType, PlayerId};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct ServerContext {
    pub config: ServerConfig,
    pub rooms: RoomManager,
    pub connections: ConnectionManager,
    pub players: PlayerRegistry,
    pub dispatcher: Dispatcher,
    outbound: mpsc::UnboundedSender<OutboundDatagram>,
}

impl ServerContext {
    /// Creates the context and the receiving end of its datagram queue
    pub fn new(config: ServerConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<OutboundDatagram>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let settings = RoomSettings {
            tick_interval: config.tick_interval(),
            max_catch_up_frames: config.max_catch_up_frames.max(1),
            mirror_to_group: config.multicast_group.is_some(),
            ..RoomSettings::default()
        };

        let context = Self {
            rooms: RoomManager::new(settings, outbound.clone()),
            connections: ConnectionManager::new(config.max_connections as usize),
            players: PlayerRegistry::new(),
            dispatcher: Dispatcher::new(),
            outbound,
            config,
        };
        (Arc::new(context), outbound_rx)
    }

    pub fn send_datagram<T: Serialize>(
        &self,
        to: SocketAddr,
        kind: MessageType,
        message: &T,
    ) -> Result<(), ServerError> {
        let bytes = encode_message(kind, message)?;
        self.outbound
            .send(OutboundDatagram::unicast(to, bytes))
            .map_err(|_| ServerError::OutboundClosed)
    }

    /// Marks the player offline and walks them out of their room
    pub fn release_player(&self, player_id: PlayerId) {
        let Some(room_id) = self.players.logout(player_id) else {
            return;
        };
        let members = self
            .rooms
            .get(room_id)
            .map(|room| room.member_ids())
            .unwrap_or_default();
        match self.rooms.exit_room(room_id, player_id) {
            Ok(true) => {
                info!("Player {} was the last one in room {}", player_id, room_id);
                // Matched members that never bound go with the room
                for other in members.into_iter().filter(|&id| id != player_id) {
                    if self.players.room_of(other) == Some(room_id) {
                        self.players.set_room(other, None);
                    }
                }
            }
            Ok(false) => {}
            Err(e) => debug!("Player {} room exit skipped: {}", player_id, e),
        }
    }

    /// Tears a connection down; safe to call more than once
    pub fn disconnect(&self, id: ConnectionId) {
        let Some(connection) = self.connections.remove(id) else {
            return;
        };
        connection.close();
        if let Some(session) = connection.take_session() {
            if self.connections.find_by_player(session.player_id).is_some() {
                info!(
                    "Connection {} closed; player {} stays online elsewhere",
                    id, session.player_id
                );
                return;
            }
            info!(
                "Player {} ('{}') disconnected",
                session.player_id, session.account
            );
            self.release_player(session.player_id);
        }
    }

    /// Closes all rooms, then signals every connection to close
    pub fn shutdown(&self) {
        let rooms = self.rooms.close_all();
        let connections = self.connections.close_all();
        info!(
            "Shutdown: closed {} room(s) and {} connection(s)",
            rooms, connections
        );
    }
}
