use crate::connection_manager::ConnectionId;
use shared::{CodecError, PlayerId, RoomId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),
    #[error("outbound queue of connection {0} is full")]
    QueueFull(ConnectionId),
    #[error("outbound datagram queue is closed")]
    OutboundClosed,
    #[error("room {0} does not exist")]
    UnknownRoom(RoomId),
    #[error("room {0} is closed")]
    RoomClosed(RoomId),
    #[error("room {0} has no frame history yet")]
    NoFrameHistory(RoomId),
    #[error("player {player_id} is not a member of room {room_id}")]
    UnknownMember { room_id: RoomId, player_id: PlayerId },
    #[error("player {0} is not logged in")]
    UnknownPlayer(PlayerId),
    #[error("connection {0} has not logged in")]
    NotLoggedIn(ConnectionId),
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
}
