use std::net::Ipv4Addr;

pub mod codec;
pub mod protocol;

pub use codec::{CodecError, Envelope, FrameDecoder};
pub use protocol::{FrameId, MessageType, PlayerId, RoomId, REPLY_OFFSET};

pub const DEFAULT_TCP_PORT: u16 = 12800;
pub const DEFAULT_UDP_PORT: u16 = 12900;
pub const DEFAULT_TICK_RATE: u32 = 20;
pub const DEFAULT_MATCH_ROOM: RoomId = 9980;
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 192, 10, 1);

/// Index of the first frame a room produces
pub const FIRST_FRAME: FrameId = 1;

/// Largest UDP datagram either side will read
pub const MAX_DATAGRAM_LEN: usize = 64 * 1024;

/// Largest frame broadcast the server puts in one datagram, header included
///
/// Kept well below the 65,507 byte IPv4 UDP payload limit.
pub const MAX_BROADCAST_LEN: usize = 60 * 1024;
