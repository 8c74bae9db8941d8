//! Message catalogue for the control (TCP) and frame-sync (UDP) channels

use serde::{Deserialize, Serialize};

/// Reply ids are the request id shifted by this constant
pub const REPLY_OFFSET: u32 = 1_000_000;

pub type PlayerId = u64;
pub type RoomId = u32;
pub type FrameId = u32;

/// Logical message identifiers carried in the envelope type field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    LoginRequest = 1,
    MatchRequest = 2,
    PostUdpAddress = 3,
    FrameSample = 4,
    JoinRoom = 5,

    LoginResponse = REPLY_OFFSET + 1,
    MatchResponse = REPLY_OFFSET + 2,
    FrameBroadcast = REPLY_OFFSET + 4,
    JoinRoomResponse = REPLY_OFFSET + 5,
}

impl MessageType {
    pub const fn id(self) -> u32 {
        self as u32
    }

    pub fn from_u32(id: u32) -> Option<Self> {
        let kind = match id {
            1 => Self::LoginRequest,
            2 => Self::MatchRequest,
            3 => Self::PostUdpAddress,
            4 => Self::FrameSample,
            5 => Self::JoinRoom,
            1_000_001 => Self::LoginResponse,
            1_000_002 => Self::MatchResponse,
            1_000_004 => Self::FrameBroadcast,
            1_000_005 => Self::JoinRoomResponse,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_reply(self) -> bool {
        self.id() > REPLY_OFFSET
    }

    /// Reply type answering this request, if the request has one
    pub fn reply(self) -> Option<Self> {
        if self.is_reply() {
            return None;
        }
        Self::from_u32(self.id() + REPLY_OFFSET)
    }

    /// Request type this reply answers
    pub fn request(self) -> Option<Self> {
        if !self.is_reply() {
            return None;
        }
        Self::from_u32(self.id() - REPLY_OFFSET)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub account: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub player_id: PlayerId,
    pub account: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchState {
    Matched,
    Rejected,
}

/// Everything a client needs to enter the frame-sync phase of a match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResponse {
    pub state: MatchState,
    pub udp_host: String,
    pub udp_port: u16,
    pub room_id: RoomId,
    pub player_index: u32,
    pub tick_rate: u32,
    pub random_seed: i32,
    pub players: Vec<PlayerId>,
}

impl MatchResponse {
    pub fn rejected() -> Self {
        Self {
            state: MatchState::Rejected,
            udp_host: String::new(),
            udp_port: 0,
            room_id: 0,
            player_index: 0,
            tick_rate: 0,
            random_seed: 0,
            players: Vec::new(),
        }
    }
}

/// Sent over UDP so the server learns the client's public source endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostUdpAddress {
    pub room_id: RoomId,
    pub player_id: PlayerId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRoomRequest {
    pub room_id: RoomId,
    pub player_id: PlayerId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinResult {
    Joined,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRoomResponse {
    pub result: JoinResult,
    pub room_id: RoomId,
    pub player_index: u32,
    pub random_seed: i32,
    pub tick_rate: u32,
}

/// Directional axes captured from local input
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InputCommand {
    pub up: f32,
    pub right: f32,
}

/// Input latched for one local tick
///
/// `sub_frame_time` is the fraction of the tick that had elapsed when the
/// command was captured, in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameInput {
    pub sub_frame_time: f32,
    pub command: Option<InputCommand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerFrameInput {
    pub player_id: PlayerId,
    pub input: FrameInput,
}

/// Server-authoritative record of one room tick, immutable once appended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameData {
    pub frame: FrameId,
    pub inputs: Vec<PlayerFrameInput>,
}

impl FrameData {
    pub fn empty(frame: FrameId) -> Self {
        Self {
            frame,
            inputs: Vec::new(),
        }
    }

    pub fn input_of(&self, player_id: PlayerId) -> Option<&FrameInput> {
        self.inputs
            .iter()
            .find(|entry| entry.player_id == player_id)
            .map(|entry| &entry.input)
    }
}

/// Client input for the current local tick plus its acknowledgement id
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameSample {
    pub player_id: PlayerId,
    pub room_id: RoomId,
    pub input: FrameInput,
    /// Highest server frame the client has received without gaps
    pub client_frame: FrameId,
}

/// Catch-up slice of confirmed frames, ordered by frame id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameBroadcast {
    pub room_id: RoomId,
    pub frames: Vec<FrameData>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [MessageType; 9] = [
        MessageType::LoginRequest,
        MessageType::MatchRequest,
        MessageType::PostUdpAddress,
        MessageType::FrameSample,
        MessageType::JoinRoom,
        MessageType::LoginResponse,
        MessageType::MatchResponse,
        MessageType::FrameBroadcast,
        MessageType::JoinRoomResponse,
    ];

    #[test]
    fn test_ids_map_back_to_types() {
        for kind in ALL {
            assert_eq!(MessageType::from_u32(kind.id()), Some(kind));
        }
        assert_eq!(MessageType::from_u32(0), None);
        assert_eq!(MessageType::from_u32(REPLY_OFFSET + 3), None);
    }

    #[test]
    fn test_reply_types_are_offset_from_requests() {
        assert_eq!(
            MessageType::LoginRequest.reply(),
            Some(MessageType::LoginResponse)
        );
        assert_eq!(
            MessageType::MatchRequest.reply(),
            Some(MessageType::MatchResponse)
        );
        assert_eq!(
            MessageType::JoinRoom.reply(),
            Some(MessageType::JoinRoomResponse)
        );
        assert_eq!(MessageType::PostUdpAddress.reply(), None);
        assert_eq!(MessageType::LoginResponse.reply(), None);

        assert_eq!(
            MessageType::MatchResponse.request(),
            Some(MessageType::MatchRequest)
        );
        assert_eq!(MessageType::FrameSample.request(), None);
    }

    #[test]
    fn test_frame_data_lookup_by_player() {
        let frame = FrameData {
            frame: 4,
            inputs: vec![
                PlayerFrameInput {
                    player_id: 1,
                    input: FrameInput::default(),
                },
                PlayerFrameInput {
                    player_id: 2,
                    input: FrameInput {
                        sub_frame_time: 0.25,
                        command: Some(InputCommand { up: 1.0, right: 0.0 }),
                    },
                },
            ],
        };

        assert!(frame.input_of(1).unwrap().command.is_none());
        assert_eq!(frame.input_of(2).unwrap().sub_frame_time, 0.25);
        assert!(frame.input_of(3).is_none());
        assert!(FrameData::empty(9).inputs.is_empty());
    }
}
