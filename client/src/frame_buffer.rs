//! Buffer of server-confirmed frames awaiting local simulation
//!
//! Frames are keyed by id so duplicate and reordered catch-up slices are
//! absorbed. Consumption is strictly in id order: a gap stalls the local
//! simulation until the next catch-up slice fills it.

use shared::protocol::{FrameData, FrameInput, FrameSample};
use shared::{FrameId, PlayerId, RoomId, FIRST_FRAME};
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct FrameBuffer {
    frames: BTreeMap<FrameId, FrameData>,
    /// Next frame the simulation will consume
    next_frame: FrameId,
    /// Highest frame received with no gaps before it
    last_confirmed: FrameId,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            frames: BTreeMap::new(),
            next_frame: FIRST_FRAME,
            last_confirmed: FIRST_FRAME - 1,
        }
    }

    /// Stores newly confirmed frames, returns how many were new
    pub fn add_confirmed_frames(&mut self, frames: impl IntoIterator<Item = FrameData>) -> usize {
        let mut added = 0;
        for frame in frames {
            if frame.frame < self.next_frame || self.frames.contains_key(&frame.frame) {
                continue;
            }
            self.frames.insert(frame.frame, frame);
            added += 1;
        }

        while self.frames.contains_key(&(self.last_confirmed + 1)) {
            self.last_confirmed += 1;
        }
        added
    }

    /// Pops the next frame in order, if it has arrived
    pub fn get_next_frame(&mut self) -> Option<FrameData> {
        let frame = self.frames.remove(&self.next_frame)?;
        self.next_frame += 1;
        Some(frame)
    }

    pub fn last_confirmed_frame_id(&self) -> FrameId {
        self.last_confirmed
    }

    pub fn next_frame_id(&self) -> FrameId {
        self.next_frame
    }

    /// Frames received but not yet consumed, including any beyond a gap
    pub fn buffered(&self) -> usize {
        self.frames.len()
    }

    /// Frames ready to consume without hitting a gap
    pub fn ready(&self) -> usize {
        (self.last_confirmed + 1).saturating_sub(self.next_frame) as usize
    }

    /// Packs this tick's input with the acknowledgement id
    pub fn pack_sample(&self, player_id: PlayerId, room_id: RoomId, input: FrameInput) -> FrameSample {
        FrameSample {
            player_id,
            room_id,
            input,
            client_frame: self.last_confirmed,
        }
    }
}
