//! Fixed-tick local driver for lockstep simulation
//!
//! Real elapsed time is accumulated and every full tick the driver pulls the
//! next server-confirmed frame, if one has arrived, and produces the input
//! sample to send back. The accumulator keeps its remainder across ticks so
//! the local cadence does not drift from the server's.

use crate::frame_buffer::FrameBuffer;
use crate::input::InputSampler;
use log::{debug, warn};
use shared::protocol::{FrameBroadcast, FrameData, FrameSample};
use shared::{FrameId, PlayerId, RoomId};
use std::time::Duration;

/// What one local tick produced
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutput {
    /// Confirmed frame to simulate, `None` while waiting on the server
    pub frame: Option<FrameData>,
    /// Sample to send for this tick
    pub sample: FrameSample,
}

#[derive(Debug)]
pub struct FrameDriver {
    tick: Duration,
    accumulator: Duration,
    sampler: InputSampler,
    buffer: FrameBuffer,
    player_id: PlayerId,
    room_id: RoomId,
    ticks: u64,
}

impl FrameDriver {
    pub fn new(tick_rate: u32, player_id: PlayerId, room_id: RoomId) -> Self {
        Self {
            tick: Duration::from_secs(1) / tick_rate.max(1),
            accumulator: Duration::ZERO,
            sampler: InputSampler::new(),
            buffer: FrameBuffer::new(),
            player_id,
            room_id,
            ticks: 0,
        }
    }

    /// Captures this render frame's axes
    pub fn set_input(&mut self, up: f32, right: f32) {
        self.sampler.set_axes(up, right);
        self.sampler.sample(self.accumulator, self.tick);
    }

    /// Buffers a catch-up slice, returns how many frames were new
    pub fn receive(&mut self, broadcast: FrameBroadcast) -> usize {
        if broadcast.room_id != self.room_id {
            warn!(
                "Ignoring frames for room {} (playing in {})",
                broadcast.room_id, self.room_id
            );
            return 0;
        }
        let added = self.buffer.add_confirmed_frames(broadcast.frames);
        debug!(
            "Buffered {} new frames, confirmed up to {}",
            added,
            self.buffer.last_confirmed_frame_id()
        );
        added
    }

    /// Advances local time, running at most one tick
    pub fn fixed_update(&mut self, elapsed: Duration) -> Option<TickOutput> {
        self.accumulator += elapsed;
        if self.accumulator < self.tick {
            return None;
        }
        self.accumulator -= self.tick;
        self.ticks += 1;

        let frame = self.buffer.get_next_frame();
        let input = self.sampler.take();
        let sample = self.buffer.pack_sample(self.player_id, self.room_id, input);
        Some(TickOutput { frame, sample })
    }

    pub fn tick_duration(&self) -> Duration {
        self.tick
    }

    pub fn accumulated(&self) -> Duration {
        self.accumulator
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn next_frame_id(&self) -> FrameId {
        self.buffer.next_frame_id()
    }

    pub fn last_confirmed_frame_id(&self) -> FrameId {
        self.buffer.last_confirmed_frame_id()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.buffered()
    }
}
