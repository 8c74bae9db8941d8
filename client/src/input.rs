//! Client input sampling with change detection and sub-frame timing

use shared::protocol::{FrameInput, InputCommand};
use std::time::Duration;

/// Latches directional input for the next local tick
///
/// Axes are pushed in once per render frame. Only a change marks the sampler
/// dirty, and only a dirty sampler latches a new command, tagged with how far
/// into the current tick it was captured. The tick boundary takes the latest
/// latched command, not a history.
#[derive(Debug, Default)]
pub struct InputSampler {
    current: InputCommand,
    dirty: bool,
    latched: Option<FrameInput>,
}

impl InputSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the current axes, returns true if they changed
    pub fn set_axes(&mut self, up: f32, right: f32) -> bool {
        let command = InputCommand { up, right };

        // Check if input state changed
        let changed = command != self.current;
        if changed {
            self.current = command;
            self.dirty = true;
        }
        changed
    }

    /// Latches the current command if it changed since the last sample
    ///
    /// `into_tick` is the time accumulated towards the next tick boundary.
    pub fn sample(&mut self, into_tick: Duration, tick: Duration) {
        if !self.dirty {
            return;
        }

        self.latched = Some(FrameInput {
            sub_frame_time: sub_frame_fraction(into_tick, tick),
            command: Some(self.current),
        });
        self.dirty = false;
    }

    /// Hands over the latched input for this tick and clears it
    pub fn take(&mut self) -> FrameInput {
        self.dirty = false;
        self.latched.take().unwrap_or_default()
    }

    pub fn current(&self) -> InputCommand {
        self.current
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

fn sub_frame_fraction(into_tick: Duration, tick: Duration) -> f32 {
    if tick.is_zero() {
        return 0.0;
    }
    (into_tick.as_secs_f32() / tick.as_secs_f32()).clamp(0.0, 1.0)
}
