//! A single frame-synchronized room
//!
//! A room owns an append-only log of [`FrameData`] and the set of members
//! playing in it. Once ticking, a per-room task appends one frame per tick
//! and unicasts to every playing member the frames it has not acknowledged
//! yet. Members acknowledge by reporting their last confirmed frame in each
//! [`FrameSample`], so a lost broadcast is covered by the next tick's slice.
//!
//! Locking: `lifecycle` is always taken first when it is needed at all.
//! `members` and `frames` are never held at the same time.

use crate::error::ServerError;
use crate::udp::OutboundDatagram;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use shared::codec::{encode_message, payload_len, HEADER_LEN};
use shared::protocol::{FrameBroadcast, FrameData, FrameInput, FrameSample, PlayerFrameInput};
use shared::{FrameId, MessageType, PlayerId, RoomId, MAX_BROADCAST_LEN};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// Created, no ticker yet
    Empty,
    Active,
    /// Every member left; ticker cancelled and state cleared
    Draining,
    /// Shut down with the process
    Closed,
}

/// Per-room timing and delivery limits
#[derive(Debug, Clone, Copy)]
pub struct RoomSettings {
    pub tick_interval: Duration,
    pub max_catch_up_frames: usize,
    /// Encoded size limit of one catch-up datagram
    pub max_broadcast_bytes: usize,
    /// Also publish each new frame to the multicast group
    pub mirror_to_group: bool,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(50),
            max_catch_up_frames: 256,
            max_broadcast_bytes: MAX_BROADCAST_LEN,
            mirror_to_group: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub player_id: PlayerId,
    pub index: u32,
    pub endpoint: Option<SocketAddr>,
    /// Last frame this member confirmed receiving
    pub run_frame: FrameId,
    pub playing: bool,
}

#[derive(Debug, Default)]
struct Members {
    by_player: HashMap<PlayerId, Member>,
    next_index: u32,
}

/// Room id and frame count in front of the frames of a `FrameBroadcast`
const BROADCAST_PREFIX_LEN: usize = 4 + 8;

/// Frame `n` lives at position `n - 1`
#[derive(Debug, Default)]
struct FrameLog {
    frames: Vec<FrameData>,
    /// Encoded size of each frame, parallel to `frames`
    sizes: Vec<usize>,
    pending: HashMap<PlayerId, FrameInput>,
}

impl FrameLog {
    fn last_frame(&self) -> FrameId {
        self.frames.len() as FrameId
    }

    /// Seals the inputs gathered since the previous tick into a new frame
    fn advance(&mut self) -> FrameId {
        let frame = self.last_frame() + 1;
        let mut inputs: Vec<PlayerFrameInput> = self
            .pending
            .drain()
            .map(|(player_id, input)| PlayerFrameInput { player_id, input })
            .collect();
        inputs.sort_by_key(|entry| entry.player_id);

        let data = FrameData { frame, inputs };
        let size = payload_len(&data).unwrap_or_else(|e| {
            warn!("Frame {}: failed to size frame: {}", frame, e);
            0
        });
        self.frames.push(data);
        self.sizes.push(size);
        frame
    }

    /// Frames `(after, after + limit]` that exist in the log and fit in `budget` bytes
    ///
    /// The first frame is always included so that a slice never comes back
    /// empty while frames are outstanding.
    fn slice_after(&self, after: FrameId, limit: usize, budget: usize) -> Vec<FrameData> {
        let start = after as usize;
        if start >= self.frames.len() {
            return Vec::new();
        }
        let mut end = self.frames.len().min(start.saturating_add(limit));

        let mut used = 0usize;
        for (offset, size) in self.sizes[start..end].iter().enumerate() {
            used = used.saturating_add(*size);
            if used > budget && offset > 0 {
                end = start + offset;
                break;
            }
        }
        self.frames[start..end].to_vec()
    }

    fn clear(&mut self) {
        self.frames.clear();
        self.sizes.clear();
        self.pending.clear();
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: RoomState,
    ticker: Option<JoinHandle<()>>,
}

#[derive(Debug)]
pub struct Room {
    id: RoomId,
    seed: i32,
    settings: RoomSettings,
    lifecycle: Mutex<Lifecycle>,
    members: Mutex<Members>,
    frames: Mutex<FrameLog>,
    outbound: mpsc::UnboundedSender<OutboundDatagram>,
}

impl Room {
    pub fn new(
        id: RoomId,
        seed: i32,
        settings: RoomSettings,
        outbound: mpsc::UnboundedSender<OutboundDatagram>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            seed,
            settings,
            lifecycle: Mutex::new(Lifecycle {
                state: RoomState::Empty,
                ticker: None,
            }),
            members: Mutex::new(Members::default()),
            frames: Mutex::new(FrameLog::default()),
            outbound,
        })
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn seed(&self) -> i32 {
        self.seed
    }

    pub fn tick_rate(&self) -> u32 {
        let secs = self.settings.tick_interval.as_secs_f64();
        if secs > 0.0 {
            (1.0 / secs).round() as u32
        } else {
            0
        }
    }

    pub fn state(&self) -> RoomState {
        self.lifecycle.lock().state
    }

    pub fn is_ticking(&self) -> bool {
        self.lifecycle
            .lock()
            .ticker
            .as_ref()
            .map_or(false, |ticker| !ticker.is_finished())
    }

    /// Adds the player or returns the slot it already holds
    ///
    /// The first join moves the room from `Empty` to `Active`.
    pub fn join(self: &Arc<Self>, player_id: PlayerId) -> Result<u32, ServerError> {
        let mut lifecycle = self.lifecycle.lock();
        if matches!(lifecycle.state, RoomState::Draining | RoomState::Closed) {
            return Err(ServerError::RoomClosed(self.id));
        }

        let index = {
            let mut members = self.members.lock();
            match members.by_player.get(&player_id) {
                Some(member) => member.index,
                None => {
                    let index = members.next_index;
                    members.next_index += 1;
                    members.by_player.insert(
                        player_id,
                        Member {
                            player_id,
                            index,
                            endpoint: None,
                            run_frame: 0,
                            playing: false,
                        },
                    );
                    info!("Player {} joined room {} as index {}", player_id, self.id, index);
                    index
                }
            }
        };

        self.ensure_ticking(&mut lifecycle);
        Ok(index)
    }

    /// Binds the member's UDP endpoint and marks it playing
    ///
    /// Repeating the call with the same endpoint changes nothing.
    pub fn set_player_state(
        self: &Arc<Self>,
        player_id: PlayerId,
        endpoint: SocketAddr,
    ) -> Result<(), ServerError> {
        let mut lifecycle = self.lifecycle.lock();
        if matches!(lifecycle.state, RoomState::Draining | RoomState::Closed) {
            return Err(ServerError::RoomClosed(self.id));
        }

        {
            let mut members = self.members.lock();
            let member = members
                .by_player
                .get_mut(&player_id)
                .ok_or(ServerError::UnknownMember {
                    room_id: self.id,
                    player_id,
                })?;

            if member.endpoint != Some(endpoint) || !member.playing {
                info!(
                    "Player {} in room {} bound to {}",
                    player_id, self.id, endpoint
                );
            }
            member.endpoint = Some(endpoint);
            member.playing = true;
        }

        self.ensure_ticking(&mut lifecycle);
        Ok(())
    }

    /// Takes the player out of play
    ///
    /// Returns true if nobody is left playing and the room drained.
    pub fn exit(&self, player_id: PlayerId) -> Result<bool, ServerError> {
        let mut lifecycle = self.lifecycle.lock();
        if matches!(lifecycle.state, RoomState::Draining | RoomState::Closed) {
            return Ok(true);
        }

        let drained = {
            let mut members = self.members.lock();
            let member = members
                .by_player
                .get_mut(&player_id)
                .ok_or(ServerError::UnknownMember {
                    room_id: self.id,
                    player_id,
                })?;
            member.playing = false;
            info!("Player {} left room {}", player_id, self.id);

            let anyone_playing = members.by_player.values().any(|member| member.playing);
            if !anyone_playing {
                for swept in members.by_player.keys().filter(|&&id| id != player_id) {
                    info!(
                        "Player {} not playing in room {}; dropped with the room",
                        swept, self.id
                    );
                }
                members.by_player.clear();
                members.next_index = 0;
            }
            !anyone_playing
        };

        if drained {
            self.frames.lock().clear();
            Self::stop_ticker(&mut lifecycle);
            lifecycle.state = RoomState::Draining;
            info!("Room {} drained", self.id);
        }
        Ok(drained)
    }

    /// Records a member's latest input and its acknowledged frame
    ///
    /// Samples for a room without any frame yet are rejected. The
    /// acknowledgement only moves forward and never past the newest frame.
    pub fn sample_frame(&self, sample: &FrameSample) -> Result<(), ServerError> {
        let last_frame = {
            let frames = self.frames.lock();
            if frames.frames.is_empty() {
                return Err(ServerError::NoFrameHistory(self.id));
            }
            frames.last_frame()
        };

        {
            let mut members = self.members.lock();
            let member = members
                .by_player
                .get_mut(&sample.player_id)
                .ok_or(ServerError::UnknownMember {
                    room_id: self.id,
                    player_id: sample.player_id,
                })?;
            let acknowledged = sample.client_frame.min(last_frame);
            member.run_frame = member.run_frame.max(acknowledged);
        }

        self.frames
            .lock()
            .pending
            .insert(sample.player_id, sample.input);
        Ok(())
    }

    /// Appends one frame and sends every eligible member its catch-up slice
    ///
    /// Returns the new frame id, or None if the room is not active.
    pub fn tick(&self) -> Option<FrameId> {
        let lifecycle = self.lifecycle.lock();
        if lifecycle.state != RoomState::Active {
            return None;
        }

        let frame = self.frames.lock().advance();

        let targets: Vec<(PlayerId, SocketAddr, FrameId)> = self
            .members
            .lock()
            .by_player
            .values()
            .filter(|member| member.playing)
            .filter_map(|member| {
                member
                    .endpoint
                    .map(|endpoint| (member.player_id, endpoint, member.run_frame))
            })
            .collect();

        let budget = self
            .settings
            .max_broadcast_bytes
            .saturating_sub(HEADER_LEN + BROADCAST_PREFIX_LEN);
        let (slices, newest) = {
            let frames = self.frames.lock();
            let slices: Vec<_> = targets
                .into_iter()
                .map(|(player_id, endpoint, run_frame)| {
                    let slice = frames.slice_after(run_frame, self.settings.max_catch_up_frames, budget);
                    (player_id, endpoint, slice)
                })
                .collect();
            let newest = if self.settings.mirror_to_group {
                frames.slice_after(frame - 1, 1, budget)
            } else {
                Vec::new()
            };
            (slices, newest)
        };
        drop(lifecycle);

        for (player_id, endpoint, frames) in slices {
            if frames.is_empty() {
                continue;
            }
            debug!(
                "Room {} frame {}: sending {} frame(s) to player {}",
                self.id,
                frame,
                frames.len(),
                player_id
            );
            self.publish(frames, |bytes| OutboundDatagram::unicast(endpoint, bytes));
        }

        if !newest.is_empty() {
            self.publish(newest, OutboundDatagram::multicast);
        }

        Some(frame)
    }

    fn publish(&self, frames: Vec<FrameData>, route: impl FnOnce(bytes::Bytes) -> OutboundDatagram) {
        let broadcast = FrameBroadcast {
            room_id: self.id,
            frames,
        };
        match encode_message(MessageType::FrameBroadcast, &broadcast) {
            Ok(bytes) => {
                if self.outbound.send(route(bytes)).is_err() {
                    debug!("Room {}: outbound datagram queue closed", self.id);
                }
            }
            Err(e) => warn!("Room {}: failed to encode broadcast: {}", self.id, e),
        }
    }

    /// Cancels the ticker and clears all state for process shutdown
    pub fn close(&self) {
        let mut lifecycle = self.lifecycle.lock();
        Self::stop_ticker(&mut lifecycle);
        self.members.lock().by_player.clear();
        self.frames.lock().clear();
        lifecycle.state = RoomState::Closed;
        info!("Room {} closed", self.id);
    }

    pub fn member(&self, player_id: PlayerId) -> Option<Member> {
        self.members.lock().by_player.get(&player_id).cloned()
    }

    /// Member ids in slot order
    pub fn member_ids(&self) -> Vec<PlayerId> {
        let members = self.members.lock();
        let mut entries: Vec<&Member> = members.by_player.values().collect();
        entries.sort_by_key(|member| member.index);
        entries.iter().map(|member| member.player_id).collect()
    }

    pub fn member_count(&self) -> usize {
        self.members.lock().by_player.len()
    }

    pub fn current_frame(&self) -> FrameId {
        self.frames.lock().last_frame()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().frames.len()
    }

    pub fn frames_after(&self, after: FrameId) -> Vec<FrameData> {
        self.frames.lock().slice_after(after, usize::MAX, usize::MAX)
    }

    fn ensure_ticking(self: &Arc<Self>, lifecycle: &mut Lifecycle) {
        if lifecycle.ticker.is_some() {
            return;
        }
        lifecycle.state = RoomState::Active;
        lifecycle.ticker = Some(spawn_ticker(Arc::downgrade(self), self.settings.tick_interval));
        info!(
            "Room {} started ticking every {:?}",
            self.id, self.settings.tick_interval
        );
    }

    fn stop_ticker(lifecycle: &mut Lifecycle) {
        if let Some(ticker) = lifecycle.ticker.take() {
            ticker.abort();
        }
    }
}

/// Drives `Room::tick` at a fixed period until the room goes away
fn spawn_ticker(room: Weak<Room>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            let Some(room) = room.upgrade() else {
                break;
            };
            match panic::catch_unwind(AssertUnwindSafe(|| room.tick())) {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => error!("Room {}: tick panicked, continuing", room.id),
            }
        }
    })
}
