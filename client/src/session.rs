//! Login, match and frame-sync flow of one client

use crate::correlator::{CorrelatorError, RequestCorrelator, WaitSignal};
use crate::lockstep::FrameDriver;
use crate::network::{LinkError, TcpLink, UdpLink};
use crate::ClientConfig;
use log::{debug, info, warn};
use serde::Serialize;
use shared::protocol::{
    FrameBroadcast, JoinResult, JoinRoomRequest, JoinRoomResponse, LoginRequest, LoginResponse,
    MatchRequest, MatchResponse, MatchState, PostUdpAddress,
};
use shared::{Envelope, FrameId, MessageType, PlayerId, RoomId};
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;
use tokio::net::lookup_host;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Correlator(#[from] CorrelatorError),
    #[error("no reply to {0:?} from the server")]
    TimedOut(MessageType),
    #[error("match request was rejected")]
    MatchRejected,
    #[error("joining room {0} failed")]
    JoinRejected(RoomId),
    #[error("not logged in")]
    NotLoggedIn,
    #[error("not in a match")]
    NotMatched,
    #[error("could not resolve {0}")]
    Resolve(String),
}

/// Where and how to play, as granted by the server
#[derive(Debug, Clone, PartialEq)]
pub struct MatchInfo {
    pub room_id: RoomId,
    pub player_index: u32,
    pub tick_rate: u32,
    pub random_seed: i32,
    pub udp_addr: SocketAddr,
    pub players: Vec<PlayerId>,
}

/// Counters from a frame-sync run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub frames_consumed: u32,
    pub last_frame: FrameId,
    pub samples_sent: u32,
    pub broadcasts: u32,
    pub waiting_signals: u32,
}

pub struct ClientSession {
    config: ClientConfig,
    link: TcpLink,
    correlator: RequestCorrelator,
    signals: mpsc::UnboundedReceiver<WaitSignal>,
    player_id: Option<PlayerId>,
    matched: Option<MatchInfo>,
}

impl ClientSession {
    pub async fn connect(config: ClientConfig) -> Result<Self, SessionError> {
        let link = TcpLink::connect(config.tcp_addr()).await?;
        let (correlator, signals) =
            RequestCorrelator::new(link.outbound(), config.soft_timeout, config.hard_timeout);

        info!("Connected to {}", link.peer_addr());
        Ok(Self {
            config,
            link,
            correlator,
            signals,
            player_id: None,
            matched: None,
        })
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        self.player_id
    }

    pub fn match_info(&self) -> Option<&MatchInfo> {
        self.matched.as_ref()
    }

    pub async fn login(&mut self, account: &str) -> Result<PlayerId, SessionError> {
        let reply = self
            .request(
                MessageType::LoginRequest,
                &LoginRequest {
                    account: account.to_string(),
                },
            )
            .await?;
        let response: LoginResponse = reply.decode_payload().map_err(LinkError::from)?;

        info!(
            "Logged in as '{}' (player {})",
            response.account, response.player_id
        );
        self.player_id = Some(response.player_id);
        Ok(response.player_id)
    }

    pub async fn find_match(&mut self) -> Result<MatchInfo, SessionError> {
        if self.player_id.is_none() {
            return Err(SessionError::NotLoggedIn);
        }

        let reply = self.request(MessageType::MatchRequest, &MatchRequest).await?;
        let response: MatchResponse = reply.decode_payload().map_err(LinkError::from)?;
        if response.state == MatchState::Rejected {
            return Err(SessionError::MatchRejected);
        }

        let udp_addr = self
            .resolve_udp(&response.udp_host, response.udp_port)
            .await?;
        let info = MatchInfo {
            room_id: response.room_id,
            player_index: response.player_index,
            tick_rate: response.tick_rate,
            random_seed: response.random_seed,
            udp_addr,
            players: response.players,
        };
        info!(
            "Matched into room {} as index {} (seed {}, {} ticks/s, frames via {})",
            info.room_id, info.player_index, info.random_seed, info.tick_rate, info.udp_addr
        );
        self.matched = Some(info.clone());
        Ok(info)
    }

    /// Opens the UDP link to the endpoint granted by the match
    pub async fn open_frame_channel(&self) -> Result<UdpLink, SessionError> {
        let info = self.matched.as_ref().ok_or(SessionError::NotMatched)?;
        Ok(UdpLink::connect(info.udp_addr).await?)
    }

    /// Opens a UDP link to the control host without a match
    pub async fn open_direct_channel(&self, udp_port: u16) -> Result<UdpLink, SessionError> {
        let addr = self.resolve_udp(&self.config.server_host, udp_port).await?;
        Ok(UdpLink::connect(addr).await?)
    }

    /// Joins a room over UDP, bypassing the match room
    pub async fn join_room(
        &mut self,
        udp: &mut UdpLink,
        room_id: RoomId,
    ) -> Result<MatchInfo, SessionError> {
        let player_id = self.player_id.ok_or(SessionError::NotLoggedIn)?;
        udp.send(
            MessageType::JoinRoom,
            &JoinRoomRequest { room_id, player_id },
        )
        .await?;

        let deadline = Instant::now() + self.config.soft_timeout + self.config.hard_timeout;
        let response = loop {
            let envelope = match time::timeout_at(deadline, udp.recv()).await {
                Ok(Ok(envelope)) => envelope,
                Ok(Err(LinkError::Codec(e))) => {
                    warn!("Dropping malformed datagram: {}", e);
                    continue;
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(SessionError::TimedOut(MessageType::JoinRoom)),
            };
            if envelope.kind() != Some(MessageType::JoinRoomResponse) {
                debug!("Ignoring datagram type {} while joining", envelope.message_type);
                continue;
            }
            let response: JoinRoomResponse = envelope.decode_payload().map_err(LinkError::from)?;
            if response.room_id == room_id {
                break response;
            }
        };

        if response.result == JoinResult::Failed {
            return Err(SessionError::JoinRejected(room_id));
        }

        let info = MatchInfo {
            room_id,
            player_index: response.player_index,
            tick_rate: response.tick_rate,
            random_seed: response.random_seed,
            udp_addr: udp.peer_addr()?,
            players: Vec::new(),
        };
        info!(
            "Joined room {} as index {} (seed {})",
            room_id, info.player_index, info.random_seed
        );
        self.matched = Some(info.clone());
        Ok(info)
    }

    /// Runs the lockstep loop until `frames` confirmed frames were simulated
    ///
    /// `script` supplies the axes for the frame about to be simulated. The
    /// UDP address is re-posted every tick until the first broadcast proves
    /// the server knows where to send frames.
    pub async fn run_frames<F>(
        &mut self,
        udp: &mut UdpLink,
        frames: u32,
        mut script: F,
    ) -> Result<RunReport, SessionError>
    where
        F: FnMut(FrameId) -> (f32, f32),
    {
        let player_id = self.player_id.ok_or(SessionError::NotLoggedIn)?;
        let info = self.matched.clone().ok_or(SessionError::NotMatched)?;
        let post = PostUdpAddress {
            room_id: info.room_id,
            player_id,
        };

        let mut driver = FrameDriver::new(info.tick_rate, player_id, info.room_id);
        let mut report = RunReport::default();
        let mut bound = false;

        if let Err(e) = udp.send(MessageType::PostUdpAddress, &post).await {
            warn!("Failed to post UDP address: {}", e);
        }

        let mut render = time::interval(self.config.render_interval);
        render.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last = Instant::now();

        while report.frames_consumed < frames {
            tokio::select! {
                datagram = udp.recv() => match datagram {
                    Ok(envelope) => {
                        if envelope.kind() != Some(MessageType::FrameBroadcast) {
                            debug!("Ignoring datagram type {}", envelope.message_type);
                            continue;
                        }
                        match envelope.decode_payload::<FrameBroadcast>() {
                            Ok(broadcast) => {
                                bound = true;
                                report.broadcasts += 1;
                                driver.receive(broadcast);
                            }
                            Err(e) => warn!("Dropping undecodable broadcast: {}", e),
                        }
                    }
                    Err(e) => warn!("Frame link receive failed: {}", e),
                },

                _ = render.tick() => {
                    let now = Instant::now();
                    let elapsed = now - last;
                    last = now;

                    let (up, right) = script(driver.next_frame_id());
                    driver.set_input(up, right);

                    let Some(output) = driver.fixed_update(elapsed) else {
                        continue;
                    };
                    if let Some(frame) = output.frame {
                        report.frames_consumed += 1;
                        report.last_frame = frame.frame;
                        debug!("Simulating frame {} with {} inputs", frame.frame, frame.inputs.len());
                    }

                    if !bound {
                        if let Err(e) = udp.send(MessageType::PostUdpAddress, &post).await {
                            warn!("Failed to post UDP address: {}", e);
                        }
                    }
                    match udp.send(MessageType::FrameSample, &output.sample).await {
                        Ok(()) => report.samples_sent += 1,
                        Err(e) => warn!("Failed to send frame sample: {}", e),
                    }
                },

                Some(signal) = self.signals.recv() => {
                    report.waiting_signals += 1;
                    log_signal(signal);
                },
            }
        }

        info!(
            "Simulated {} frames (last {}), sent {} samples, received {} broadcasts",
            report.frames_consumed, report.last_frame, report.samples_sent, report.broadcasts
        );
        Ok(report)
    }

    /// Sends a request and waits until its reply arrives or the request is abandoned
    async fn request<T: Serialize>(
        &mut self,
        kind: MessageType,
        message: &T,
    ) -> Result<Envelope, SessionError> {
        self.correlator.send(kind, message)?;
        let expected = kind.reply();

        loop {
            tokio::select! {
                envelope = self.link.recv() => {
                    let envelope = envelope?;
                    match envelope.kind() {
                        Some(reply) if self.correlator.on_reply(reply) => {
                            if Some(reply) == expected {
                                return Ok(envelope);
                            }
                        }
                        _ => debug!("Ignoring control message type {}", envelope.message_type),
                    }
                },

                Some(signal) = self.signals.recv() => {
                    log_signal(signal);
                    if let WaitSignal::StopWaiting(request) = signal {
                        if request == kind && self.correlator.pending() != Some(kind) {
                            return Err(SessionError::TimedOut(kind));
                        }
                    }
                },
            }
        }
    }

    /// Resolves the advertised UDP endpoint, falling back to the control peer
    /// when the server advertises a wildcard address
    async fn resolve_udp(&self, host: &str, port: u16) -> Result<SocketAddr, SessionError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            let ip = if ip.is_unspecified() {
                self.link.peer_addr().ip()
            } else {
                ip
            };
            return Ok(SocketAddr::new(ip, port));
        }

        lookup_host((host, port))
            .await
            .map_err(LinkError::from)?
            .next()
            .ok_or_else(|| SessionError::Resolve(format!("{}:{}", host, port)))
    }
}

fn log_signal(signal: WaitSignal) {
    match signal {
        WaitSignal::ShowWaiting(request) => info!("Waiting for server ({:?})...", request),
        WaitSignal::StopWaiting(request) => info!("Stopped waiting for {:?}", request),
    }
}
