//! Request handlers registered with the dispatcher

use crate::connection_manager::{Connection, PlayerSession};
use crate::context::ServerContext;
use crate::error::ServerError;
use log::{debug, info};
use shared::protocol::{
    FrameSample, JoinResult, JoinRoomRequest, JoinRoomResponse, LoginRequest, LoginResponse,
    MatchResponse, MatchState, PostUdpAddress,
};
use shared::{Envelope, MessageType};
use std::net::SocketAddr;
use std::sync::Arc;

pub fn login(
    context: &ServerContext,
    connection: &Arc<Connection>,
    envelope: &Envelope,
) -> Result<(), ServerError> {
    let request: LoginRequest = envelope.decode_payload()?;
    let account = request.account.trim();
    if account.is_empty() {
        return Err(ServerError::InvalidRequest("empty account name"));
    }

    let player = context.players.login(account);
    let previous = connection.bind_session(PlayerSession {
        player_id: player.player_id,
        account: player.account.clone(),
    });
    if let Some(previous) = previous.filter(|p| p.player_id != player.player_id) {
        info!(
            "Connection {} switched from player {} to {}",
            connection.id, previous.player_id, player.player_id
        );
        context.release_player(previous.player_id);
    }

    // The account moved to this connection; the old one must not log it out
    for stale in context
        .connections
        .others_bound_to(player.player_id, connection.id)
    {
        stale.take_session();
        stale.close();
        info!(
            "Connection {} superseded by connection {} for player {}",
            stale.id, connection.id, player.player_id
        );
    }

    info!(
        "Connection {} logged in as '{}' (player {})",
        connection.id, player.account, player.player_id
    );
    connection.send_message(
        MessageType::LoginResponse,
        &LoginResponse {
            player_id: player.player_id,
            account: player.account,
        },
    )
}

pub fn match_request(
    context: &ServerContext,
    connection: &Arc<Connection>,
    _envelope: &Envelope,
) -> Result<(), ServerError> {
    let Some(session) = connection.session() else {
        connection.send_message(MessageType::MatchResponse, &MatchResponse::rejected())?;
        return Err(ServerError::NotLoggedIn(connection.id));
    };

    let room_id = context.config.match_room;
    let outcome = context.rooms.join_room(room_id, session.player_id)?;
    context.players.set_room(session.player_id, Some(room_id));

    info!(
        "Player {} matched into room {} as index {}",
        session.player_id, room_id, outcome.player_index
    );
    connection.send_message(
        MessageType::MatchResponse,
        &MatchResponse {
            state: MatchState::Matched,
            udp_host: context.config.advertised_udp_host().to_string(),
            udp_port: context.config.udp_port,
            room_id,
            player_index: outcome.player_index,
            tick_rate: context.config.tick_rate,
            random_seed: outcome.room.seed(),
            players: outcome.room.member_ids(),
        },
    )
}

pub fn post_udp_address(
    context: &ServerContext,
    from: SocketAddr,
    envelope: &Envelope,
) -> Result<(), ServerError> {
    let request: PostUdpAddress = envelope.decode_payload()?;
    context
        .rooms
        .set_player_state(request.room_id, request.player_id, from)
}

pub fn frame_sample(
    context: &ServerContext,
    from: SocketAddr,
    envelope: &Envelope,
) -> Result<(), ServerError> {
    let sample: FrameSample = envelope.decode_payload()?;
    debug!(
        "Sample from player {} ({}) in room {}, confirmed frame {}",
        sample.player_id, from, sample.room_id, sample.client_frame
    );
    context.rooms.sample_frame(&sample)
}

pub fn join_room(
    context: &ServerContext,
    from: SocketAddr,
    envelope: &Envelope,
) -> Result<(), ServerError> {
    let request: JoinRoomRequest = envelope.decode_payload()?;

    if context.players.get(request.player_id).is_none() {
        context.send_datagram(
            from,
            MessageType::JoinRoomResponse,
            &JoinRoomResponse {
                result: JoinResult::Failed,
                room_id: request.room_id,
                player_index: 0,
                random_seed: 0,
                tick_rate: 0,
            },
        )?;
        return Err(ServerError::UnknownPlayer(request.player_id));
    }

    let outcome = context.rooms.join_room(request.room_id, request.player_id)?;
    context
        .players
        .set_room(request.player_id, Some(request.room_id));

    context.send_datagram(
        from,
        MessageType::JoinRoomResponse,
        &JoinRoomResponse {
            result: JoinResult::Joined,
            room_id: request.room_id,
            player_index: outcome.player_index,
            random_seed: outcome.room.seed(),
            tick_rate: context.config.tick_rate,
        },
    )
}
