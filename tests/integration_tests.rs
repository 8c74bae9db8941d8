//! Integration tests for the frame-sync server and client
//!
//! These tests run a real server on loopback ports and drive it with the
//! client library or raw sockets.

use client::session::{ClientSession, SessionError};
use client::ClientConfig;
use server::room::RoomSettings;
use server::room_manager::RoomManager;
use server::{Server, ServerConfig, ServerContext, ServerError};
use shared::codec::{decode_datagram, encode_message};
use shared::protocol::{FrameBroadcast, FrameInput, FrameSample, InputCommand, LoginRequest};
use shared::{MessageType, RoomId};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct TestServer {
    tcp_addr: SocketAddr,
    udp_addr: SocketAddr,
    context: Arc<ServerContext>,
    stop: Option<oneshot::Sender<()>>,
}

impl TestServer {
    async fn start() -> Self {
        init_logging();
        let server = Server::bind(ServerConfig::ephemeral()).await.unwrap();
        let tcp_addr = server.tcp_addr().unwrap();
        let udp_addr = server.udp_addr().unwrap();
        let context = server.context();

        let (stop, stopped) = oneshot::channel::<()>();
        tokio::spawn(server.run_until(async move {
            let _ = stopped.await;
        }));

        Self {
            tcp_addr,
            udp_addr,
            context,
            stop: Some(stop),
        }
    }

    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            tcp_port: self.tcp_addr.port(),
            ..ClientConfig::default()
        }
    }

    fn match_room(&self) -> RoomId {
        self.context.config.match_room
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Polls `condition` until it holds or two seconds pass
async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// END-TO-END FLOW TESTS
mod session_tests {
    use super::*;

    /// Login, match and ten lockstep frames against a live server
    #[tokio::test]
    async fn login_match_and_frame_sync() {
        let server = TestServer::start().await;

        let mut session = ClientSession::connect(server.client_config()).await.unwrap();
        let player_id = session.login("alice").await.unwrap();
        let info = session.find_match().await.unwrap();

        assert_eq!(info.room_id, server.match_room());
        assert_eq!(info.player_index, 0);
        assert_eq!(info.tick_rate, 20);
        assert_eq!(info.players, vec![player_id]);
        assert_eq!(info.udp_addr, server.udp_addr);

        let mut udp = session.open_frame_channel().await.unwrap();
        let report = timeout(
            Duration::from_secs(10),
            session.run_frames(&mut udp, 10, |frame| {
                if frame % 2 == 0 {
                    (1.0, 0.0)
                } else {
                    (0.0, 1.0)
                }
            }),
        )
        .await
        .expect("frame sync stalled")
        .unwrap();

        assert_eq!(report.frames_consumed, 10);
        assert_eq!(report.last_frame, 10);
        assert!(report.samples_sent >= 10);
        assert!(report.broadcasts >= 1);

        let room = server.context.rooms.get(info.room_id).unwrap();
        let member = room.member(player_id).unwrap();
        assert!(member.playing);
        assert!(member.run_frame >= 1);

        let frames = room.frames_after(0);
        assert!(frames
            .iter()
            .filter_map(|frame| frame.input_of(player_id))
            .any(|input| input.command.is_some()));
    }

    /// Two players matched into the same room share its seed
    #[tokio::test]
    async fn two_players_share_a_room() {
        let server = TestServer::start().await;

        let mut alice = ClientSession::connect(server.client_config()).await.unwrap();
        let mut bob = ClientSession::connect(server.client_config()).await.unwrap();
        let alice_id = alice.login("alice").await.unwrap();
        let bob_id = bob.login("bob").await.unwrap();
        assert_ne!(alice_id, bob_id);

        let first = alice.find_match().await.unwrap();
        let second = bob.find_match().await.unwrap();

        assert_eq!(first.room_id, second.room_id);
        assert_eq!(first.random_seed, second.random_seed);
        assert_eq!(first.player_index, 0);
        assert_eq!(second.player_index, 1);
        assert_eq!(second.players, vec![alice_id, bob_id]);

        // Matching again keeps the slot
        let again = alice.find_match().await.unwrap();
        assert_eq!(again.player_index, 0);
    }

    /// The same account always maps to the same player id
    #[tokio::test]
    async fn relogin_keeps_player_id() {
        let server = TestServer::start().await;

        let mut first = ClientSession::connect(server.client_config()).await.unwrap();
        let id = first.login("carol").await.unwrap();
        drop(first);

        let mut second = ClientSession::connect(server.client_config()).await.unwrap();
        assert_eq!(second.login("carol").await.unwrap(), id);
        assert_ne!(second.login("dave").await.unwrap(), id);
    }

    /// Joining a room over UDP, then playing in it
    #[tokio::test]
    async fn join_room_over_udp() {
        let server = TestServer::start().await;

        let mut session = ClientSession::connect(server.client_config()).await.unwrap();
        session.login("erin").await.unwrap();

        let mut udp = session
            .open_direct_channel(server.udp_addr.port())
            .await
            .unwrap();
        let info = session.join_room(&mut udp, 42).await.unwrap();
        assert_eq!(info.room_id, 42);
        assert_eq!(info.player_index, 0);
        assert_eq!(
            info.random_seed,
            server.context.rooms.get(42).unwrap().seed()
        );

        let report = timeout(
            Duration::from_secs(10),
            session.run_frames(&mut udp, 3, |_| (0.0, 0.0)),
        )
        .await
        .expect("frame sync stalled")
        .unwrap();
        assert_eq!(report.last_frame, 3);
    }

    #[tokio::test]
    async fn match_requires_login() {
        let server = TestServer::start().await;

        let mut session = ClientSession::connect(server.client_config()).await.unwrap();
        assert!(matches!(
            session.find_match().await,
            Err(SessionError::NotLoggedIn)
        ));
        assert!(server.context.rooms.is_empty());
    }
}

/// ROOM LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    /// Room 7 at 20 ticks per second with one acknowledging member
    #[tokio::test(start_paused = true)]
    async fn room_seven_broadcasts_only_new_frames() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let rooms = RoomManager::new(RoomSettings::default(), tx);
        let endpoint: SocketAddr = "127.0.0.1:40000".parse().unwrap();

        let outcome = rooms.join_room(7, 1).unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.player_index, 0);
        rooms.set_player_state(7, 1, endpoint).unwrap();

        for expected in 1..=10 {
            let datagram = rx.recv().await.unwrap();
            let envelope = decode_datagram(&datagram.bytes).unwrap();
            assert_eq!(envelope.kind(), Some(MessageType::FrameBroadcast));

            let broadcast: FrameBroadcast = envelope.decode_payload().unwrap();
            let ids: Vec<_> = broadcast.frames.iter().map(|frame| frame.frame).collect();
            assert_eq!(ids, vec![expected]);

            rooms
                .sample_frame(&FrameSample {
                    player_id: 1,
                    room_id: 7,
                    input: FrameInput::default(),
                    client_frame: expected,
                })
                .unwrap();
        }

        sleep(Duration::from_millis(25)).await;
        let room = rooms.get(7).unwrap();
        assert_eq!(room.frame_count(), 10);
        assert!(rx.try_recv().is_err());
    }

    /// A sample for a room that does not exist is dropped
    #[tokio::test]
    async fn sample_for_missing_room_is_dropped() {
        let server = TestServer::start().await;

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sample = FrameSample {
            player_id: 5,
            room_id: 99,
            input: FrameInput {
                sub_frame_time: 0.5,
                command: Some(InputCommand {
                    up: 1.0,
                    right: 0.0,
                }),
            },
            client_frame: 0,
        };
        let bytes = encode_message(MessageType::FrameSample, &sample).unwrap();
        socket.send_to(&bytes, server.udp_addr).await.unwrap();
        // Garbage too, which must not take the receiver down
        socket.send_to(&[1, 2, 3], server.udp_addr).await.unwrap();

        sleep(Duration::from_millis(100)).await;
        assert!(server.context.rooms.get(99).is_none());
        assert!(matches!(
            server.context.rooms.sample_frame(&sample),
            Err(ServerError::UnknownRoom(99))
        ));

        // Still serving
        let mut session = ClientSession::connect(server.client_config()).await.unwrap();
        assert!(session.login("frank").await.is_ok());
    }

    /// Dropping the only client drains and evicts its room
    #[tokio::test]
    async fn disconnect_drains_room() {
        let server = TestServer::start().await;

        let mut session = ClientSession::connect(server.client_config()).await.unwrap();
        let player_id = session.login("gina").await.unwrap();
        let info = session.find_match().await.unwrap();
        let room = server.context.rooms.get(info.room_id).unwrap();
        assert!(room.is_ticking());

        drop(session);

        let context = Arc::clone(&server.context);
        assert!(eventually(|| context.rooms.get(info.room_id).is_none()).await);
        assert!(!room.is_ticking());
        assert_eq!(room.frame_count(), 0);
        assert!(!server.context.players.is_online(player_id));
        assert!(server.context.connections.is_empty());

        // A new match recreates the room
        let mut session = ClientSession::connect(server.client_config()).await.unwrap();
        session.login("gina").await.unwrap();
        let again = session.find_match().await.unwrap();
        assert_eq!(again.player_index, 0);
        assert!(!Arc::ptr_eq(
            &room,
            &server.context.rooms.get(again.room_id).unwrap()
        ));
    }

    /// Shutdown closes rooms before connections
    #[tokio::test]
    async fn shutdown_closes_everything() {
        let mut server = TestServer::start().await;

        let mut session = ClientSession::connect(server.client_config()).await.unwrap();
        session.login("hank").await.unwrap();
        let info = session.find_match().await.unwrap();
        let room = server.context.rooms.get(info.room_id).unwrap();

        server.stop.take().unwrap().send(()).unwrap();

        let context = Arc::clone(&server.context);
        assert!(eventually(|| context.rooms.is_empty() && context.connections.is_empty()).await);
        assert!(!room.is_ticking());

        let result = timeout(Duration::from_secs(2), session.login("hank")).await;
        assert!(matches!(result, Ok(Err(_))));
    }
}

/// RAW PROTOCOL TESTS
mod protocol_tests {
    use super::*;
    use shared::FrameDecoder;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    /// Several requests in one write are answered in order
    #[tokio::test]
    async fn coalesced_requests_are_answered_in_order() {
        let server = TestServer::start().await;
        let mut stream = TcpStream::connect(server.tcp_addr).await.unwrap();

        let mut batch = Vec::new();
        for account in ["ivy", "jack", "kim"] {
            let login = LoginRequest {
                account: account.to_string(),
            };
            batch.extend_from_slice(&encode_message(MessageType::LoginRequest, &login).unwrap());
        }
        stream.write_all(&batch).await.unwrap();

        let mut decoder = FrameDecoder::new();
        let mut replies = Vec::new();
        let mut buf = [0u8; 1024];
        while replies.len() < 3 {
            let n = timeout(Duration::from_secs(2), stream.read(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert!(n > 0);
            decoder.extend(&buf[..n]);
            replies.extend(decoder.drain().unwrap());
        }

        let accounts: Vec<String> = replies
            .iter()
            .map(|reply| {
                reply
                    .decode_payload::<shared::protocol::LoginResponse>()
                    .unwrap()
                    .account
            })
            .collect();
        assert_eq!(accounts, vec!["ivy", "jack", "kim"]);
    }

    /// A negative length is fatal to the connection, not the server
    #[tokio::test]
    async fn negative_length_closes_connection() {
        let server = TestServer::start().await;
        let mut stream = TcpStream::connect(server.tcp_addr).await.unwrap();

        let mut header = Vec::new();
        header.extend_from_slice(&(-1i32).to_le_bytes());
        header.extend_from_slice(&1u32.to_le_bytes());
        stream.write_all(&header).await.unwrap();

        let mut buf = [0u8; 16];
        let read = timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));

        let mut session = ClientSession::connect(server.client_config()).await.unwrap();
        assert!(session.login("lena").await.is_ok());
    }
}
