//! Performance benchmarks and stress tests
//!
//! Bounds are generous so they hold on slow CI machines in debug builds.

use client::frame_buffer::FrameBuffer;
use server::room::{Room, RoomSettings};
use shared::codec::{decode_datagram, encode_message};
use shared::protocol::{
    FrameBroadcast, FrameData, FrameInput, FrameSample, InputCommand, PlayerFrameInput,
};
use shared::{FrameDecoder, MessageType};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

fn busy_frame(frame: u32, players: u64) -> FrameData {
    FrameData {
        frame,
        inputs: (1..=players)
            .map(|player_id| PlayerFrameInput {
                player_id,
                input: FrameInput {
                    sub_frame_time: 0.5,
                    command: Some(InputCommand {
                        up: 1.0,
                        right: -1.0,
                    }),
                },
            })
            .collect(),
    }
}

/// Benchmark encoding and decoding of full catch-up broadcasts
#[test]
fn benchmark_broadcast_codec() {
    let broadcast = FrameBroadcast {
        room_id: 7,
        frames: (1..=32).map(|frame| busy_frame(frame, 4)).collect(),
    };

    let start = Instant::now();

    for _ in 0..2_000 {
        let bytes = encode_message(MessageType::FrameBroadcast, &broadcast).unwrap();
        let envelope = decode_datagram(&bytes).unwrap();
        let decoded: FrameBroadcast = envelope.decode_payload().unwrap();
        assert_eq!(decoded.frames.len(), 32);
    }

    let duration = start.elapsed();
    println!("2000 broadcast round trips: {:?}", duration);
    assert!(duration.as_millis() < 2000);
}

/// Stress test the stream decoder with many small envelopes fed in odd chunks
#[test]
fn stress_test_stream_decoder() {
    let sample = FrameSample {
        player_id: 3,
        room_id: 7,
        input: FrameInput::default(),
        client_frame: 100,
    };
    let one = encode_message(MessageType::FrameSample, &sample).unwrap();
    let stream: Vec<u8> = one.iter().copied().cycle().take(one.len() * 10_000).collect();

    let start = Instant::now();

    let mut decoder = FrameDecoder::new();
    let mut decoded = 0;
    for chunk in stream.chunks(37) {
        decoder.extend(chunk);
        decoded += decoder.drain().unwrap().len();
    }

    let duration = start.elapsed();
    println!("10000 envelopes streamed: {:?}", duration);
    assert_eq!(decoded, 10_000);
    assert_eq!(decoder.buffered(), 0);
    assert!(duration.as_millis() < 1000);
}

/// Benchmark room ticks with eight acknowledging members
#[tokio::test]
async fn benchmark_room_tick() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let settings = RoomSettings {
        // Keep the background ticker out of the measurement
        tick_interval: Duration::from_secs(3600),
        ..RoomSettings::default()
    };
    let room = Room::new(1, 42, settings, tx);

    for player_id in 1..=8u64 {
        room.join(player_id).unwrap();
        let endpoint: SocketAddr = format!("127.0.0.1:{}", 41000 + player_id).parse().unwrap();
        room.set_player_state(player_id, endpoint).unwrap();
    }

    let start = Instant::now();

    for _ in 0..1_000 {
        let frame = room.tick().unwrap();
        for player_id in 1..=8u64 {
            room.sample_frame(&FrameSample {
                player_id,
                room_id: 1,
                input: FrameInput::default(),
                client_frame: frame,
            })
            .unwrap();
        }
    }

    let duration = start.elapsed();
    println!("1000 ticks x 8 members: {:?}", duration);
    assert_eq!(room.frame_count(), 1_000);

    let mut datagrams = 0;
    while rx.try_recv().is_ok() {
        datagrams += 1;
    }
    assert_eq!(datagrams, 8_000);
    assert!(duration.as_millis() < 2000);
}

/// Benchmark catch-up slices for a member that never acknowledges
#[tokio::test]
async fn benchmark_capped_catch_up() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let settings = RoomSettings {
        tick_interval: Duration::from_secs(3600),
        max_catch_up_frames: 64,
        ..RoomSettings::default()
    };
    let room = Room::new(2, 42, settings, tx);
    room.join(1).unwrap();
    room.set_player_state(1, "127.0.0.1:41100".parse().unwrap())
        .unwrap();

    let start = Instant::now();

    for _ in 0..500 {
        room.tick().unwrap();
    }

    let duration = start.elapsed();
    println!("500 ticks with a silent member: {:?}", duration);

    let mut largest = 0;
    while let Ok(datagram) = rx.try_recv() {
        let broadcast: FrameBroadcast = decode_datagram(&datagram.bytes)
            .unwrap()
            .decode_payload()
            .unwrap();
        largest = largest.max(broadcast.frames.len());
    }
    assert_eq!(largest, 64);
    assert!(duration.as_millis() < 2000);
}

/// Benchmark the client frame buffer absorbing reordered, duplicated slices
#[test]
fn benchmark_frame_buffer_reordering() {
    let start = Instant::now();

    let mut buffer = FrameBuffer::new();
    for base in (0..1_000u32).rev() {
        let slice = (base * 10 + 1..=base * 10 + 20).map(FrameData::empty);
        buffer.add_confirmed_frames(slice);
    }
    let mut consumed = 0;
    while let Some(frame) = buffer.get_next_frame() {
        consumed += 1;
        assert_eq!(frame.frame, consumed);
    }

    let duration = start.elapsed();
    println!("10010 frames reordered and consumed: {:?}", duration);
    assert_eq!(consumed, 10_010);
    assert!(duration.as_millis() < 500);
}
