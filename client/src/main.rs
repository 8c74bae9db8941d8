use clap::Parser;
use client::session::ClientSession;
use client::ClientConfig;
use log::info;
use shared::{DEFAULT_TCP_PORT, DEFAULT_UDP_PORT};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1")]
    server: String,

    /// Server TCP control port
    #[arg(short = 'p', long, default_value_t = DEFAULT_TCP_PORT)]
    port: u16,

    /// Server UDP port, used with --room
    #[arg(short = 'u', long, default_value_t = DEFAULT_UDP_PORT)]
    udp_port: u16,

    /// Account name to log in with
    #[arg(short = 'a', long, default_value = "player")]
    account: String,

    /// Confirmed frames to simulate before exiting
    #[arg(short = 'f', long, default_value = "200")]
    frames: u32,

    /// Local input sample rate in Hz
    #[arg(short = 'r', long, default_value = "60")]
    sample_rate: u32,

    /// Join this room over UDP instead of asking for a match
    #[arg(long)]
    room: Option<u32>,
}

/// Scripted movement: a slow circle, one direction change every 20 frames
fn scripted_axes(frame: u32) -> (f32, f32) {
    match (frame / 20) % 4 {
        0 => (1.0, 0.0),
        1 => (0.0, 1.0),
        2 => (-1.0, 0.0),
        _ => (0.0, -1.0),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = ClientConfig {
        server_host: args.server,
        tcp_port: args.port,
        render_interval: Duration::from_secs(1) / args.sample_rate.max(1),
        ..ClientConfig::default()
    };

    info!("Starting client...");
    info!("Connecting to: {}", config.tcp_addr());

    let mut session = ClientSession::connect(config).await?;
    session.login(&args.account).await?;

    let mut udp = match args.room {
        Some(room_id) => {
            let mut udp = session.open_direct_channel(args.udp_port).await?;
            session.join_room(&mut udp, room_id).await?;
            udp
        }
        None => {
            session.find_match().await?;
            session.open_frame_channel().await?
        }
    };

    let report = session
        .run_frames(&mut udp, args.frames, scripted_axes)
        .await?;
    info!(
        "Done: {} frames simulated, {} samples sent, {} waiting signals",
        report.frames_consumed, report.samples_sent, report.waiting_signals
    );

    Ok(())
}
