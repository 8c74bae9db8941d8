//! Command-line configuration for the frame-sync server

use clap::{Parser, ValueEnum};
use shared::{RoomId, DEFAULT_MATCH_ROOM, DEFAULT_TCP_PORT, DEFAULT_TICK_RATE, DEFAULT_UDP_PORT};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Reach of multicast traffic, expressed as the TTL written on outgoing group datagrams
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GameScope {
    LocalLan,
    DataCenter,
    CityWide,
    Country,
}

impl GameScope {
    pub fn ttl(self) -> u32 {
        match self {
            GameScope::LocalLan => 1,
            GameScope::DataCenter => 15,
            GameScope::CityWide => 32,
            GameScope::Country => 64,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about)]
pub struct ServerConfig {
    /// Address both sockets bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,
    /// TCP control port (login and match)
    #[clap(short = 'p', long, default_value_t = DEFAULT_TCP_PORT)]
    pub tcp_port: u16,
    /// UDP frame-sync port
    #[clap(short = 'u', long, default_value_t = DEFAULT_UDP_PORT)]
    pub udp_port: u16,
    /// UDP host advertised to clients in match responses, defaults to --host
    #[clap(long)]
    pub public_udp_host: Option<String>,
    /// Room ticks per second
    #[clap(short, long, default_value_t = DEFAULT_TICK_RATE)]
    pub tick_rate: u32,
    /// Live TCP connections allowed, also used as the listen backlog
    #[clap(short, long, default_value_t = 100)]
    pub max_connections: u32,
    /// Room every match request is placed into
    #[clap(long, default_value_t = DEFAULT_MATCH_ROOM)]
    pub match_room: RoomId,
    /// Multicast group to join, e.g. 239.192.10.1
    #[clap(long)]
    pub multicast_group: Option<Ipv4Addr>,
    #[clap(long, value_enum, default_value_t = GameScope::DataCenter)]
    pub game_scope: GameScope,
    /// Most frames carried by a single catch-up datagram
    #[clap(long, default_value_t = 256)]
    pub max_catch_up_frames: usize,
    /// Envelopes buffered per connection before it is considered stalled
    #[clap(long, default_value_t = 256)]
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            tcp_port: DEFAULT_TCP_PORT,
            udp_port: DEFAULT_UDP_PORT,
            public_udp_host: None,
            tick_rate: DEFAULT_TICK_RATE,
            max_connections: 100,
            match_room: DEFAULT_MATCH_ROOM,
            multicast_group: None,
            game_scope: GameScope::DataCenter,
            max_catch_up_frames: 256,
            outbound_queue: 256,
        }
    }
}

impl ServerConfig {
    /// Bind on loopback with OS-assigned ports
    pub fn ephemeral() -> Self {
        Self {
            tcp_port: 0,
            udp_port: 0,
            ..Self::default()
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    pub fn tcp_addr(&self) -> String {
        format!("{}:{}", self.host, self.tcp_port)
    }

    pub fn udp_addr(&self) -> String {
        format!("{}:{}", self.host, self.udp_port)
    }

    pub fn advertised_udp_host(&self) -> &str {
        self.public_udp_host.as_deref().unwrap_or(&self.host)
    }
}
