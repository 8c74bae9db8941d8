//! # Frame-Sync Client Library
//!
//! Client side of the lockstep protocol. A client logs in and asks for a
//! match over the TCP control channel, then switches to UDP: it reports its
//! source endpoint to the room and from then on exchanges one input sample per
//! local tick for catch-up slices of server-confirmed frames.
//!
//! ## Architecture Overview
//!
//! ### Request Correlation
//! Control requests are serialized through a single-slot correlator. While a
//! request waits for its reply no other request is sent. If the reply is slow
//! a "waiting for server" signal is raised, and if it stays away the request
//! is abandoned and the waiting signal is withdrawn.
//!
//! ### Lockstep Simulation
//! The client never simulates ahead of the server. Each local tick consumes at
//! most one confirmed frame, in frame order, and the simulation stalls when the
//! next frame has not arrived yet. Lost broadcasts are repaired by the server
//! resending everything after the last frame the client acknowledged.
//!
//! ## Module Organization
//!
//! ### Correlator Module (`correlator`)
//! - Single pending request with rejection of concurrent sends
//! - Soft and hard timeout windows with UI signals
//!
//! ### Input Module (`input`)
//! - Change detection on directional axes
//! - Sub-frame timing of the latched command
//!
//! ### Frame Buffer Module (`frame_buffer`)
//! - Ordered buffering of confirmed frames with duplicate suppression
//! - Last confirmed frame id for acknowledgements
//!
//! ### Lockstep Module (`lockstep`)
//! - Fixed-tick accumulator driving frame consumption and sample production
//!
//! ### Network Module (`network`)
//! - Framed TCP control link and connected UDP frame link
//!
//! ### Session Module (`session`)
//! - Login and match flow, frame-sync loop
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::session::ClientSession;
//! use client::ClientConfig;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = ClientSession::connect(ClientConfig::default()).await?;
//! session.login("alice").await?;
//! session.find_match().await?;
//!
//! let mut udp = session.open_frame_channel().await?;
//! let report = session.run_frames(&mut udp, 100, |_| (0.0, 1.0)).await?;
//! println!("simulated up to frame {}", report.last_frame);
//! # Ok(())
//! # }
//! ```

pub mod correlator;
pub mod frame_buffer;
pub mod input;
pub mod lockstep;
pub mod network;
pub mod session;

use shared::DEFAULT_TCP_PORT;
use std::time::Duration;

/// Connection settings and timing of the local loop
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_host: String,
    pub tcp_port: u16,
    /// Wait before the "waiting for server" signal
    pub soft_timeout: Duration,
    /// Further wait before a request is abandoned
    pub hard_timeout: Duration,
    /// Cadence of the local render loop that samples input
    pub render_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            tcp_port: DEFAULT_TCP_PORT,
            soft_timeout: Duration::from_secs(3),
            hard_timeout: Duration::from_secs(3),
            render_interval: Duration::from_millis(16),
        }
    }
}

impl ClientConfig {
    pub fn tcp_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.tcp_port)
    }
}
