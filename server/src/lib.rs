//! # Frame-Sync Server Library
//!
//! This library provides the room-based, frame-synchronized session server for
//! lockstep multiplayer games. Clients log in and get matched over a reliable
//! TCP control channel, then exchange inputs and confirmed frames over UDP while
//! each room advances its own authoritative frame clock.
//!
//! ## Core Responsibilities
//!
//! ### Session Control
//! Handles the complete lifecycle of client connections including:
//! - Accepting TCP connections up to a configured limit
//! - Login by account name and matchmaking into the configured room
//! - Disconnection handling and room-exit cleanup
//!
//! ### Frame Authority
//! Every active room ticks at a fixed rate regardless of whether new input
//! arrived. Each tick seals the inputs observed since the previous tick into an
//! immutable `FrameData` and appends it to the room's log.
//!
//! ### Catch-Up Delivery
//! Each playing member receives, every tick, all frames after the last frame it
//! acknowledged. Because delivery is keyed by frame index, a lost or reordered
//! datagram is repaired by the next tick's slice without retransmission logic.
//!
//! ## Architecture Design
//!
//! ### Task Per Concern
//! The server is event-driven on the tokio runtime:
//! - **Accept loop**: registers connections and spawns their tasks
//! - **Connection reader**: de-frames bytes and dispatches envelopes in order
//! - **Connection writer**: drains a bounded per-connection queue
//! - **UDP receiver / sender**: one socket for all datagram traffic
//! - **Room ticker**: one periodic task per active room
//!
//! ### Explicit Context
//! All shared state lives in a [`context::ServerContext`] built at startup and
//! passed to every task. The room table and connection table are each guarded
//! by their own lock; rooms guard membership and frame log separately.
//!
//! ### Static Dispatch Tables
//! Message types map to plain handler functions through two fixed tables, one
//! per transport. Unknown types are logged and dropped. Handler errors and
//! panics are contained per message.
//!
//! ## Module Organization
//!
//! ### Configuration (`config`)
//! Command-line configuration and multicast game scopes.
//!
//! ### Connection Manager (`connection_manager`)
//! Live TCP connections, their outbound queues and bound player sessions.
//!
//! ### Network (`network`, `udp`)
//! Socket binding, the accept loop, per-connection tasks and the datagram
//! transport.
//!
//! ### Dispatch (`dispatch`, `handlers`)
//! Routing of decoded envelopes to login, match, address, sample and join
//! handlers.
//!
//! ### Rooms (`room`, `room_manager`)
//! Room membership, the append-only frame log, the tick scheduler and the
//! process-wide room table.
//!
//! ### Players (`players`)
//! Account to player id registry.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!
//!     // Serve until Ctrl+C, then close every room and connection
//!     server
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection_manager;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod network;
pub mod players;
pub mod room;
pub mod room_manager;
pub mod udp;

pub use config::{GameScope, ServerConfig};
pub use context::ServerContext;
pub use error::ServerError;
pub use network::Server;
