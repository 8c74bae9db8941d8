//! Message-type to handler tables for both channels
//!
//! The tables are fixed lists built once at startup. Unknown types and handler
//! failures are logged and dropped so that one bad message never takes down a
//! receive loop.

use crate::connection_manager::Connection;
use crate::context::ServerContext;
use crate::error::ServerError;
use crate::handlers;
use log::{error, warn};
use shared::{Envelope, MessageType};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

pub type TcpHandler = fn(&ServerContext, &Arc<Connection>, &Envelope) -> Result<(), ServerError>;
pub type UdpHandler = fn(&ServerContext, SocketAddr, &Envelope) -> Result<(), ServerError>;

const TCP_HANDLERS: [(MessageType, TcpHandler); 2] = [
    (MessageType::LoginRequest, handlers::login as TcpHandler),
    (MessageType::MatchRequest, handlers::match_request as TcpHandler),
];

const UDP_HANDLERS: [(MessageType, UdpHandler); 3] = [
    (MessageType::PostUdpAddress, handlers::post_udp_address as UdpHandler),
    (MessageType::FrameSample, handlers::frame_sample as UdpHandler),
    (MessageType::JoinRoom, handlers::join_room as UdpHandler),
];

/// What happened to a dispatched envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    Unknown,
    Failed,
    Panicked,
}

pub struct Dispatcher {
    tcp: HashMap<MessageType, TcpHandler>,
    udp: HashMap<MessageType, UdpHandler>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            tcp: TCP_HANDLERS.into_iter().collect(),
            udp: UDP_HANDLERS.into_iter().collect(),
        }
    }

    pub fn handles_tcp(&self, kind: MessageType) -> bool {
        self.tcp.contains_key(&kind)
    }

    pub fn handles_udp(&self, kind: MessageType) -> bool {
        self.udp.contains_key(&kind)
    }

    pub fn dispatch_tcp(
        &self,
        context: &ServerContext,
        connection: &Arc<Connection>,
        envelope: &Envelope,
    ) -> Dispatch {
        let Some(handler) = envelope.kind().and_then(|kind| self.tcp.get(&kind)) else {
            warn!(
                "Connection {}: no TCP handler for message type {}",
                connection.id, envelope.message_type
            );
            return Dispatch::Unknown;
        };

        let origin = format!("connection {}", connection.id);
        run_guarded(&origin, envelope, || handler(context, connection, envelope))
    }

    pub fn dispatch_udp(
        &self,
        context: &ServerContext,
        from: SocketAddr,
        envelope: &Envelope,
    ) -> Dispatch {
        let Some(handler) = envelope.kind().and_then(|kind| self.udp.get(&kind)) else {
            warn!(
                "{}: no UDP handler for message type {}",
                from, envelope.message_type
            );
            return Dispatch::Unknown;
        };

        run_guarded(&from.to_string(), envelope, || handler(context, from, envelope))
    }
}

fn run_guarded(
    origin: &str,
    envelope: &Envelope,
    handler: impl FnOnce() -> Result<(), ServerError>,
) -> Dispatch {
    match panic::catch_unwind(AssertUnwindSafe(handler)) {
        Ok(Ok(())) => Dispatch::Handled,
        Ok(Err(e)) => {
            warn!(
                "{}: message type {} dropped: {}",
                origin, envelope.message_type, e
            );
            Dispatch::Failed
        }
        Err(_) => {
            error!(
                "{}: handler for message type {} panicked",
                origin, envelope.message_type
            );
            Dispatch::Panicked
        }
    }
}
