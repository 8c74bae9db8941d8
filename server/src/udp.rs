//! UDP data channel: one socket for all unicast frame-sync traffic plus an
//! optional multicast group

use crate::config::ServerConfig;
use crate::context::ServerContext;
use crate::error::ServerError;
use bytes::Bytes;
use log::{debug, error, info, warn};
use shared::codec::decode_datagram;
use shared::MAX_DATAGRAM_LEN;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Unicast(SocketAddr),
    Multicast,
}

/// A framed envelope waiting for the sender task
#[derive(Debug, Clone)]
pub struct OutboundDatagram {
    pub destination: Destination,
    pub bytes: Bytes,
}

impl OutboundDatagram {
    pub fn unicast(addr: SocketAddr, bytes: Bytes) -> Self {
        Self {
            destination: Destination::Unicast(addr),
            bytes,
        }
    }

    pub fn multicast(bytes: Bytes) -> Self {
        Self {
            destination: Destination::Multicast,
            bytes,
        }
    }
}

pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    group_target: Option<SocketAddr>,
}

impl UdpTransport {
    /// Binds the data socket and, when configured, joins the multicast group
    ///
    /// Multicast setup failures are logged and leave the transport unicast-only.
    pub async fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let socket = UdpSocket::bind(config.udp_addr()).await?;
        let local = socket.local_addr()?;
        info!("UDP transport listening on {}", local);

        let group_target = match config.multicast_group {
            Some(group) => {
                let ttl = config.game_scope.ttl();
                let joined = socket
                    .join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)
                    .and_then(|()| socket.set_multicast_ttl_v4(ttl));
                match joined {
                    Ok(()) => {
                        let port = local.port().wrapping_add(1);
                        let target = SocketAddr::V4(SocketAddrV4::new(group, port));
                        info!(
                            "Joined multicast group {} ({:?}, ttl {}), group sends go to {}",
                            group, config.game_scope, ttl, target
                        );
                        Some(target)
                    }
                    Err(e) => {
                        warn!("Failed to join multicast group {}: {}", group, e);
                        None
                    }
                }
            }
            None => None,
        };

        Ok(Self {
            socket: Arc::new(socket),
            group_target,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn group_target(&self) -> Option<SocketAddr> {
        self.group_target
    }

    /// Spawns task that decodes inbound datagrams and dispatches them
    pub fn spawn_receiver(&self, context: Arc<ServerContext>) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_LEN];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match decode_datagram(&buffer[..len]) {
                        Ok(envelope) => {
                            context.dispatcher.dispatch_udp(&context, addr, &envelope);
                        }
                        Err(e) => warn!("Dropping malformed datagram from {}: {}", addr, e),
                    },
                    Err(e) => {
                        // ICMP port-unreachable surfaces here on some platforms
                        error!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        })
    }

    /// Spawns task that drains the outbound datagram queue
    pub fn spawn_sender(
        &self,
        mut outbound: mpsc::UnboundedReceiver<OutboundDatagram>,
    ) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let group_target = self.group_target;

        tokio::spawn(async move {
            while let Some(datagram) = outbound.recv().await {
                let target = match datagram.destination {
                    Destination::Unicast(addr) => addr,
                    Destination::Multicast => match group_target {
                        Some(target) => target,
                        None => {
                            debug!("No multicast group joined, dropping group datagram");
                            continue;
                        }
                    },
                };

                if let Err(e) = socket.send_to(&datagram.bytes, target).await {
                    error!("Failed to send datagram to {}: {}", target, e);
                }
            }
            debug!("Outbound datagram queue closed");
        })
    }
}
