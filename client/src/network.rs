//! Client transports: the TCP control link and the UDP frame link

use bytes::Bytes;
use log::{debug, error};
use serde::Serialize;
use shared::codec::{decode_datagram, encode_message};
use shared::{CodecError, Envelope, FrameDecoder, MessageType, MAX_DATAGRAM_LEN};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpStream, ToSocketAddrs, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const READ_BUFFER_LEN: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("connection closed by server")]
    Closed,
}

/// Framed TCP connection to the server's control channel
///
/// Writes go through an unbounded channel drained by a writer task, so the
/// request correlator can send without awaiting the socket.
pub struct TcpLink {
    reader: OwnedReadHalf,
    decoder: FrameDecoder,
    outbound: mpsc::UnboundedSender<Bytes>,
    writer: JoinHandle<()>,
    peer: SocketAddr,
}

impl TcpLink {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, LinkError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (reader, mut writer) = stream.into_split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Bytes>();
        let writer = tokio::spawn(async move {
            while let Some(bytes) = outbound_rx.recv().await {
                if let Err(e) = writer.write_all(&bytes).await {
                    error!("Failed to write to server: {}", e);
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        debug!("Control link connected to {}", peer);
        Ok(Self {
            reader,
            decoder: FrameDecoder::new(),
            outbound,
            writer,
            peer,
        })
    }

    /// Sending half for the request correlator
    pub fn outbound(&self) -> mpsc::UnboundedSender<Bytes> {
        self.outbound.clone()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Waits for the next complete envelope
    ///
    /// Cancel safe: bytes already read stay in the decoder.
    pub async fn recv(&mut self) -> Result<Envelope, LinkError> {
        let mut buf = [0u8; READ_BUFFER_LEN];
        loop {
            if let Some(envelope) = self.decoder.next_envelope()? {
                return Ok(envelope);
            }

            let n = self.reader.read(&mut buf).await?;
            if n == 0 {
                return Err(LinkError::Closed);
            }
            self.decoder.extend(&buf[..n]);
        }
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        self.writer.abort();
    }
}

/// Connected UDP socket carrying frame samples and broadcasts
pub struct UdpLink {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl UdpLink {
    pub async fn connect(server: SocketAddr) -> Result<Self, LinkError> {
        let local: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;
        debug!("Frame link {} -> {}", socket.local_addr()?, server);

        Ok(Self {
            socket,
            buf: vec![0u8; MAX_DATAGRAM_LEN],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, LinkError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peer_addr(&self) -> Result<SocketAddr, LinkError> {
        Ok(self.socket.peer_addr()?)
    }

    pub async fn send<T: Serialize>(&self, kind: MessageType, message: &T) -> Result<(), LinkError> {
        let bytes = encode_message(kind, message)?;
        self.socket.send(&bytes).await?;
        Ok(())
    }

    /// Waits for the next datagram, which must hold exactly one envelope
    pub async fn recv(&mut self) -> Result<Envelope, LinkError> {
        let n = self.socket.recv(&mut self.buf).await?;
        Ok(decode_datagram(&self.buf[..n])?)
    }
}
