//! Server network layer: TCP control channel plus wiring of the UDP transport

use crate::config::ServerConfig;
use crate::connection_manager::Connection;
use crate::context::ServerContext;
use crate::error::ServerError;
use crate::udp::{OutboundDatagram, UdpTransport};
use bytes::Bytes;
use log::{debug, error, info, warn};
use shared::FrameDecoder;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;

const READ_BUFFER_LEN: usize = 8 * 1024;

/// Bound sockets plus the context that serves them
pub struct Server {
    listener: TcpListener,
    udp: UdpTransport,
    context: Arc<ServerContext>,
    outbound: mpsc::UnboundedReceiver<OutboundDatagram>,
}

impl Server {
    /// Binds both sockets, then builds the context with the ports actually bound
    pub async fn bind(mut config: ServerConfig) -> Result<Self, ServerError> {
        let listener = bind_listener(&config).await?;
        let tcp_addr = listener.local_addr()?;
        config.tcp_port = tcp_addr.port();
        info!("TCP control channel listening on {}", tcp_addr);

        let udp = UdpTransport::bind(&config).await?;
        config.udp_port = udp.local_addr()?.port();

        let (context, outbound) = ServerContext::new(config);
        Ok(Self {
            listener,
            udp,
            context,
            outbound,
        })
    }

    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.context)
    }

    pub fn tcp_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn udp_addr(&self) -> Result<SocketAddr, ServerError> {
        self.udp.local_addr()
    }

    /// Serves until the process is killed
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Serves until `shutdown` resolves, then closes rooms and connections
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let Server {
            listener,
            udp,
            context,
            outbound,
        } = self;

        let receiver = udp.spawn_receiver(Arc::clone(&context));
        let sender = udp.spawn_sender(outbound);
        info!(
            "Server started (tick rate {}Hz, match room {})",
            context.config.tick_rate, context.config.match_room
        );

        tokio::select! {
            _ = accept_loop(listener, Arc::clone(&context)) => {},
            _ = shutdown => info!("Shutdown requested"),
        }

        context.shutdown();
        receiver.abort();
        sender.abort();
        Ok(())
    }
}

async fn bind_listener(config: &ServerConfig) -> Result<TcpListener, ServerError> {
    let addr = lookup_host(config.tcp_addr()).await?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("could not resolve {}", config.tcp_addr()),
        )
    })?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(config.max_connections.max(1))?)
}

async fn accept_loop(listener: TcpListener, context: Arc<ServerContext>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => spawn_connection(Arc::clone(&context), stream, peer),
            Err(e) => {
                error!("Error accepting connection: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

/// Registers the connection and spawns its reader and writer tasks
fn spawn_connection(context: Arc<ServerContext>, stream: TcpStream, peer: SocketAddr) {
    let (tx, rx) = mpsc::channel(context.config.outbound_queue.max(1));
    let Some(connection) = context.connections.register(peer, tx) else {
        warn!("Rejecting connection from {}: server full", peer);
        return;
    };

    if let Err(e) = stream.set_nodelay(true) {
        debug!("Connection {}: failed to set TCP_NODELAY: {}", connection.id, e);
    }
    let (reader, writer) = stream.into_split();

    tokio::spawn(write_loop(
        Arc::clone(&context),
        Arc::clone(&connection),
        writer,
        rx,
    ));
    tokio::spawn(read_loop(context, connection, reader));
}

/// Feeds socket bytes into the decoder and dispatches envelopes in arrival order
async fn read_loop(context: Arc<ServerContext>, connection: Arc<Connection>, mut reader: OwnedReadHalf) {
    let mut decoder = FrameDecoder::new();
    let mut buffer = vec![0u8; READ_BUFFER_LEN];

    'read: loop {
        let read = tokio::select! {
            read = reader.read(&mut buffer) => read,
            _ = connection.closed() => break,
        };

        match read {
            Ok(0) => {
                info!("Connection {} closed by peer", connection.id);
                break;
            }
            Ok(len) => {
                decoder.extend(&buffer[..len]);
                loop {
                    match decoder.next_envelope() {
                        Ok(Some(envelope)) => {
                            context
                                .dispatcher
                                .dispatch_tcp(&context, &connection, &envelope);
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("Connection {}: protocol error: {}", connection.id, e);
                            break 'read;
                        }
                    }
                }
            }
            Err(e) => {
                error!("Connection {}: read failed: {}", connection.id, e);
                break;
            }
        }
    }

    context.disconnect(connection.id);
}

/// Drains the connection's outbound queue onto the socket
async fn write_loop(
    context: Arc<ServerContext>,
    connection: Arc<Connection>,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Bytes>,
) {
    loop {
        let bytes = tokio::select! {
            bytes = outbound.recv() => bytes,
            _ = connection.closed() => None,
        };
        let Some(bytes) = bytes else {
            break;
        };

        if let Err(e) = writer.write_all(&bytes).await {
            error!("Connection {}: write failed: {}", connection.id, e);
            context.disconnect(connection.id);
            break;
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Connection {}: shutdown failed: {}", connection.id, e);
    }
}
