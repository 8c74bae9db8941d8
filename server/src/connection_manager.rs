//! Live TCP connection tracking for the control channel
//!
//! This module handles the server-side bookkeeping of accepted TCP connections:
//! - Connection id assignment and capacity enforcement
//! - The bounded outbound queue drained by each connection's writer task
//! - The player session bound to a connection after login
//! - Close signalling shared by the reader and writer tasks
//!
//! Teardown itself (removing the entry and walking the player out of their
//! room) lives in [`crate::context::ServerContext::disconnect`], so that every
//! failure path ends in the same cleanup.

use crate::error::ServerError;
use bytes::Bytes;
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use shared::codec::encode_message;
use shared::{MessageType, PlayerId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

pub type ConnectionId = u32;

/// Player bound to a connection once login succeeds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSession {
    pub player_id: PlayerId,
    pub account: String,
}

/// One accepted TCP connection
///
/// Each connection carries:
/// - Its process-unique id and the peer address
/// - The sending half of its outbound queue
/// - The player session, absent until login completes
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    outbound: mpsc::Sender<Bytes>,
    session: Mutex<Option<PlayerSession>>,
    closed: AtomicBool,
    shutdown: Notify,
}

impl Connection {
    pub fn new(id: ConnectionId, peer: SocketAddr, outbound: mpsc::Sender<Bytes>) -> Self {
        Self {
            id,
            peer,
            outbound,
            session: Mutex::new(None),
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Queues framed bytes for the writer task
    ///
    /// A full queue means the peer stopped reading. That is treated like a
    /// failed write: the connection is closed and its tasks wind down.
    pub fn send(&self, bytes: Bytes) -> Result<(), ServerError> {
        if self.is_closed() {
            return Err(ServerError::ConnectionClosed(self.id));
        }

        match self.outbound.try_send(bytes) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.close();
                Err(ServerError::QueueFull(self.id))
            }
            Err(TrySendError::Closed(_)) => {
                self.close();
                Err(ServerError::ConnectionClosed(self.id))
            }
        }
    }

    pub fn send_message<T: Serialize>(
        &self,
        kind: MessageType,
        message: &T,
    ) -> Result<(), ServerError> {
        let bytes = encode_message(kind, message)?;
        self.send(bytes)
    }

    /// Binds a player, returning the session it replaced
    pub fn bind_session(&self, session: PlayerSession) -> Option<PlayerSession> {
        self.session.lock().replace(session)
    }

    pub fn session(&self) -> Option<PlayerSession> {
        self.session.lock().clone()
    }

    pub fn take_session(&self) -> Option<PlayerSession> {
        self.session.lock().take()
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        self.session.lock().as_ref().map(|session| session.player_id)
    }

    /// Marks the connection closed and wakes its tasks
    ///
    /// Returns false if it was already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        debug!("Connection {} marked closed", self.id);
        self.shutdown.notify_waiters();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resolves once [`Connection::close`] has been called
    pub async fn closed(&self) {
        loop {
            let notified = self.shutdown.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}

/// Registry of all live connections
///
/// Ids start from 1 and are never reused within a process. The registry
/// enforces the configured connection limit at registration time.
#[derive(Debug)]
pub struct ConnectionManager {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    next_connection_id: AtomicU32,
    max_connections: usize,
}

impl ConnectionManager {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_connection_id: AtomicU32::new(1),
            max_connections,
        }
    }

    /// Registers a newly accepted connection
    ///
    /// Returns None if the server is at capacity.
    pub fn register(
        &self,
        peer: SocketAddr,
        outbound: mpsc::Sender<Bytes>,
    ) -> Option<Arc<Connection>> {
        let mut connections = self.connections.write();
        if connections.len() >= self.max_connections {
            return None;
        }

        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let connection = Arc::new(Connection::new(id, peer, outbound));
        connections.insert(id, Arc::clone(&connection));
        info!("Connection {} accepted from {}", id, peer);

        Some(connection)
    }

    /// Removes a connection, returning it if it was still registered
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let removed = self.connections.write().remove(&id);
        if let Some(connection) = &removed {
            info!("Connection {} from {} removed", id, connection.peer);
        }
        removed
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(&id).cloned()
    }

    pub fn find_by_player(&self, player_id: PlayerId) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .values()
            .find(|connection| connection.player_id() == Some(player_id))
            .cloned()
    }

    /// Connections other than `except` that are logged in as `player_id`
    pub fn others_bound_to(
        &self,
        player_id: PlayerId,
        except: ConnectionId,
    ) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .values()
            .filter(|connection| connection.id != except)
            .filter(|connection| connection.player_id() == Some(player_id))
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    /// Signals every live connection to close
    pub fn close_all(&self) -> usize {
        let connections = self.snapshot();
        for connection in &connections {
            connection.close();
        }
        connections.len()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    fn queue(capacity: usize) -> (mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
        mpsc::channel(capacity)
    }

    #[test]
    fn test_register_assigns_increasing_ids() {
        let manager = ConnectionManager::new(4);

        let (tx1, _rx1) = queue(4);
        let (tx2, _rx2) = queue(4);
        let first = manager.register(test_addr(1000), tx1).unwrap();
        let second = manager.register(test_addr(1001), tx2).unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_capacity_limit() {
        let manager = ConnectionManager::new(1);

        let (tx1, _rx1) = queue(4);
        let (tx2, _rx2) = queue(4);
        assert!(manager.register(test_addr(1000), tx1).is_some());
        assert!(manager.register(test_addr(1001), tx2).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_ids_are_not_reused() {
        let manager = ConnectionManager::new(2);

        let (tx, _rx) = queue(4);
        let first = manager.register(test_addr(1000), tx.clone()).unwrap();
        assert!(manager.remove(first.id).is_some());
        assert!(manager.remove(first.id).is_none());

        let second = manager.register(test_addr(1000), tx).unwrap();
        assert_ne!(first.id, second.id);
        assert!(!manager.is_empty());
    }

    #[test]
    fn test_others_bound_to_skips_the_asking_connection() {
        let manager = ConnectionManager::new(4);
        let (tx1, _rx1) = queue(4);
        let (tx2, _rx2) = queue(4);
        let old = manager.register(test_addr(1000), tx1).unwrap();
        let new = manager.register(test_addr(1001), tx2).unwrap();

        for connection in [&old, &new] {
            connection.bind_session(PlayerSession {
                player_id: 7,
                account: "erin".to_string(),
            });
        }

        let others: Vec<ConnectionId> = manager
            .others_bound_to(7, new.id)
            .iter()
            .map(|connection| connection.id)
            .collect();
        assert_eq!(others, vec![old.id]);
        assert!(manager.others_bound_to(8, new.id).is_empty());
    }

    #[test]
    fn test_find_by_player() {
        let manager = ConnectionManager::new(4);
        let (tx, _rx) = queue(4);
        let connection = manager.register(test_addr(1000), tx).unwrap();

        assert!(manager.find_by_player(7).is_none());
        connection.bind_session(PlayerSession {
            player_id: 7,
            account: "alice".to_string(),
        });
        assert_eq!(manager.find_by_player(7).unwrap().id, connection.id);
    }

    #[test]
    fn test_send_enqueues_bytes() {
        let (tx, mut rx) = queue(4);
        let connection = Connection::new(1, test_addr(1000), tx);

        connection.send(Bytes::from_static(b"abc")).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"abc"));
    }

    #[test]
    fn test_full_queue_closes_connection() {
        let (tx, _rx) = queue(1);
        let connection = Connection::new(3, test_addr(1000), tx);

        connection.send(Bytes::from_static(b"a")).unwrap();
        let result = connection.send(Bytes::from_static(b"b"));

        assert!(matches!(result, Err(ServerError::QueueFull(3))));
        assert!(connection.is_closed());
        assert!(matches!(
            connection.send(Bytes::from_static(b"c")),
            Err(ServerError::ConnectionClosed(3))
        ));
    }

    #[test]
    fn test_session_binding() {
        let (tx, _rx) = queue(1);
        let connection = Connection::new(1, test_addr(1000), tx);
        assert!(connection.session().is_none());

        let previous = connection.bind_session(PlayerSession {
            player_id: 1,
            account: "a".to_string(),
        });
        assert!(previous.is_none());

        let previous = connection.bind_session(PlayerSession {
            player_id: 2,
            account: "b".to_string(),
        });
        assert_eq!(previous.unwrap().player_id, 1);
        assert_eq!(connection.take_session().unwrap().player_id, 2);
        assert!(connection.player_id().is_none());
    }

    #[tokio::test]
    async fn test_closed_resolves_after_close() {
        let (tx, _rx) = queue(1);
        let connection = Arc::new(Connection::new(1, test_addr(1000), tx));

        let waiter = {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move { connection.closed().await })
        };

        assert!(connection.close());
        assert!(!connection.close());
        waiter.await.unwrap();

        // Already closed connections resolve immediately
        connection.closed().await;
    }

    #[test]
    fn test_close_all() {
        let manager = ConnectionManager::new(4);
        let (tx, _rx) = queue(4);
        let a = manager.register(test_addr(1000), tx.clone()).unwrap();
        let b = manager.register(test_addr(1001), tx).unwrap();

        assert_eq!(manager.close_all(), 2);
        assert!(a.is_closed());
        assert!(b.is_closed());
    }
}
