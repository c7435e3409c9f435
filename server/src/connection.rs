//! Connection management for the authoritative server
//!
//! This module handles the transport-side bookkeeping of connected clients:
//! - Connection lifecycle (accept, disconnect, timeout)
//! - Address-to-identity resolution for incoming packets
//! - Per-connection move-sequence acknowledgment for reconciliation
//! - Capacity enforcement and host designation
//!
//! Game-side player state lives in the roster; the table only knows about
//! sockets, identities and liveness.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// One connected client as seen by the transport layer.
#[derive(Debug)]
pub struct Connection {
    /// Connection identity, the roster's primary key. Stable for the
    /// connection's lifetime.
    pub id: u64,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
    /// Highest move-intent sequence applied for this client, echoed back in
    /// state broadcasts so the client can trim its prediction history
    pub last_processed_move: u32,
    /// Whether this connection may start rounds
    pub is_host: bool,
}

impl Connection {
    pub fn new(id: u64, addr: SocketAddr, is_host: bool) -> Self {
        Connection {
            id,
            addr,
            last_seen: Instant::now(),
            last_processed_move: 0,
            is_host,
        }
    }

    /// Marks the connection as recently active.
    pub fn refresh(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns true if no packets arrived within the timeout window.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Tracks all connected clients and enforces the capacity limit.
///
/// The first accepted connection becomes the host (it alone may start
/// rounds); if the host drops, the oldest remaining connection inherits
/// the role.
pub struct ConnectionTable {
    connections: HashMap<u64, Connection>,
    next_id: u64,
    max_connections: usize,
}

impl ConnectionTable {
    pub fn new(max_connections: usize) -> Self {
        ConnectionTable {
            connections: HashMap::new(),
            next_id: 1,
            max_connections,
        }
    }

    /// Attempts to accept a new connection. Returns the assigned identity,
    /// or None when the server is at capacity.
    pub fn add(&mut self, addr: SocketAddr) -> Option<u64> {
        if self.connections.len() >= self.max_connections {
            return None;
        }

        let id = self.next_id;
        self.next_id += 1;

        let is_host = self.connections.is_empty();
        info!(
            "Connection {} accepted from {}{}",
            id,
            addr,
            if is_host { " (host)" } else { "" }
        );
        self.connections.insert(id, Connection::new(id, addr, is_host));
        Some(id)
    }

    /// Removes a connection, promoting a new host if needed. Returns true
    /// if the connection existed.
    pub fn remove(&mut self, id: u64) -> bool {
        let removed = match self.connections.remove(&id) {
            Some(connection) => connection,
            None => return false,
        };
        info!("Connection {} closed", removed.id);

        if removed.is_host {
            if let Some(oldest) = self.connections.keys().min().copied() {
                if let Some(heir) = self.connections.get_mut(&oldest) {
                    heir.is_host = true;
                    info!("Connection {} promoted to host", oldest);
                }
            }
        }
        true
    }

    /// Resolves an incoming packet's source address to an identity.
    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<u64> {
        self.connections
            .iter()
            .find(|(_, connection)| connection.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn addr_of(&self, id: u64) -> Option<SocketAddr> {
        self.connections.get(&id).map(|c| c.addr)
    }

    pub fn is_host(&self, id: u64) -> bool {
        self.connections.get(&id).map_or(false, |c| c.is_host)
    }

    pub fn refresh(&mut self, id: u64) {
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.refresh();
        }
    }

    /// Records the highest applied move sequence for a client.
    pub fn mark_move_processed(&mut self, id: u64, sequence: u32) {
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.last_processed_move = connection.last_processed_move.max(sequence);
        }
    }

    /// Last applied move sequence per client, for the state broadcast.
    pub fn last_processed_moves(&self) -> HashMap<u64, u32> {
        self.connections
            .iter()
            .map(|(id, connection)| (*id, connection.last_processed_move))
            .collect()
    }

    /// Removes connections that went silent and returns their identities so
    /// the session can drop the corresponding players.
    pub fn check_timeouts(&mut self) -> Vec<u64> {
        let timeout = Duration::from_secs(5);
        let timed_out: Vec<u64> = self
            .connections
            .iter()
            .filter(|(_, connection)| connection.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for id in &timed_out {
            self.remove(*id);
        }

        timed_out
    }

    /// All identities and addresses, for broadcasting.
    pub fn addrs(&self) -> Vec<(u64, SocketAddr)> {
        self.connections
            .iter()
            .map(|(id, connection)| (*id, connection.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
