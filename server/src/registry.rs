//! Connection registry for the presence hub
//!
//! This module owns the server's only shared mutable state: the table of
//! live connections and the last-known public state of each participant.
//! It covers:
//! - Connection lifecycle (pending handshake, active participant, removal)
//! - Idempotent join handling (a repeat join overwrites, never duplicates)
//! - Best-effort fan-out to every active peer except the originator
//!
//! All access goes through the methods here; connection handlers never
//! touch the map directly.

use log::{debug, info};
use shared::Participant;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Registry handle shared by every connection task.
pub type SharedRegistry = Arc<RwLock<Registry>>;

pub fn shared() -> SharedRegistry {
    Arc::new(RwLock::new(Registry::new()))
}

/// Per-connection protocol state.
///
/// A connection is `Pending` between the transport handshake and its first
/// valid join; only `Active` connections are visible to peers, included in
/// snapshots, or addressed by broadcasts.
#[derive(Debug)]
pub enum ConnectionState {
    Pending,
    Active(Participant),
}

/// A live connection: the outbound frame queue plus the participant data
/// attached to it once the join arrives.
#[derive(Debug)]
pub struct Connection {
    /// Distinguishes successive connections reusing one participant id,
    /// so a stale handler cannot remove its replacement.
    pub serial: u64,
    pub tx: mpsc::UnboundedSender<WsMessage>,
    pub state: ConnectionState,
}

impl Connection {
    pub fn is_active(&self) -> bool {
        matches!(self.state, ConnectionState::Active(_))
    }
}

/// Which kind of state transition a join caused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// First valid join on this connection (`Pending -> Active`).
    Joined,
    /// Repeat join on an already-active connection; overwrite only.
    Rejoined,
}

/// The table of live connections, keyed by participant id.
///
/// Mutated only by connection handlers on join/position/close. Fan-out is
/// non-blocking: each send lands in the peer's own unbounded queue, so
/// iteration never waits on a slow socket.
#[derive(Default)]
pub struct Registry {
    connections: HashMap<String, Connection>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection that has completed its handshake but not yet
    /// joined. A second connection claiming the same id replaces the first;
    /// the returned sender of the replaced entry is dropped, which closes
    /// the old task's outbound queue.
    pub fn insert_pending(&mut self, id: &str, serial: u64, tx: mpsc::UnboundedSender<WsMessage>) {
        if self.connections.contains_key(id) {
            info!("Replacing existing connection for participant {}", id);
        }
        self.connections.insert(
            id.to_string(),
            Connection {
                serial,
                tx,
                state: ConnectionState::Pending,
            },
        );
    }

    /// Stores the participant announced by a join message and activates the
    /// connection. A repeat join simply overwrites the stored participant;
    /// the returned variant tells the caller which case this was, so the
    /// one-time snapshot is only sent on the first transition.
    /// Returns `None` if no connection exists for the id.
    pub fn activate(&mut self, id: &str, participant: Participant) -> Option<Activation> {
        match self.connections.get_mut(id) {
            Some(conn) => {
                let activation = match conn.state {
                    ConnectionState::Pending => Activation::Joined,
                    ConnectionState::Active(_) => Activation::Rejoined,
                };
                conn.state = ConnectionState::Active(participant);
                Some(activation)
            }
            None => None,
        }
    }

    /// Updates the stored position of an active participant. Positions for
    /// pending or unknown connections are dropped; there is no participant
    /// to attribute them to yet.
    pub fn update_position(&mut self, id: &str, x: f32, y: f32) -> bool {
        match self.connections.get_mut(id) {
            Some(Connection {
                state: ConnectionState::Active(participant),
                ..
            }) => {
                participant.x = x;
                participant.y = y;
                true
            }
            _ => false,
        }
    }

    /// Removes a connection, but only if `serial` still matches: a handler
    /// that was replaced by a newer connection must not tear it down.
    /// Returns the removed connection.
    pub fn remove(&mut self, id: &str, serial: u64) -> Option<Connection> {
        match self.connections.get(id) {
            Some(conn) if conn.serial == serial => self.connections.remove(id),
            _ => None,
        }
    }

    /// Full state of every active participant, for the one-time snapshot
    /// sent to a fresh joiner. Includes the joiner itself, whose state was
    /// stored just before the snapshot is taken.
    pub fn snapshot(&self) -> Vec<Participant> {
        self.connections
            .values()
            .filter_map(|conn| match &conn.state {
                ConnectionState::Active(participant) => Some(participant.clone()),
                ConnectionState::Pending => None,
            })
            .collect()
    }

    /// Queues a text frame to every active connection except `exclude`.
    /// Delivery is best-effort per peer: a closed queue is logged and the
    /// iteration continues.
    pub fn broadcast(&self, text: &str, exclude: Option<&str>) {
        for (id, conn) in &self.connections {
            if Some(id.as_str()) == exclude || !conn.is_active() {
                continue;
            }
            if conn.tx.send(WsMessage::Text(text.to_string().into())).is_err() {
                debug!("Dropping broadcast to closed connection {}", id);
            }
        }
    }

    /// Queues a text frame to a single connection (active or pending).
    pub fn send_to(&self, id: &str, text: &str) -> bool {
        match self.connections.get(id) {
            Some(conn) => conn.tx.send(WsMessage::Text(text.to_string().into())).is_ok(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.connections.values().filter(|c| c.is_active()).count()
    }
}
