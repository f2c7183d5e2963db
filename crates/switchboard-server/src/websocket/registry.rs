//! Per-URI set of live connections.
//!
//! One registry exists per bound `WebSocket` URI, each with its own lock, so
//! a broadcast on one URI never waits on traffic for another. `add`,
//! `remove` and `broadcast` are mutually exclusive on the same registry: a
//! broadcast writes to exactly the members present when it took the lock.

use std::collections::HashMap;

use metrics::counter;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::connection::{ConnectionHandle, ConnectionId, OutboundFrame};
use crate::metrics::WS_BROADCAST_DROPS_TOTAL;

/// Live connections registered under one URI.
pub struct ConnectionRegistry {
    uri: String,
    members: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    /// Create an empty registry for `uri`.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            members: Mutex::new(HashMap::new()),
        }
    }

    /// URI this registry belongs to.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Register a connection. Returns `false` if it was already present.
    pub fn add(&self, handle: ConnectionHandle) -> bool {
        let mut members = self.members.lock();
        if members.contains_key(&handle.id()) {
            return false;
        }
        let _ = members.insert(handle.id(), handle);
        true
    }

    /// Deregister a connection. Returns `false` if it was not present.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.members.lock().remove(&id).is_some()
    }

    /// Queue `frame` on every registered connection.
    ///
    /// Returns whether there was at least one member. Connections whose
    /// queue is full or closed are skipped and logged; they leave the
    /// registry only through their close notification.
    pub fn broadcast(&self, frame: &OutboundFrame) -> bool {
        let members = self.members.lock();
        let recipients = members.len();
        let mut failed = 0usize;
        for handle in members.values() {
            if !handle.send(frame.clone()) {
                failed += 1;
                counter!(WS_BROADCAST_DROPS_TOTAL, "uri" => self.uri.clone()).increment(1);
                warn!(uri = %self.uri, conn_id = %handle.id(), "failed to queue broadcast frame");
            }
        }
        debug!(
            uri = %self.uri,
            opcode = ?frame.opcode,
            len = frame.payload.len(),
            recipients,
            failed,
            "broadcast"
        );
        recipients != 0
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.lock().contains_key(&id)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.members.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Drop every handle. Used at server teardown.
    pub fn clear(&self) {
        self.members.lock().clear();
    }
}
