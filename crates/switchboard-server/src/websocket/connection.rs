//! Non-owning handles to live `WebSocket` connections.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Message;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::handler::RequestInfo;
use crate::transport::Opcode;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A frame queued for a connection's writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundFrame {
    /// `Text` or `Binary`.
    pub opcode: Opcode,
    /// Frame payload.
    pub payload: Bytes,
}

impl OutboundFrame {
    /// A text frame.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            opcode: Opcode::Text,
            payload: Bytes::from(text.into()),
        }
    }

    /// A binary frame.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self {
            opcode: Opcode::Binary,
            payload: data.into(),
        }
    }

    /// Convert into the axum message written to the socket.
    pub fn into_message(self) -> Message {
        match self.opcode {
            Opcode::Text => {
                Message::Text(String::from_utf8_lossy(&self.payload).into_owned().into())
            }
            Opcode::Ping => Message::Ping(self.payload),
            Opcode::Pong => Message::Pong(self.payload),
            _ => Message::Binary(self.payload),
        }
    }
}

/// Handle to one live connection: its identity, the metadata of its upgrade
/// request, and the capability to queue frames for it.
///
/// The socket is owned by its transport task. Holding or dropping handles
/// never keeps the connection open or closes it; the write side simply
/// starts failing once the socket task has gone away.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    info: Arc<RequestInfo>,
    tx: mpsc::Sender<OutboundFrame>,
    dropped: Arc<AtomicU64>,
}

impl ConnectionHandle {
    /// Allocate a handle for a freshly upgraded connection. The receiver
    /// feeds the connection's writer task.
    pub fn open(mut info: RequestInfo, capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let id = ConnectionId::next();
        info.connection_id = Some(id);
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id,
            info: Arc::new(info),
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (handle, rx)
    }

    /// Connection identity.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Metadata of the upgrade request.
    pub fn info(&self) -> &RequestInfo {
        &self.info
    }

    /// Queue a frame without waiting.
    ///
    /// Returns `false` if the queue is full or the writer is gone, and
    /// increments the dropped-frame counter.
    pub fn send(&self, frame: OutboundFrame) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Frames dropped so far.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("uri", &self.info.uri)
            .field("dropped", &self.drop_count())
            .finish_non_exhaustive()
    }
}
