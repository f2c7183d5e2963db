//! `WebSocket` lifecycle dispatch for one bound URI.
//!
//! Opening registers the connection, closing deregisters it, and each text
//! frame is decoded, handed to the bound function, and answered with one
//! text frame on the same connection.

use std::sync::Arc;

use async_trait::async_trait;
use switchboard_logging::{LogContext, LogSink};
use tracing::{debug, warn};

use super::connection::{ConnectionHandle, OutboundFrame};
use super::registry::ConnectionRegistry;
use crate::codec;
use crate::handler::{self, SharedFunction};
use crate::transport::{Opcode, TransportHandler};

/// Dispatcher bound to one `WebSocket` URI and its registry.
pub struct WebSocketDispatcher {
    uri: String,
    function: SharedFunction,
    registry: Arc<ConnectionRegistry>,
    sink: Arc<dyn LogSink>,
}

impl WebSocketDispatcher {
    /// Bind `function` to `registry`'s URI.
    pub fn new(
        function: SharedFunction,
        registry: Arc<ConnectionRegistry>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            uri: registry.uri().to_owned(),
            function,
            registry,
            sink,
        }
    }

    /// Bound URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The registry this dispatcher maintains.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    fn log(&self, conn: &ConnectionHandle, message: &str) {
        self.sink.log(
            &LogContext {
                uri: &self.uri,
                conn_id: Some(conn.id().get()),
                remote_addr: conn.info().remote_addr,
            },
            message,
        );
    }
}

#[async_trait]
impl TransportHandler for WebSocketDispatcher {
    async fn handle_ws_open(&self, conn: &ConnectionHandle) -> bool {
        self.log(conn, "WS connected");
        if !self.registry.add(conn.clone()) {
            warn!(uri = %self.uri, conn_id = %conn.id(), "connection opened twice");
        }
        true
    }

    async fn handle_ws_ready(&self, conn: &ConnectionHandle) {
        self.log(conn, "WS ready");
    }

    async fn handle_ws_data(
        &self,
        conn: &ConnectionHandle,
        opcode: Opcode,
        payload: &[u8],
    ) -> bool {
        debug!(uri = %self.uri, conn_id = %conn.id(), ?opcode, len = payload.len(), "WS frame");
        if opcode != Opcode::Text {
            return true;
        }

        let decoded = codec::decode(payload);
        if !decoded.ok {
            warn!(
                uri = %self.uri,
                conn_id = %conn.id(),
                error = decoded.error.as_deref().unwrap_or_default(),
                "dropping malformed frame"
            );
            self.log(conn, "Received unknown message");
            return true;
        }

        let invoked = handler::invoke(&self.function, conn.info().clone(), decoded.value).await;
        let Ok(out) = invoked else {
            return true;
        };
        let answer = codec::encode(&out);
        if !conn.send(OutboundFrame::text(answer)) {
            warn!(uri = %self.uri, conn_id = %conn.id(), "failed to queue reply");
        }
        true
    }

    async fn handle_ws_close(&self, conn: &ConnectionHandle) {
        self.log(conn, "WS closed");
        let _ = self.registry.remove(conn.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::http::Method;
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use switchboard_logging::{FnSink, TracingSink};
    use tokio::sync::mpsc;

    use crate::handler::RequestInfo;

    fn ping_pong() -> SharedFunction {
        Arc::new(|_: &RequestInfo, input: &Value| {
            if input["op"] == "ping" {
                json!({"op": "pong"})
            } else {
                json!({"echo": input})
            }
        })
    }

    fn make_dispatcher(function: SharedFunction) -> WebSocketDispatcher {
        let registry = Arc::new(ConnectionRegistry::new("/ws"));
        WebSocketDispatcher::new(function, registry, Arc::new(TracingSink))
    }

    fn make_conn() -> (ConnectionHandle, mpsc::Receiver<OutboundFrame>) {
        ConnectionHandle::open(RequestInfo::new(Method::GET, "/ws"), 8)
    }

    #[tokio::test]
    async fn open_registers_and_close_deregisters() {
        let d = make_dispatcher(ping_pong());
        let (a, _ra) = make_conn();
        let (b, _rb) = make_conn();

        assert!(d.handle_ws_open(&a).await);
        assert!(d.handle_ws_open(&b).await);
        assert_eq!(d.registry().len(), 2);

        d.handle_ws_close(&a).await;
        assert_eq!(d.registry().ids(), vec![b.id()]);
    }

    #[tokio::test]
    async fn text_frame_gets_single_reply() {
        let d = make_dispatcher(ping_pong());
        let (a, mut ra) = make_conn();
        let _ = d.handle_ws_open(&a).await;

        assert!(d.handle_ws_data(&a, Opcode::Text, br#"{"op":"ping"}"#).await);

        let reply = ra.try_recv().unwrap();
        assert_eq!(reply.opcode, Opcode::Text);
        assert_eq!(&reply.payload[..], br#"{"op":"pong"}"#);
        assert!(ra.try_recv().is_err());
    }

    #[tokio::test]
    async fn reply_goes_only_to_sender() {
        let d = make_dispatcher(ping_pong());
        let (a, mut ra) = make_conn();
        let (b, mut rb) = make_conn();
        let _ = d.handle_ws_open(&a).await;
        let _ = d.handle_ws_open(&b).await;

        let _ = d.handle_ws_data(&a, Opcode::Text, br#"{"op":"ping"}"#).await;

        assert!(ra.try_recv().is_ok());
        assert!(rb.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped() {
        let d = make_dispatcher(ping_pong());
        let (a, mut ra) = make_conn();
        let _ = d.handle_ws_open(&a).await;

        assert!(d.handle_ws_data(&a, Opcode::Text, b"{oops").await);
        assert!(ra.try_recv().is_err());
        assert!(d.registry().contains(a.id()));
    }

    #[tokio::test]
    async fn binary_and_control_frames_are_ignored() {
        let d = make_dispatcher(ping_pong());
        let (a, mut ra) = make_conn();
        let _ = d.handle_ws_open(&a).await;

        for op in [Opcode::Binary, Opcode::Ping, Opcode::Pong, Opcode::Close] {
            assert!(d.handle_ws_data(&a, op, br#"{"op":"ping"}"#).await);
        }
        assert!(ra.try_recv().is_err());
    }

    #[tokio::test]
    async fn panicking_function_sends_nothing() {
        let d = make_dispatcher(Arc::new(|_: &RequestInfo, _: &Value| -> Value {
            panic!("bad handler");
        }));
        let (a, mut ra) = make_conn();
        let _ = d.handle_ws_open(&a).await;

        assert!(d.handle_ws_data(&a, Opcode::Text, b"{}").await);
        assert!(ra.try_recv().is_err());
        assert!(d.registry().contains(a.id()));
    }

    #[tokio::test]
    async fn function_sees_connection_metadata() {
        let d = make_dispatcher(Arc::new(|info: &RequestInfo, _: &Value| {
            json!({"conn": info.connection_id.map(|id| id.get()), "uri": info.uri})
        }));
        let (a, mut ra) = make_conn();
        let _ = d.handle_ws_data(&a, Opcode::Text, b"null").await;

        let reply: Value = serde_json::from_slice(&ra.try_recv().unwrap().payload).unwrap();
        assert_eq!(reply["conn"], a.id().get());
        assert_eq!(reply["uri"], "/ws");
    }

    #[tokio::test]
    async fn lifecycle_lines_reach_sink() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&lines);
        let sink = FnSink::new(move |ctx: &LogContext<'_>, msg: &str| {
            captured.lock().push((ctx.uri.to_owned(), msg.to_owned()));
        });
        let registry = Arc::new(ConnectionRegistry::new("/ws"));
        let d = WebSocketDispatcher::new(ping_pong(), registry, Arc::new(sink));
        let (a, _ra) = make_conn();

        let _ = d.handle_ws_open(&a).await;
        d.handle_ws_ready(&a).await;
        d.handle_ws_close(&a).await;

        let messages: Vec<String> = lines.lock().iter().map(|(_, m)| m.clone()).collect();
        assert_eq!(messages, ["WS connected", "WS ready", "WS closed"]);
        assert!(lines.lock().iter().all(|(uri, _)| uri == "/ws"));
    }
}
