//! `WebSocket` session lifecycle: drives one upgraded socket from handshake
//! through close and reports each event to the URI's handler.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ConnectionHandle;
use crate::handler::RequestInfo;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::transport::{Opcode, TransportHandler};

/// How long the writer may take to flush after the reader has finished.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Why the read loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Exit {
    PeerClosed,
    HandlerClosed,
    Shutdown,
}

/// Convert an inbound message into the opcode and payload handed to the
/// data callback.
pub fn frame_parts(msg: &Message) -> (Opcode, Bytes) {
    match msg {
        Message::Text(t) => (Opcode::Text, Bytes::copy_from_slice(t.as_str().as_bytes())),
        Message::Binary(b) => (Opcode::Binary, b.clone()),
        Message::Ping(b) => (Opcode::Ping, b.clone()),
        Message::Pong(b) => (Opcode::Pong, b.clone()),
        Message::Close(frame) => {
            let payload = frame.as_ref().map_or_else(Bytes::new, |f| {
                let mut buf = Vec::with_capacity(2 + f.reason.as_str().len());
                buf.extend_from_slice(&f.code.to_be_bytes());
                buf.extend_from_slice(f.reason.as_str().as_bytes());
                Bytes::from(buf)
            });
            (Opcode::Close, payload)
        }
    }
}

/// Run a session for one upgraded socket.
///
/// 1. Allocates a [`ConnectionHandle`] and spawns the writer task
/// 2. Calls `handle_ws_open`; a refusal closes the socket
/// 3. Calls `handle_ws_ready`, then feeds every inbound frame to
///    `handle_ws_data` until the peer closes, the handler asks to close, or
///    `shutdown` fires
/// 4. Calls `handle_ws_close` once and stops the writer
///
/// Accepted connections are counted in the `ws_*` metrics.
#[instrument(skip_all, fields(uri = %info.uri, conn_id))]
pub async fn run_session(
    socket: WebSocket,
    info: RequestInfo,
    handler: Arc<dyn TransportHandler>,
    send_queue_capacity: usize,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let uri = info.uri.clone();
    let (conn, mut send_rx) = ConnectionHandle::open(info, send_queue_capacity);
    let _ = tracing::Span::current().record("conn_id", conn.id().get());
    debug!("handshake complete");

    let done = CancellationToken::new();
    let writer_done = done.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = send_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(frame.into_message()).await.is_err() {
                        break;
                    }
                }
                () = writer_done.cancelled() => {
                    // Flush what was queued before the reader finished.
                    while let Ok(frame) = send_rx.try_recv() {
                        if ws_tx.send(frame.into_message()).await.is_err() {
                            break;
                        }
                    }
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    if !handler.handle_ws_open(&conn).await {
        info!("connection refused by handler");
        stop_writer(done, writer).await;
        return;
    }
    let opened = Instant::now();
    counter!(WS_CONNECTIONS_TOTAL, "uri" => uri.clone()).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE, "uri" => uri.clone()).increment(1.0);
    info!("client connected");
    handler.handle_ws_ready(&conn).await;

    let exit = loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = shutdown.cancelled() => break Exit::Shutdown,
        };
        let msg = match msg {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(error = %e, "socket read failed");
                break Exit::PeerClosed;
            }
            None => break Exit::PeerClosed,
        };

        let is_close = matches!(msg, Message::Close(_));
        let (opcode, payload) = frame_parts(&msg);
        let keep_open = handler.handle_ws_data(&conn, opcode, &payload).await;
        if is_close {
            break Exit::PeerClosed;
        }
        if !keep_open {
            break Exit::HandlerClosed;
        }
    };

    handler.handle_ws_close(&conn).await;
    counter!(WS_DISCONNECTIONS_TOTAL, "uri" => uri.clone()).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE, "uri" => uri.clone()).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS, "uri" => uri).record(opened.elapsed().as_secs_f64());
    info!(?exit, dropped = conn.drop_count(), "client disconnected");
    drop(conn);
    stop_writer(done, writer).await;
}

async fn stop_writer(done: CancellationToken, writer: tokio::task::JoinHandle<()>) {
    done.cancel();
    let abort = writer.abort_handle();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        warn!("writer did not finish in {WRITER_DRAIN_TIMEOUT:?}, aborting");
        abort.abort();
    }
}
