//! The callback surface between the axum transport and the dispatchers.
//!
//! Every bound URI gets an object implementing [`TransportHandler`]; the
//! transport adapter in [`crate::server`] invokes the callbacks on request,
//! connect, data and close events. Callbacks the handler does not care about
//! keep their default (unhandled / no-op) behaviour.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::handler::RequestInfo;
use crate::websocket::connection::ConnectionHandle;

/// `WebSocket` frame opcode (RFC 6455 §5.2) of a complete message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// UTF-8 text.
    Text,
    /// Binary data.
    Binary,
    /// Connection close.
    Close,
    /// Ping.
    Ping,
    /// Pong.
    Pong,
}

/// A complete JSON reply to an HTTP request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpReply {
    /// Encoded JSON body.
    pub body: String,
}

impl IntoResponse for HttpReply {
    fn into_response(self) -> Response {
        let len = self.body.len();
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = StatusCode::OK;
        let headers = response.headers_mut();
        let _ = headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let _ = headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        let _ = headers.insert(CONNECTION, HeaderValue::from_static("close"));
        response
    }
}

/// What an HTTP callback did with the request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HttpOutcome {
    /// A response was produced.
    Handled(HttpReply),
    /// Nothing was written; the transport applies its default behaviour.
    Unhandled,
    /// The request was refused before reaching the function.
    Rejected(StatusCode),
}

/// Callbacks invoked by the transport for one bound URI.
#[async_trait]
pub trait TransportHandler: Send + Sync {
    /// An HTTP GET/POST request arrived.
    async fn handle_request(&self, _info: RequestInfo, _body: Body) -> HttpOutcome {
        HttpOutcome::Unhandled
    }

    /// A `WebSocket` handshake completed. Returning `false` closes it.
    async fn handle_ws_open(&self, _conn: &ConnectionHandle) -> bool {
        false
    }

    /// The connection is ready for traffic.
    async fn handle_ws_ready(&self, _conn: &ConnectionHandle) {}

    /// A frame arrived. Returning `false` closes the connection.
    async fn handle_ws_data(
        &self,
        _conn: &ConnectionHandle,
        _opcode: Opcode,
        _payload: &[u8],
    ) -> bool {
        true
    }

    /// The connection closed. Called exactly once per opened connection.
    async fn handle_ws_close(&self, _conn: &ConnectionHandle) {}
}
