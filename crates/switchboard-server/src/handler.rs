//! Application functions and the request metadata they receive.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method};
use serde_json::Value;
use tracing::error;

use crate::websocket::connection::ConnectionId;

/// Metadata about the request (or `WebSocket` upgrade request) being served.
#[derive(Clone, Debug)]
pub struct RequestInfo {
    /// HTTP method.
    pub method: Method,
    /// Request path.
    pub uri: String,
    /// Raw query string, if any.
    pub query: Option<String>,
    /// Request headers.
    pub headers: HeaderMap,
    /// Peer address, when the transport recorded it.
    pub remote_addr: Option<SocketAddr>,
    /// Set for `WebSocket` connections once they are registered.
    pub connection_id: Option<ConnectionId>,
}

impl RequestInfo {
    /// Minimal metadata for `method` on `uri`.
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            query: None,
            headers: HeaderMap::new(),
            remote_addr: None,
            connection_id: None,
        }
    }

    /// Capture metadata from request parts.
    pub fn from_parts(parts: &Parts) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.path().to_owned(),
            query: parts.uri.query().map(ToOwned::to_owned),
            headers: parts.headers.clone(),
            remote_addr: parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0),
            connection_id: None,
        }
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Declared `Content-Length`, if present and numeric.
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")
            .and_then(|v| v.trim().parse().ok())
    }
}

/// A function bound to a URI.
///
/// Receives the request metadata and the decoded payload (`Null` when the
/// payload was empty or malformed) and returns the value to send back.
/// Returning `Null` from an HTTP function means "no content".
///
/// Functions run on the blocking pool, so they may block, and they may call
/// [`Publisher::publish`](crate::server::Publisher::publish).
pub trait AppFunction: Send + Sync + 'static {
    /// Produce a reply for `input`.
    fn call(&self, info: &RequestInfo, input: &Value) -> Value;
}

impl<F> AppFunction for F
where
    F: Fn(&RequestInfo, &Value) -> Value + Send + Sync + 'static,
{
    fn call(&self, info: &RequestInfo, input: &Value) -> Value {
        self(info, input)
    }
}

/// Shared, type-erased application function.
pub type SharedFunction = Arc<dyn AppFunction>;

/// Why an invocation produced no value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvokeError {
    /// The function panicked.
    #[error("application function panicked")]
    Panicked,
    /// The blocking task was cancelled (runtime shutting down).
    #[error("application function was cancelled")]
    Cancelled,
}

/// Run `function` on the blocking pool, isolating panics.
pub async fn invoke(
    function: &SharedFunction,
    info: RequestInfo,
    input: Value,
) -> Result<Value, InvokeError> {
    let function = Arc::clone(function);
    let uri = info.uri.clone();
    match tokio::task::spawn_blocking(move || function.call(&info, &input)).await {
        Ok(value) => Ok(value),
        Err(e) if e.is_panic() => {
            error!(uri, "application function panicked, treating as no response");
            Err(InvokeError::Panicked)
        }
        Err(e) => {
            error!(uri, error = %e, "application function did not complete");
            Err(InvokeError::Cancelled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use serde_json::json;

    #[test]
    fn from_parts_captures_metadata() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/echo?verbose=1")
            .header("content-length", "12")
            .header("x-trace", "abc")
            .body(())
            .unwrap();
        let (parts, ()) = req.into_parts();
        let info = RequestInfo::from_parts(&parts);

        assert_eq!(info.method, Method::POST);
        assert_eq!(info.uri, "/api/echo");
        assert_eq!(info.query.as_deref(), Some("verbose=1"));
        assert_eq!(info.header("x-trace"), Some("abc"));
        assert_eq!(info.content_length(), Some(12));
        assert!(info.remote_addr.is_none());
        assert!(info.connection_id.is_none());
    }

    #[test]
    fn from_parts_reads_connect_info() {
        let addr: SocketAddr = "10.0.0.1:4567".parse().unwrap();
        let mut req = Request::builder().uri("/x").body(()).unwrap();
        let _ = req.extensions_mut().insert(ConnectInfo(addr));
        let (parts, ()) = req.into_parts();
        assert_eq!(RequestInfo::from_parts(&parts).remote_addr, Some(addr));
    }

    #[test]
    fn content_length_ignores_garbage() {
        let mut info = RequestInfo::new(Method::POST, "/x");
        let _ = info
            .headers
            .insert("content-length", "abc".parse().unwrap());
        assert_eq!(info.content_length(), None);
    }

    #[tokio::test]
    async fn invoke_returns_value() {
        let f: SharedFunction = Arc::new(|info: &RequestInfo, input: &Value| {
            json!({"uri": info.uri, "got": input})
        });
        let out = invoke(&f, RequestInfo::new(Method::GET, "/a"), json!(1))
            .await
            .unwrap();
        assert_eq!(out, json!({"uri": "/a", "got": 1}));
    }

    #[tokio::test]
    async fn invoke_catches_panic() {
        let f: SharedFunction = Arc::new(|_: &RequestInfo, _: &Value| -> Value {
            panic!("handler bug");
        });
        let err = invoke(&f, RequestInfo::new(Method::GET, "/a"), Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err, InvokeError::Panicked);
    }

    #[tokio::test]
    async fn invoke_passes_null_through() {
        let f: SharedFunction = Arc::new(|_: &RequestInfo, _: &Value| Value::Null);
        let out = invoke(&f, RequestInfo::new(Method::GET, "/a"), json!({}))
            .await
            .unwrap();
        assert!(out.is_null());
    }
}
