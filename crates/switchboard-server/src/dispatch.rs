//! HTTP request dispatch for one bound URI.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::StatusCode;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use metrics::counter;
use serde_json::Value;
use switchboard_logging::{LogContext, LogSink};
use tracing::{debug, warn};

use crate::codec;
use crate::handler::{self, RequestInfo, SharedFunction};
use crate::metrics::HTTP_REQUESTS_TOTAL;
use crate::transport::{HttpOutcome, HttpReply, TransportHandler};

/// Initial buffer reservation when reading a body.
const READ_CHUNK: usize = 1024;

/// The request body is larger than the configured limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("request body exceeds {limit} bytes")]
pub struct BodyTooLarge {
    /// Configured `max_body_size`.
    pub limit: usize,
}

/// Read a request body.
///
/// With a declared length, reads until that many bytes have arrived; a
/// declared length over `limit` is rejected before reading. Without one,
/// reads to the end of the stream and rejects the body once it passes
/// `limit`. If the stream ends or errors first, whatever was read is the
/// body.
pub async fn read_body(
    body: Body,
    declared: Option<u64>,
    limit: usize,
) -> Result<Bytes, BodyTooLarge> {
    let wanted = match declared.map(usize::try_from) {
        Some(Ok(n)) if n <= limit => n,
        Some(_) => return Err(BodyTooLarge { limit }),
        None => limit,
    };

    let mut buf = BytesMut::with_capacity(wanted.min(READ_CHUNK));
    let mut stream = body.into_data_stream();
    loop {
        if declared.is_some() && buf.len() >= wanted {
            break;
        }
        match stream.next().await {
            Some(Ok(chunk)) => {
                if declared.is_none() && buf.len() + chunk.len() > limit {
                    return Err(BodyTooLarge { limit });
                }
                let take = chunk.len().min(wanted - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            Some(Err(e)) => {
                debug!(error = %e, read = buf.len(), "body stream failed, using partial body");
                break;
            }
            None => break,
        }
    }
    Ok(buf.freeze())
}

/// Dispatcher bound to one HTTP URI.
pub struct RequestDispatcher {
    uri: String,
    function: SharedFunction,
    sink: Arc<dyn LogSink>,
    max_body_size: usize,
}

impl RequestDispatcher {
    /// Bind `function` to `uri`.
    pub fn new(
        uri: impl Into<String>,
        function: SharedFunction,
        sink: Arc<dyn LogSink>,
        max_body_size: usize,
    ) -> Self {
        Self {
            uri: uri.into(),
            function,
            sink,
            max_body_size,
        }
    }

    /// Bound URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    fn count(&self, outcome: &'static str) {
        counter!(HTTP_REQUESTS_TOTAL, "uri" => self.uri.clone(), "outcome" => outcome).increment(1);
    }
}

#[async_trait]
impl TransportHandler for RequestDispatcher {
    async fn handle_request(&self, info: RequestInfo, body: Body) -> HttpOutcome {
        let context = LogContext {
            uri: &self.uri,
            conn_id: None,
            remote_addr: info.remote_addr,
        };
        self.sink.log(&context, &format!("{} {}", info.method, info.uri));

        let bytes = match read_body(body, info.content_length(), self.max_body_size).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(uri = %self.uri, error = %e, "rejecting request body");
                self.count("rejected");
                return HttpOutcome::Rejected(StatusCode::PAYLOAD_TOO_LARGE);
            }
        };
        let decoded = codec::decode(&bytes);
        if !decoded.ok {
            warn!(
                uri = %self.uri,
                len = bytes.len(),
                error = decoded.error.as_deref().unwrap_or_default(),
                "received unknown message, continuing with null input"
            );
        }

        match handler::invoke(&self.function, info, decoded.value).await {
            Ok(Value::Null) | Err(_) => {
                debug!(uri = %self.uri, "no content, leaving request unhandled");
                self.count("unhandled");
                HttpOutcome::Unhandled
            }
            Ok(out) => {
                let answer = codec::encode(&out);
                self.sink.log(&context, &answer);
                self.count("handled");
                HttpOutcome::Handled(HttpReply { body: answer })
            }
        }
    }
}
