//! Demo application functions and the tick broadcaster.

use std::time::Duration;

use serde_json::{Value, json};
use switchboard_server::{Publisher, RequestInfo, SwitchboardBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// HTTP echo endpoint.
pub const ECHO_URI: &str = "/api/echo";
/// HTTP endpoint that never produces content.
pub const PING_URI: &str = "/api/ping";
/// `WebSocket` endpoint.
pub const WS_URI: &str = "/ws";

/// Echo the request back with its metadata.
pub fn echo(info: &RequestInfo, input: &Value) -> Value {
    json!({
        "method": info.method.as_str(),
        "uri": info.uri,
        "query": info.query,
        "input": input,
    })
}

/// Always "no content": the request falls through to static files or 404.
pub fn ping(_: &RequestInfo, _: &Value) -> Value {
    Value::Null
}

/// Answer `{"type":"ping"}` with a pong, echo anything else.
pub fn ws_message(info: &RequestInfo, input: &Value) -> Value {
    if input["type"] == "ping" {
        return json!({"type": "pong"});
    }
    json!({
        "type": "echo",
        "conn": info.connection_id.map(|id| id.get()),
        "data": input,
    })
}

/// Bind the demo functions.
pub fn register(builder: SwitchboardBuilder) -> SwitchboardBuilder {
    builder
        .http(ECHO_URI, echo)
        .http(PING_URI, ping)
        .websocket(WS_URI, ws_message)
}

/// Tick message number `seq`.
pub fn tick(seq: u64) -> String {
    json!({"type": "tick", "seq": seq}).to_string()
}

/// Publish a tick on `uri` every `interval` until `token` is cancelled.
pub async fn run_ticker(
    publisher: Publisher,
    uri: String,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // Skip the immediate first tick
    let _ = ticker.tick().await;
    let mut seq = 0u64;
    info!(uri, interval_ms = interval.as_millis(), "ticker started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                seq += 1;
                let delivered = publisher.publish_text(&uri, &tick(seq));
                debug!(uri, seq, delivered, "tick");
            }
            () = token.cancelled() => break,
        }
    }
    info!(uri, ticks = seq, "ticker stopped");
}
