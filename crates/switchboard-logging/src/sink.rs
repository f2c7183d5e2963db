//! Per-connection diagnostic sink.

use std::net::SocketAddr;

/// Where a diagnostic line came from.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogContext<'a> {
    /// URI the connection or request is bound to.
    pub uri: &'a str,
    /// WebSocket connection id, when the line concerns a WebSocket.
    pub conn_id: Option<u64>,
    /// Peer address, when the transport knows it.
    pub remote_addr: Option<SocketAddr>,
}

/// Receives connection-level diagnostics ("WS connected", request URIs, ...).
///
/// One sink is owned by each running server and shared by all of its
/// dispatchers.
pub trait LogSink: Send + Sync {
    /// Record one message.
    fn log(&self, context: &LogContext<'_>, message: &str);
}

/// Default sink: forwards every line to `tracing` at `info`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, context: &LogContext<'_>, message: &str) {
        tracing::info!(
            target: "switchboard::connection",
            uri = context.uri,
            conn_id = context.conn_id,
            remote_addr = ?context.remote_addr,
            "{message}"
        );
    }
}

/// Adapts a closure into a [`LogSink`].
pub struct FnSink<F>(F);

impl<F> FnSink<F>
where
    F: Fn(&LogContext<'_>, &str) + Send + Sync,
{
    /// Wrap `f`.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> LogSink for FnSink<F>
where
    F: Fn(&LogContext<'_>, &str) + Send + Sync,
{
    fn log(&self, context: &LogContext<'_>, message: &str) {
        (self.0)(context, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    #[test]
    fn fn_sink_receives_context_and_message() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&lines);
        let sink = FnSink::new(move |ctx: &LogContext<'_>, msg: &str| {
            captured
                .lock()
                .push(format!("{} {:?} {msg}", ctx.uri, ctx.conn_id));
        });

        sink.log(
            &LogContext {
                uri: "/ws",
                conn_id: Some(7),
                remote_addr: None,
            },
            "WS connected",
        );

        assert_eq!(lines.lock().as_slice(), ["/ws Some(7) WS connected"]);
    }

    #[test]
    fn sinks_are_object_safe() {
        let sinks: Vec<Arc<dyn LogSink>> = vec![
            Arc::new(TracingSink),
            Arc::new(FnSink::new(|_: &LogContext<'_>, _: &str| {})),
        ];
        for sink in &sinks {
            sink.log(&LogContext::default(), "hello");
        }
    }
}
