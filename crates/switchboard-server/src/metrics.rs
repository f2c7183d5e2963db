//! Metric names emitted through the `metrics` facade.
//!
//! Nothing is recorded unless the embedding process installs a recorder.

/// HTTP requests dispatched to a bound function (counter, labels: uri, outcome).
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
/// `WebSocket` connections opened total (counter, labels: uri).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// `WebSocket` disconnections total (counter, labels: uri).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active `WebSocket` connections (gauge, labels: uri).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Broadcast frames that could not be queued (counter, labels: uri).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// `WebSocket` connection duration seconds (histogram, labels: uri).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_snake_case() {
        for name in [
            HTTP_REQUESTS_TOTAL,
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_BROADCAST_DROPS_TOTAL,
            WS_CONNECTION_DURATION_SECONDS,
        ] {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }

    #[test]
    fn capture_recorder_counts_by_name() {
        let recorder = capture::CaptureRecorder::default();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!(WS_CONNECTIONS_TOTAL, "uri" => "/a").increment(2);
            metrics::counter!(WS_CONNECTIONS_TOTAL, "uri" => "/b").increment(1);
        });
        assert_eq!(recorder.counter(WS_CONNECTIONS_TOTAL), 3);
        assert_eq!(recorder.counter(WS_BROADCAST_DROPS_TOTAL), 0);
    }
}
