//! Server configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{Result, ServerError};

/// Configuration for a switchboard server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `8080`, `0` for auto-assign).
    pub port: u16,
    /// Directory served for URIs no function handles.
    pub document_root: Option<PathBuf>,
    /// Runtime worker threads. `None` uses one per core.
    pub worker_threads: Option<usize>,
    /// Upper bound on an HTTP request body in bytes.
    pub max_body_size: usize,
    /// Max `WebSocket` message size in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per connection before writes are dropped.
    pub send_queue_capacity: usize,
    /// How long shutdown waits for the listener to drain, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            document_root: None,
            worker_threads: None,
            max_body_size: 2 * 1024 * 1024, // 2 MB
            max_message_size: 16 * 1024 * 1024, // 16 MB
            send_queue_capacity: 256,
            shutdown_timeout_secs: 5,
        }
    }
}

impl ServerConfig {
    /// `host:port` string for binding, bracketing IPv6 hosts.
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Apply flat `[key, value, key, value, ...]` options.
    ///
    /// Recognized keys: `listening_ports`, `document_root`, `num_threads`,
    /// `max_request_size`. Unknown keys are logged and ignored.
    pub fn apply_options<S: AsRef<str>>(&mut self, options: &[S]) -> Result<()> {
        if options.len() % 2 != 0 {
            return Err(ServerError::Config(format!(
                "options must come in key/value pairs, got {} entries",
                options.len()
            )));
        }
        for pair in options.chunks_exact(2) {
            let key = pair[0].as_ref();
            let value = pair[1].as_ref().trim();
            match key {
                "listening_ports" => self.apply_listening_ports(value)?,
                "document_root" => self.document_root = Some(PathBuf::from(value)),
                "num_threads" => {
                    let threads = parse_number(key, value)?;
                    if threads == 0 {
                        return Err(ServerError::Config("num_threads must be at least 1".into()));
                    }
                    self.worker_threads = Some(threads);
                }
                "max_request_size" => self.max_body_size = parse_number(key, value)?,
                other => warn!(option = other, value, "ignoring unsupported transport option"),
            }
        }
        Ok(())
    }

    /// `listening_ports` accepts `8080` or `host:8080`; only the first
    /// comma-separated entry is used.
    fn apply_listening_ports(&mut self, value: &str) -> Result<()> {
        let first = value.split(',').next().unwrap_or_default().trim();
        if first.ends_with('s') || first.ends_with('r') {
            return Err(ServerError::Config(format!(
                "listening_ports entry {first:?} requests TLS or a redirect, which is not supported"
            )));
        }
        let (host, port) = match first.rsplit_once(':') {
            Some((host, port)) => (Some(host), port),
            None => (None, first),
        };
        self.port = port.parse().map_err(|_| {
            ServerError::Config(format!("invalid port in listening_ports: {first:?}"))
        })?;
        if let Some(host) = host {
            let host = host.trim_start_matches('[').trim_end_matches(']');
            if host.is_empty() {
                return Err(ServerError::Config(format!(
                    "invalid host in listening_ports: {first:?}"
                )));
            }
            self.host = host.to_owned();
        }
        Ok(())
    }
}

fn parse_number(key: &str, value: &str) -> Result<usize> {
    value
        .parse()
        .map_err(|_| ServerError::Config(format!("{key} must be a number, got {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 8080);
        assert!(cfg.document_root.is_none());
        assert!(cfg.worker_threads.is_none());
        assert_eq!(cfg.max_body_size, 2 * 1024 * 1024);
        assert_eq!(cfg.max_message_size, 16 * 1024 * 1024);
        assert_eq!(cfg.send_queue_capacity, 256);
        assert_eq!(cfg.shutdown_timeout_secs, 5);
    }

    #[test]
    fn options_port_only() {
        let mut cfg = ServerConfig::default();
        cfg.apply_options(&["listening_ports", "8000"]).unwrap();
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.host, "127.0.0.1");
    }

    #[test]
    fn options_host_and_port() {
        let mut cfg = ServerConfig::default();
        cfg.apply_options(&["listening_ports", "0.0.0.0:9000,9001"])
            .unwrap();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 9000);
    }

    #[test]
    fn options_ipv6_host() {
        let mut cfg = ServerConfig::default();
        cfg.apply_options(&["listening_ports", "[::1]:7000"]).unwrap();
        assert_eq!(cfg.host, "::1");
        assert_eq!(cfg.port, 7000);
    }

    #[test]
    fn bind_addr_brackets_ipv6() {
        let mut cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:8080");
        cfg.host = "::1".into();
        cfg.port = 0;
        assert_eq!(cfg.bind_addr(), "[::1]:0");
    }

    #[test]
    fn options_tls_port_rejected() {
        let mut cfg = ServerConfig::default();
        let err = cfg.apply_options(&["listening_ports", "443s"]).unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[test]
    fn options_document_root_and_threads() {
        let mut cfg = ServerConfig::default();
        cfg.apply_options(&[
            "document_root".to_string(),
            "./web".to_string(),
            "num_threads".to_string(),
            "4".to_string(),
            "max_request_size".to_string(),
            "1024".to_string(),
        ])
        .unwrap();
        assert_eq!(cfg.document_root, Some(PathBuf::from("./web")));
        assert_eq!(cfg.worker_threads, Some(4));
        assert_eq!(cfg.max_body_size, 1024);
    }

    #[test]
    fn options_zero_threads_rejected() {
        let mut cfg = ServerConfig::default();
        assert!(cfg.apply_options(&["num_threads", "0"]).is_err());
    }

    #[test]
    fn options_bad_number_rejected() {
        let mut cfg = ServerConfig::default();
        let err = cfg.apply_options(&["num_threads", "many"]).unwrap_err();
        assert!(err.to_string().contains("num_threads"));
    }

    #[test]
    fn options_odd_length_rejected() {
        let mut cfg = ServerConfig::default();
        assert!(cfg.apply_options(&["document_root"]).is_err());
    }

    #[test]
    fn options_unknown_key_ignored() {
        let mut cfg = ServerConfig::default();
        cfg.apply_options(&["enable_keep_alive", "yes"]).unwrap();
        assert_eq!(cfg.port, 8080);
    }

    #[test]
    fn serde_partial_json_uses_defaults() {
        let cfg: ServerConfig = serde_json::from_str(r#"{"port":3000}"#).unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.send_queue_capacity, 256);
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = ServerConfig {
            document_root: Some(PathBuf::from("/srv/www")),
            worker_threads: Some(2),
            ..ServerConfig::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.document_root, cfg.document_root);
        assert_eq!(back.worker_threads, cfg.worker_threads);
        assert_eq!(back.port, cfg.port);
    }
}
