//! Server error types.

use thiserror::Error;

/// Errors that stop a server from starting.
///
/// Everything that can go wrong while serving (malformed payloads, short
/// reads, failed writes, panicking application functions) is handled locally
/// and never surfaces here.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A configuration option or binding was rejected.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type for server construction.
pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn bind_error_display_and_source() {
        let err = ServerError::Bind {
            addr: "127.0.0.1:80".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "failed to bind 127.0.0.1:80: denied");
        assert!(err.source().is_some());
    }

    #[test]
    fn config_error_display() {
        let err = ServerError::Config("num_threads must be a number".into());
        assert_eq!(
            err.to_string(),
            "invalid configuration: num_threads must be a number"
        );
    }
}
