//! # switchboard-logging
//!
//! Structured logging with `tracing`.
//!
//! - [`init_subscriber`] installs the process-wide `tracing` subscriber
//!   (env filter + plain or JSON formatting).
//! - [`LogSink`] is the per-server diagnostic hook handed to the server at
//!   construction and threaded into every dispatcher. The default
//!   [`TracingSink`] forwards to `tracing`.

#![deny(unsafe_code)]

mod sink;
mod subscriber;

pub use sink::{FnSink, LogContext, LogSink, TracingSink};
pub use subscriber::{LogLevel, LoggingConfig, LoggingError, init_subscriber};
