//! # switchboard-server
//!
//! URI-routed dispatch between an axum HTTP/`WebSocket` transport and
//! application functions.
//!
//! - HTTP: one [`dispatch::RequestDispatcher`] per bound URI decodes the JSON
//!   body, calls the function and writes a `200` JSON response (or reports
//!   the request unhandled when the function returns `null`)
//! - `WebSocket`: one [`websocket::dispatcher::WebSocketDispatcher`] per bound
//!   URI tracks live connections in a [`websocket::registry::ConnectionRegistry`]
//!   and answers text frames on the same connection
//! - Broadcast: [`server::Publisher::publish`] fans a frame out to every live
//!   connection of one URI
//! - Graceful shutdown via `CancellationToken`
//! - Connection, request and broadcast-drop counts through the `metrics`
//!   facade

#![deny(unsafe_code)]

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod handler;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod transport;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::ServerError;
pub use handler::{AppFunction, RequestInfo};
pub use server::{Publisher, ServerHandle, Switchboard, SwitchboardBuilder};
