//! `WebSocket` connection tracking, dispatch, and broadcasting.

pub mod connection;
pub mod dispatcher;
pub mod registry;
pub mod socket;
