//! Chatline realtime client core.
//!
//! This crate maintains the persistent WebSocket connection to a chatline
//! backend: it decodes incoming events, tracks connection state, probes
//! liveness with ping/pong, and reconnects with backoff after connection
//! loss. REST calls, persistence, and UI are separate layers; they consume
//! this crate through [`ws::WsConnection`].

pub mod ws;

pub use ws::{
    ConnectOptions, ConnectRequest, ConnectionState, DisconnectSource, Notification, WsConnection,
};
