//! Connection error taxonomy and retry classification.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Close code the server uses for a deliberate, final shutdown. A connection
/// closed with this code must not be retried automatically.
pub const STOP_CLOSE_CODE: u16 = 1000;

/// Server error codes for the invalid/expired-token class. Reconnecting
/// cannot succeed until the caller re-authenticates, so these are final.
pub const AUTH_ERROR_CODES: RangeInclusive<i32> = 40..=43;

/// Error object the server pushes over the socket right before closing it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub status_code: u16,
}

impl ServerError {
    pub fn is_auth_error(&self) -> bool {
        AUTH_ERROR_CODES.contains(&self.code)
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "server error {}: {}", self.code, self.message)
    }
}

/// Frame carrying a [`ServerError`], e.g.
/// `{"error": {"code": 40, "message": "token expired", "status_code": 401}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorFrame {
    pub error: ServerError,
}

/// Why a connection ended, as published with the connection state.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConnectionError {
    /// The transport failed below the protocol layer (DNS, TLS, I/O).
    #[error("transport failure: {0}")]
    Transport(String),
    /// The server closed the socket with a close frame.
    #[error("socket closed by server (code {code}): {reason}")]
    Closed { code: u16, reason: String },
    /// The server pushed an error frame before closing.
    #[error("{0}")]
    Server(ServerError),
    /// No pong arrived within the liveness window.
    #[error("no pong received within the liveness window")]
    PongTimeout,
}

impl ConnectionError {
    /// Whether the server deliberately and finally terminated the session.
    pub fn is_stop(&self) -> bool {
        matches!(self, ConnectionError::Closed { code, .. } if *code == STOP_CLOSE_CODE)
    }

    /// Whether the error requires re-authentication before reconnecting.
    pub fn is_auth(&self) -> bool {
        matches!(self, ConnectionError::Server(err) if err.is_auth_error())
    }
}
