//! Connection state published by the state machine.

use std::fmt;

use chatline_shared::ConnectionError;

/// Opaque identifier issued by the server for one live socket session.
pub type ConnectionId = String;

/// Who asked for a disconnect.
#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectSource {
    /// The owning application asked; never followed by a reconnect.
    UserInitiated,
    /// The server closed the connection, or a connectivity failure forced it
    /// shut. Reconnection goes through the strategy.
    ServerInitiated { error: Option<ConnectionError> },
    /// The app lifecycle closed the connection (background limits).
    SystemInitiated,
}

impl DisconnectSource {
    /// Whether a reconnect may be attempted once the engine confirms the
    /// disconnect.
    pub(crate) fn may_reconnect(&self) -> bool {
        matches!(self, DisconnectSource::ServerInitiated { .. })
    }
}

/// The canonical connection state. Exactly one is active at a time; all
/// transitions happen on the connection's driver task.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// No connection and no reconnection attempt scheduled.
    NotConnected { error: Option<ConnectionError> },
    /// `connect()` was issued to the engine; socket handshake in progress.
    Connecting,
    /// Socket open, awaiting the health-check event with the connection id.
    WaitingForConnectionId,
    /// Handshake complete; the connection is usable.
    Connected { connection_id: ConnectionId },
    /// Disconnect requested; waiting for the engine to confirm.
    Disconnecting { source: DisconnectSource },
    /// Disconnected; a backoff timer is scheduled.
    WaitingForReconnect { error: Option<ConnectionError> },
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::NotConnected { error: None }
    }
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    /// States with a live or pending socket.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::WaitingForConnectionId
                | ConnectionState::Connected { .. }
        )
    }

    /// The connection id, only available while connected.
    pub fn connection_id(&self) -> Option<&str> {
        match self {
            ConnectionState::Connected { connection_id } => Some(connection_id),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::NotConnected { error: None } => write!(f, "not connected"),
            ConnectionState::NotConnected { error: Some(err) } => {
                write!(f, "not connected ({err})")
            }
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::WaitingForConnectionId => write!(f, "waiting for connection id"),
            ConnectionState::Connected { connection_id } => {
                write!(f, "connected ({connection_id})")
            }
            ConnectionState::Disconnecting { .. } => write!(f, "disconnecting"),
            ConnectionState::WaitingForReconnect { .. } => write!(f, "waiting for reconnect"),
        }
    }
}
