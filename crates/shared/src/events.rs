//! Event envelope and server event types for the realtime socket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope wrapping every frame the server pushes over the socket.
///
/// The payload is flattened, so a frame looks like
/// `{"id": "...", "type": "...", "data": {...}, "ts": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WsEnvelope<T> {
    pub id: String,
    #[serde(flatten)]
    pub payload: T,
    pub ts: DateTime<Utc>,
}

/// A chat message as it appears inside realtime events.
///
/// Deliberately minimal: the realtime core only forwards messages, the full
/// domain model lives with the REST layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub author_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Events pushed by the server, tagged by their dotted type name.
///
/// Frames with a type name not listed here fail to decode and are skipped by
/// the client; the protocol adds event types without version bumps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    /// First event after the socket opens; carries the connection id that
    /// authorizes subsequent REST calls for this session.
    #[serde(rename = "health.check")]
    HealthCheck { connection_id: String },
    #[serde(rename = "message.new")]
    MessageNew { channel_id: String, message: Message },
    #[serde(rename = "message.updated")]
    MessageUpdated { channel_id: String, message: Message },
    #[serde(rename = "message.deleted")]
    MessageDeleted { channel_id: String, message_id: String },
    #[serde(rename = "typing.start")]
    TypingStart { channel_id: String, user_id: String },
    #[serde(rename = "typing.stop")]
    TypingStop { channel_id: String, user_id: String },
    #[serde(rename = "presence.changed")]
    PresenceChanged { user_id: String, online: bool },
}

impl ServerEvent {
    /// Connection id carried by a handshake event, if this is one.
    pub fn connection_id(&self) -> Option<&str> {
        match self {
            ServerEvent::HealthCheck { connection_id } => Some(connection_id),
            _ => None,
        }
    }
}
