//! Incoming frame decoding.

use chatline_shared::{ErrorFrame, ServerError, ServerEvent, WsEnvelope};
use thiserror::Error;

/// The decoded event type that flows through the middleware chain and out to
/// subscribers.
pub type Event = WsEnvelope<ServerEvent>;

#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not a known event. One bad frame never kills the
    /// connection; it is logged and skipped.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The server pushed an error frame; a socket close follows.
    #[error("{0}")]
    ErrorFrame(ServerError),
}

/// Turns a raw frame into a typed event. Pluggable so tests and future wire
/// formats can substitute their own.
pub trait EventDecoder: Send {
    fn decode(&self, frame: &str) -> Result<Event, DecodeError>;
}

/// Decoder for the chatline JSON wire protocol.
#[derive(Debug, Clone, Default)]
pub struct JsonEventDecoder;

impl EventDecoder for JsonEventDecoder {
    fn decode(&self, frame: &str) -> Result<Event, DecodeError> {
        match serde_json::from_str::<Event>(frame) {
            Ok(event) => Ok(event),
            Err(err) => {
                // Not an event. The server sends a bare error object right
                // before it closes the connection on us.
                if let Ok(error_frame) = serde_json::from_str::<ErrorFrame>(frame) {
                    return Err(DecodeError::ErrorFrame(error_frame.error));
                }
                Err(DecodeError::Malformed(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_health_check() {
        let frame = r#"{
            "id": "evt_1",
            "type": "health.check",
            "data": { "connection_id": "conn-9" },
            "ts": "2026-01-12T09:30:00Z"
        }"#;

        let event = JsonEventDecoder.decode(frame).unwrap();
        assert_eq!(event.payload.connection_id(), Some("conn-9"));
    }

    #[test]
    fn malformed_frame_is_malformed() {
        let err = JsonEventDecoder.decode("{ not json").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn unknown_event_type_is_malformed() {
        let frame = r#"{"id": "evt_2", "type": "poll.created", "data": {}, "ts": "2026-01-12T09:30:00Z"}"#;
        let err = JsonEventDecoder.decode(frame).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn error_frame_is_recognized() {
        let frame = r#"{"error": {"code": 40, "message": "token expired", "status_code": 401}}"#;
        match JsonEventDecoder.decode(frame).unwrap_err() {
            DecodeError::ErrorFrame(error) => {
                assert_eq!(error.code, 40);
                assert!(error.is_auth_error());
            }
            other => panic!("unexpected decode result: {other:?}"),
        }
    }
}
