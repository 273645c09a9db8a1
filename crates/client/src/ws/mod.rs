//! WebSocket connection core: state machine, liveness probing, reconnection.
//!
//! # Architecture
//!
//! ```text
//!                    ┌─────────────────────────────┐
//!                    │        WsConnection         │
//!                    │  (handle: commands in, one  │
//!                    │   driver task owns state)   │
//!                    └─────────────────────────────┘
//!        connect/disconnect │          ▲ EngineEvent
//!             send_ping     ▼          │ (same command queue)
//!                    ┌─────────────────────────────┐
//!                    │       WsEngine (trait)      │
//!                    │  TungsteniteEngine in prod  │
//!                    └─────────────────────────────┘
//!
//!   raw frame ─▶ EventDecoder ─▶ middleware chain ─▶ subscribers
//!                                      │
//!                                      └─▶ health.check ⇒ Connected,
//!                                          connection-id waiters drained
//! ```
//!
//! The [`PingController`] and the background task coordinator react to
//! published state changes and funnel their decisions back into the driver
//! as commands, so every state transition happens on one queue, in order.

mod background;
mod connection;
mod decoder;
mod engine;
mod middleware;
mod ping;
mod reconnect;
mod state;

pub use background::{BackgroundTaskHandle, BackgroundTaskScheduler};
pub use connection::{ConnectOptions, Environment, Notification, WsConnection};
pub use decoder::{DecodeError, Event, EventDecoder, JsonEventDecoder};
pub use engine::{
    ConnectRequest, EngineEvent, EngineFactory, EngineSender, RawFrame, TungsteniteEngine,
    WsEngine,
};
pub use middleware::EventMiddleware;
pub use ping::{PingController, DEFAULT_PING_INTERVAL, DEFAULT_PONG_TIMEOUT};
pub use reconnect::{DefaultReconnectionStrategy, ReconnectionStrategy};
pub use state::{ConnectionId, ConnectionState, DisconnectSource};
