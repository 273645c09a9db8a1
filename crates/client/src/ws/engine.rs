//! Transport engine owning the raw socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chatline_shared::ConnectionError;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Bytes, Message};
use url::Url;

use super::connection::Command;

/// The connect URL handed to the engine, with auth token and api key already
/// encoded. The core never builds credentials itself; the application layer
/// supplies them as configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    pub url: Url,
}

impl ConnectRequest {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    /// Appends api key and auth token as query parameters.
    pub fn with_credentials(mut base: Url, api_key: &str, token: &str) -> Self {
        base.query_pairs_mut()
            .append_pair("api_key", api_key)
            .append_pair("authorization", token);
        Self { url: base }
    }
}

/// A raw text frame received from the socket, before decoding.
pub type RawFrame = String;

/// Transport callbacks reported by an engine.
#[derive(Debug)]
pub enum EngineEvent {
    /// The socket handshake completed.
    Connected,
    /// The socket closed. `error` is `None` for locally requested closes and
    /// for clean closes without a close frame.
    Disconnected { error: Option<ConnectionError> },
    /// A text frame arrived.
    Message(RawFrame),
    /// A WS-level pong frame arrived.
    PongReceived,
}

/// Handle an engine uses to deliver its callbacks. Events land on the
/// connection's single command queue, so they are observed in arrival order
/// and never interleave with a half-applied state transition.
#[derive(Clone)]
pub struct EngineSender {
    pub(crate) commands: mpsc::WeakUnboundedSender<Command>,
}

impl EngineSender {
    pub fn send(&self, event: EngineEvent) {
        if let Some(commands) = self.commands.upgrade() {
            let _ = commands.send(Command::Engine(event));
        }
    }
}

/// A WebSocket transport. Production code uses [`TungsteniteEngine`]; tests
/// substitute a fake through [`super::Environment`].
///
/// All methods are non-blocking; results come back as [`EngineEvent`]s.
pub trait WsEngine: Send {
    fn connect(&mut self);
    fn disconnect(&mut self);
    fn send_ping(&mut self);
    fn is_connected(&self) -> bool;
}

/// Builds an engine for a connect request. Invoked on the first `connect()`
/// and again whenever the request was replaced.
pub type EngineFactory = Box<dyn FnMut(&ConnectRequest, EngineSender) -> Box<dyn WsEngine> + Send>;

enum SocketCommand {
    Ping,
    Close,
}

/// Production engine on tokio-tungstenite.
pub struct TungsteniteEngine {
    request: ConnectRequest,
    events: EngineSender,
    socket: Option<mpsc::UnboundedSender<SocketCommand>>,
    connected: Arc<AtomicBool>,
}

impl TungsteniteEngine {
    pub fn new(request: ConnectRequest, events: EngineSender) -> Self {
        Self {
            request,
            events,
            socket: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl WsEngine for TungsteniteEngine {
    fn connect(&mut self) {
        // The state machine never calls connect while a socket is live; any
        // previous task sees its command channel close and shuts down.
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        self.socket = Some(command_tx);
        tokio::spawn(run_socket(
            self.request.url.to_string(),
            command_rx,
            self.events.clone(),
            self.connected.clone(),
        ));
    }

    fn disconnect(&mut self) {
        if let Some(socket) = self.socket.take() {
            let _ = socket.send(SocketCommand::Close);
        }
    }

    fn send_ping(&mut self) {
        if let Some(socket) = &self.socket {
            let _ = socket.send(SocketCommand::Ping);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for TungsteniteEngine {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn run_socket(
    url: String,
    mut commands: mpsc::UnboundedReceiver<SocketCommand>,
    events: EngineSender,
    connected: Arc<AtomicBool>,
) {
    let (stream, _response) = match connect_async(url.as_str()).await {
        Ok(ok) => ok,
        Err(err) => {
            tracing::debug!("websocket connect failed: {err}");
            events.send(EngineEvent::Disconnected {
                error: Some(transport_error(err)),
            });
            return;
        }
    };

    connected.store(true, Ordering::SeqCst);
    events.send(EngineEvent::Connected);

    let (mut write, mut read) = stream.split();
    let mut close_error: Option<ConnectionError> = None;

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    events.send(EngineEvent::Message(text.to_string()));
                }
                Some(Ok(Message::Pong(_))) => events.send(EngineEvent::PongReceived),
                Some(Ok(Message::Close(frame))) => {
                    close_error = frame.map(|frame| ConnectionError::Closed {
                        code: u16::from(frame.code),
                        reason: frame.reason.to_string(),
                    });
                    break;
                }
                // Pings are answered by tungstenite; binary frames are not
                // part of the protocol.
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    close_error = Some(transport_error(err));
                    break;
                }
                None => break,
            },
            command = commands.recv() => match command {
                Some(SocketCommand::Ping) => {
                    if let Err(err) = write.send(Message::Ping(Bytes::new())).await {
                        close_error = Some(transport_error(err));
                        break;
                    }
                }
                Some(SocketCommand::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }

    connected.store(false, Ordering::SeqCst);
    events.send(EngineEvent::Disconnected { error: close_error });
}

fn transport_error(err: tungstenite::Error) -> ConnectionError {
    ConnectionError::Transport(err.to_string())
}
