//! The WebSocket connection state machine.

use std::time::Duration;

use chatline_shared::{ConnectionError, ServerEvent};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::background::{BackgroundTaskCoordinator, BackgroundTaskScheduler, LifecycleAction};
use super::decoder::{DecodeError, Event, EventDecoder, JsonEventDecoder};
use super::engine::{ConnectRequest, EngineEvent, EngineFactory, EngineSender, TungsteniteEngine, WsEngine};
use super::middleware::{run_chain, EventMiddleware};
use super::ping::{PingController, DEFAULT_PING_INTERVAL, DEFAULT_PONG_TIMEOUT};
use super::reconnect::{DefaultReconnectionStrategy, ReconnectionStrategy};
use super::state::{ConnectionId, ConnectionState, DisconnectSource};

/// Options controlling connection behavior.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Keep the socket alive under an OS grant when the app backgrounds.
    pub stays_connected_in_background: bool,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            stays_connected_in_background: true,
            ping_interval: DEFAULT_PING_INTERVAL,
            pong_timeout: DEFAULT_PONG_TIMEOUT,
        }
    }
}

/// What the connection broadcasts to subscribers.
#[derive(Debug, Clone)]
pub enum Notification {
    /// A decoded event made it through the middleware chain.
    EventReceived(Event),
    /// The connection state moved.
    ConnectionStateChanged(ConnectionState),
}

/// External collaborators of the connection. The default wires up the
/// production engine, decoder and strategy; tests swap in doubles.
pub struct Environment {
    pub create_engine: EngineFactory,
    pub decoder: Box<dyn EventDecoder>,
    pub strategy: Box<dyn ReconnectionStrategy>,
    pub scheduler: Option<Box<dyn BackgroundTaskScheduler>>,
    pub middlewares: Vec<Box<dyn EventMiddleware>>,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            create_engine: Box::new(|request, events| {
                Box::new(TungsteniteEngine::new(request.clone(), events))
            }),
            decoder: Box::new(JsonEventDecoder),
            strategy: Box::new(DefaultReconnectionStrategy::new()),
            scheduler: None,
            middlewares: Vec::new(),
        }
    }
}

/// Everything that can reach the driver task. Engine callbacks, timers and
/// public calls all land here, so state transitions are totally ordered.
pub(crate) enum Command {
    Connect,
    Disconnect(DisconnectSource),
    RequestConnectionId(oneshot::Sender<Option<ConnectionId>>),
    Subscribe(mpsc::UnboundedSender<Notification>),
    SetConnectRequest(ConnectRequest),
    Engine(EngineEvent),
    ReconnectTimerFired,
    SendPing,
    PongMissed,
    AppDidEnterBackground,
    AppDidBecomeActive,
    BackgroundTaskExpired,
}

/// A managed WebSocket connection to the chat backend.
///
/// The handle is cheap to use from any task; all mutation happens on one
/// driver task that owns the engine, the state and the timers. Dropping the
/// handle tears the connection down: the engine disconnects and every
/// pending connection-id waiter resolves with `None`.
pub struct WsConnection {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl WsConnection {
    /// Creates a connection with the production environment. Must be called
    /// within a tokio runtime; no socket is opened until [`connect`] is
    /// called.
    ///
    /// [`connect`]: WsConnection::connect
    pub fn new(request: ConnectRequest, options: ConnectOptions) -> Self {
        Self::with_environment(request, options, Environment::default())
    }

    /// Creates a connection with injected collaborators.
    pub fn with_environment(
        request: ConnectRequest,
        options: ConnectOptions,
        environment: Environment,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());

        // The ping controller and timers hold weak senders: only the public
        // handle keeps the command queue open, so dropping it shuts the
        // driver down.
        let ping = {
            let send = commands_tx.downgrade();
            let missed = commands_tx.downgrade();
            PingController::new(
                options.ping_interval,
                options.pong_timeout,
                move || {
                    if let Some(commands) = send.upgrade() {
                        let _ = commands.send(Command::SendPing);
                    }
                },
                move || {
                    if let Some(commands) = missed.upgrade() {
                        let _ = commands.send(Command::PongMissed);
                    }
                },
            )
        };

        let driver = Driver {
            request,
            create_engine: environment.create_engine,
            engine: None,
            engine_stale: false,
            decoder: environment.decoder,
            strategy: environment.strategy,
            middlewares: environment.middlewares,
            background: BackgroundTaskCoordinator::new(
                environment.scheduler,
                options.stays_connected_in_background,
            ),
            ping,
            state: ConnectionState::default(),
            state_tx,
            subscribers: Vec::new(),
            connection_id_waiters: Vec::new(),
            reconnect_timer: None,
            commands: commands_tx.downgrade(),
        };
        tokio::spawn(driver.run(commands_rx));

        Self {
            commands: commands_tx,
            state: state_rx,
        }
    }

    /// Opens the connection. Has no effect while already connecting or
    /// connected; while waiting for a reconnect it cancels the backoff timer
    /// and connects immediately.
    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    /// Closes the connection on behalf of the user. Never followed by an
    /// automatic reconnect.
    pub fn disconnect(&self) {
        self.disconnect_with_source(DisconnectSource::UserInitiated);
    }

    pub fn disconnect_with_source(&self, source: DisconnectSource) {
        let _ = self.commands.send(Command::Disconnect(source));
    }

    /// Requests the connection id. Resolves immediately when connected,
    /// otherwise when the id becomes available; resolves with `None` when
    /// the connection settles without one or the handle is dropped. Waiters
    /// are served in request order.
    pub fn request_connection_id(&self) -> oneshot::Receiver<Option<ConnectionId>> {
        let (waiter_tx, waiter_rx) = oneshot::channel();
        let _ = self.commands.send(Command::RequestConnectionId(waiter_tx));
        waiter_rx
    }

    /// Convenience wrapper around [`request_connection_id`].
    ///
    /// [`request_connection_id`]: WsConnection::request_connection_id
    pub async fn connection_id(&self) -> Option<ConnectionId> {
        self.request_connection_id().await.unwrap_or(None)
    }

    /// Registers a subscriber. Every decoded event and state change is
    /// delivered to all current subscribers in registration order.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Notification> {
        let (subscriber_tx, subscriber_rx) = mpsc::unbounded_channel();
        let _ = self.commands.send(Command::Subscribe(subscriber_tx));
        subscriber_rx
    }

    /// Snapshot of the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// A watch receiver for awaiting state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Replaces the connect request (e.g. after a token refresh). The
    /// existing connection is untouched; the engine is rebuilt on the next
    /// [`connect`].
    ///
    /// [`connect`]: WsConnection::connect
    pub fn set_connect_request(&self, request: ConnectRequest) {
        let _ = self.commands.send(Command::SetConnectRequest(request));
    }

    /// The app moved to the background.
    pub fn app_did_enter_background(&self) {
        let _ = self.commands.send(Command::AppDidEnterBackground);
    }

    /// The app returned to the foreground.
    pub fn app_did_become_active(&self) {
        let _ = self.commands.send(Command::AppDidBecomeActive);
    }
}

/// Owns all mutable connection state; runs until the handle is dropped.
struct Driver {
    request: ConnectRequest,
    create_engine: EngineFactory,
    engine: Option<Box<dyn WsEngine>>,
    engine_stale: bool,
    decoder: Box<dyn EventDecoder>,
    strategy: Box<dyn ReconnectionStrategy>,
    middlewares: Vec<Box<dyn EventMiddleware>>,
    background: BackgroundTaskCoordinator,
    ping: PingController,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    subscribers: Vec<mpsc::UnboundedSender<Notification>>,
    connection_id_waiters: Vec<oneshot::Sender<Option<ConnectionId>>>,
    reconnect_timer: Option<JoinHandle<()>>,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            self.handle(command);
        }
        self.shutdown();
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect(),
            Command::Disconnect(source) => self.disconnect(source),
            Command::RequestConnectionId(waiter) => {
                if let ConnectionState::Connected { connection_id } = &self.state {
                    let _ = waiter.send(Some(connection_id.clone()));
                } else {
                    self.connection_id_waiters.push(waiter);
                }
            }
            Command::Subscribe(subscriber) => self.subscribers.push(subscriber),
            Command::SetConnectRequest(request) => {
                self.request = request;
                self.engine_stale = true;
            }
            Command::Engine(event) => self.handle_engine_event(event),
            Command::ReconnectTimerFired => {
                if matches!(self.state, ConnectionState::WaitingForReconnect { .. }) {
                    self.connect();
                }
            }
            Command::SendPing => {
                if self.state.is_connected() {
                    if let Some(engine) = self.engine.as_mut() {
                        engine.send_ping();
                    }
                }
            }
            Command::PongMissed => {
                if self.state.is_connected() {
                    self.disconnect(DisconnectSource::ServerInitiated {
                        error: Some(ConnectionError::PongTimeout),
                    });
                }
            }
            Command::AppDidEnterBackground => self.app_did_enter_background(),
            Command::AppDidBecomeActive => self.background.app_did_become_active(),
            Command::BackgroundTaskExpired => {
                self.background.task_expired();
                self.disconnect(DisconnectSource::SystemInitiated);
            }
        }
    }

    fn connect(&mut self) {
        match self.state {
            // Already on the way up
            ConnectionState::Connecting
            | ConnectionState::WaitingForConnectionId
            | ConnectionState::Connected { .. } => return,
            _ => {}
        }

        // Manual intent overrides a scheduled backoff
        self.cancel_reconnect_timer();
        self.background.cancel_task_if_needed();

        if self.engine.is_none() || self.engine_stale {
            self.engine_stale = false;
            let events = EngineSender {
                commands: self.commands.clone(),
            };
            let request = self.request.clone();
            self.engine = Some((self.create_engine)(&request, events));
        }

        self.set_state(ConnectionState::Connecting);
        if let Some(engine) = self.engine.as_mut() {
            engine.connect();
        }
    }

    fn disconnect(&mut self, source: DisconnectSource) {
        if !self.state.is_active() {
            if matches!(self.state, ConnectionState::WaitingForReconnect { .. }) {
                // Disconnecting wins over a scheduled retry
                self.cancel_reconnect_timer();
                self.set_state(ConnectionState::NotConnected { error: None });
            }
            return;
        }

        self.set_state(ConnectionState::Disconnecting { source });
        if let Some(engine) = self.engine.as_mut() {
            engine.disconnect();
        }
    }

    fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Connected => {
                if matches!(self.state, ConnectionState::Connecting) {
                    self.set_state(ConnectionState::WaitingForConnectionId);
                }
            }
            EngineEvent::Disconnected { error } => self.handle_engine_disconnect(error),
            EngineEvent::Message(frame) => self.handle_frame(&frame),
            EngineEvent::PongReceived => self.ping.pong_received(),
        }
    }

    fn handle_frame(&mut self, frame: &str) {
        let event = match self.decoder.decode(frame) {
            Ok(event) => event,
            Err(DecodeError::ErrorFrame(error)) => {
                warn!("server error on socket: {error}");
                if self.state.is_active() {
                    self.set_state(ConnectionState::Disconnecting {
                        source: DisconnectSource::ServerInitiated {
                            error: Some(ConnectionError::Server(error)),
                        },
                    });
                }
                return;
            }
            // One bad frame must not kill the connection
            Err(err) => {
                debug!("dropping frame: {err}");
                return;
            }
        };

        let Some(event) = run_chain(&mut self.middlewares, event) else {
            return;
        };

        if let ServerEvent::HealthCheck { connection_id } = &event.payload {
            self.ping.pong_received();
            if matches!(self.state, ConnectionState::WaitingForConnectionId) {
                self.set_state(ConnectionState::Connected {
                    connection_id: connection_id.clone(),
                });
            }
        }

        self.publish(Notification::EventReceived(event));
    }

    fn handle_engine_disconnect(&mut self, engine_error: Option<ConnectionError>) {
        let disconnecting = matches!(self.state, ConnectionState::Disconnecting { .. });
        if !self.state.is_active() && !disconnecting {
            return;
        }

        let (may_reconnect, error) = match &self.state {
            ConnectionState::Disconnecting { source } => {
                // A server-pushed error frame beats the bland engine error
                let error = match source {
                    DisconnectSource::ServerInitiated { error: Some(error) } => Some(error.clone()),
                    _ => engine_error,
                };
                (source.may_reconnect(), error)
            }
            // Connection loss without a disconnect request
            _ => (true, engine_error),
        };

        if may_reconnect {
            if let Some(delay) = self.strategy.reconnection_delay(error.as_ref()) {
                info!("connection lost, retrying in {delay:?}");
                self.set_state(ConnectionState::WaitingForReconnect { error });
                self.schedule_reconnect(delay);
                return;
            }
        }

        self.set_state(ConnectionState::NotConnected { error });
    }

    fn app_did_enter_background(&mut self) {
        let commands = self.commands.clone();
        let expiration = Box::new(move || {
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::BackgroundTaskExpired);
            }
        });
        let action = self
            .background
            .app_did_enter_background(self.state.is_active(), expiration);
        if action == LifecycleAction::Disconnect {
            self.disconnect(DisconnectSource::SystemInitiated);
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        info!("connection state changed: {state}");
        self.state = state.clone();

        if state.is_connected() {
            self.strategy.successfully_connected();
        }
        self.ping.connection_state_did_change(&state);

        match &state {
            ConnectionState::Connected { connection_id } => {
                self.drain_connection_id_waiters(Some(connection_id.clone()));
            }
            ConnectionState::NotConnected { .. } => {
                // Settled: no socket, no retry scheduled
                self.background.cancel_task_if_needed();
                self.drain_connection_id_waiters(None);
            }
            _ => {}
        }

        let _ = self.state_tx.send(state.clone());
        self.publish(Notification::ConnectionStateChanged(state));
    }

    fn publish(&mut self, notification: Notification) {
        self.subscribers
            .retain(|subscriber| subscriber.send(notification.clone()).is_ok());
    }

    fn drain_connection_id_waiters(&mut self, connection_id: Option<ConnectionId>) {
        for waiter in self.connection_id_waiters.drain(..) {
            let _ = waiter.send(connection_id.clone());
        }
    }

    fn schedule_reconnect(&mut self, delay: Duration) {
        self.cancel_reconnect_timer();
        let commands = self.commands.clone();
        self.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::ReconnectTimerFired);
            }
        }));
    }

    /// Safe to call at any time; aborting a finished timer is a no-op, and a
    /// stale fire is discarded by the state guard on `ReconnectTimerFired`.
    fn cancel_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    fn shutdown(mut self) {
        debug!("connection handle dropped, shutting down");
        self.cancel_reconnect_timer();
        self.drain_connection_id_waiters(None);
        self.background.cancel_task_if_needed();
        if let Some(engine) = self.engine.as_mut() {
            engine.disconnect();
        }
    }
}
