//! Ping/pong liveness probing.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::state::ConnectionState;

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(25);
pub const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(3);

enum PingMessage {
    ConnectionStateChanged { connected: bool },
    PongReceived,
}

/// Probes liveness while the connection is up: every ping interval it fires
/// the send-ping action and arms a pong deadline; if nothing proves the
/// server alive before the deadline, the pong-missed action fires.
///
/// One repeating interval exists per controller. It is suspended and resumed
/// on state changes, never recreated, so the schedule does not drift.
pub struct PingController {
    messages: mpsc::UnboundedSender<PingMessage>,
}

impl PingController {
    /// Spawns the controller task. `send_ping` and `pong_missed` are invoked
    /// from that task; both should forward into the connection's command
    /// queue.
    pub fn new(
        ping_interval: Duration,
        pong_timeout: Duration,
        send_ping: impl Fn() + Send + 'static,
        pong_missed: impl Fn() + Send + 'static,
    ) -> Self {
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(
            ping_interval,
            pong_timeout,
            messages_rx,
            send_ping,
            pong_missed,
        ));
        Self {
            messages: messages_tx,
        }
    }

    /// Resumes probing when the state became connected, suspends it
    /// otherwise.
    pub fn connection_state_did_change(&self, state: &ConnectionState) {
        let _ = self.messages.send(PingMessage::ConnectionStateChanged {
            connected: state.is_connected(),
        });
    }

    /// Evidence that the server is alive; disarms the pending pong deadline.
    pub fn pong_received(&self) {
        let _ = self.messages.send(PingMessage::PongReceived);
    }
}

async fn run(
    ping_interval: Duration,
    pong_timeout: Duration,
    mut messages: mpsc::UnboundedReceiver<PingMessage>,
    send_ping: impl Fn(),
    pong_missed: impl Fn(),
) {
    let mut interval = time::interval(ping_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let pong_deadline = time::sleep(Duration::ZERO);
    tokio::pin!(pong_deadline);

    let mut connected = false;
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            message = messages.recv() => match message {
                Some(PingMessage::ConnectionStateChanged { connected: now_connected }) => {
                    connected = now_connected;
                    awaiting_pong = false;
                    if connected {
                        // First ping one full interval after the handshake.
                        interval.reset();
                    }
                }
                Some(PingMessage::PongReceived) => awaiting_pong = false,
                // Controller dropped with the connection.
                None => break,
            },
            _ = interval.tick(), if connected => {
                tracing::debug!("sending ping");
                send_ping();
                awaiting_pong = true;
                pong_deadline.as_mut().reset(Instant::now() + pong_timeout);
            },
            _ = &mut pong_deadline, if awaiting_pong => {
                tracing::warn!("no pong within {pong_timeout:?}, forcing reconnect");
                awaiting_pong = false;
                pong_missed();
            },
        }
    }
}
