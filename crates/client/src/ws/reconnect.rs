//! Reconnection backoff policy.

use std::time::Duration;

use chatline_shared::ConnectionError;
use rand::Rng;

/// Decides whether and when to retry after a connection loss.
pub trait ReconnectionStrategy: Send {
    /// Called on every disconnect that may be retried. Doubles as the
    /// failure record: each call counts as one consecutive failure. Returns
    /// the delay before the next attempt, or `None` to give up until the
    /// caller explicitly reconnects.
    fn reconnection_delay(&mut self, error: Option<&ConnectionError>) -> Option<Duration>;

    /// Called when a connection handshake completes, resetting the failure
    /// streak.
    fn successfully_connected(&mut self);
}

const MAX_DELAY_SECS: f64 = 25.0;

/// Default backoff: a uniformly random delay from a window that widens with
/// each consecutive failure, capped at 25 seconds. Stop closes and
/// auth-class errors are never retried.
#[derive(Debug, Default)]
pub struct DefaultReconnectionStrategy {
    consecutive_failures: f64,
}

impl DefaultReconnectionStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    fn delay_window(&self) -> (f64, f64) {
        let n = self.consecutive_failures;
        let max = f64::min(0.5 + n * 2.0, MAX_DELAY_SECS);
        let min = f64::min(f64::max(0.25, (n - 1.0) * 2.0), MAX_DELAY_SECS);
        (min, max)
    }
}

impl ReconnectionStrategy for DefaultReconnectionStrategy {
    fn reconnection_delay(&mut self, error: Option<&ConnectionError>) -> Option<Duration> {
        if let Some(error) = error {
            if error.is_stop() || error.is_auth() {
                return None;
            }
        }

        self.consecutive_failures += 1.0;
        let (min, max) = self.delay_window();
        let delay = rand::thread_rng().gen_range(min..=max);
        Some(Duration::from_secs_f64(delay))
    }

    fn successfully_connected(&mut self) {
        self.consecutive_failures = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use chatline_shared::{ServerError, STOP_CLOSE_CODE};

    use super::*;

    fn transport_error() -> ConnectionError {
        ConnectionError::Transport("connection reset".into())
    }

    #[test]
    fn delay_windows_widen_with_consecutive_failures() {
        let mut strategy = DefaultReconnectionStrategy::new();

        let first = strategy
            .reconnection_delay(Some(&transport_error()))
            .unwrap();
        assert!(first >= Duration::from_secs_f64(0.25));
        assert!(first <= Duration::from_secs_f64(2.5));

        for _ in 0..4 {
            strategy.reconnection_delay(Some(&transport_error()));
        }

        // Sixth failure: window is [10, 12.5]
        let sixth = strategy
            .reconnection_delay(Some(&transport_error()))
            .unwrap();
        assert!(sixth >= Duration::from_secs(10));
        assert!(sixth <= Duration::from_secs_f64(12.5));
    }

    #[test]
    fn delays_cap_at_twenty_five_seconds() {
        let mut strategy = DefaultReconnectionStrategy::new();
        for _ in 0..50 {
            let delay = strategy.reconnection_delay(None).unwrap();
            assert!(delay <= Duration::from_secs(25));
        }
    }

    #[test]
    fn success_resets_the_window() {
        let mut strategy = DefaultReconnectionStrategy::new();
        for _ in 0..10 {
            strategy.reconnection_delay(Some(&transport_error()));
        }

        strategy.successfully_connected();

        let delay = strategy
            .reconnection_delay(Some(&transport_error()))
            .unwrap();
        assert!(delay <= Duration::from_secs_f64(2.5));
    }

    #[test]
    fn clean_close_without_error_is_retried() {
        let mut strategy = DefaultReconnectionStrategy::new();
        assert!(strategy.reconnection_delay(None).is_some());
    }

    #[test]
    fn stop_close_code_gives_up() {
        let mut strategy = DefaultReconnectionStrategy::new();
        let stop = ConnectionError::Closed {
            code: STOP_CLOSE_CODE,
            reason: "shutting down".into(),
        };
        assert_eq!(strategy.reconnection_delay(Some(&stop)), None);
    }

    #[test]
    fn auth_errors_give_up() {
        let mut strategy = DefaultReconnectionStrategy::new();
        let auth = ConnectionError::Server(ServerError {
            code: 41,
            message: "invalid token".into(),
            status_code: 401,
        });
        assert_eq!(strategy.reconnection_delay(Some(&auth)), None);
    }

    #[test]
    fn pong_timeout_is_retried() {
        let mut strategy = DefaultReconnectionStrategy::new();
        assert!(strategy
            .reconnection_delay(Some(&ConnectionError::PongTimeout))
            .is_some());
    }
}
