//! Middleware chain for decoded events.

use super::decoder::Event;

/// A hook that sees every decoded event before it is published. Middlewares
/// run sequentially in registration order; each may pass the event on,
/// replace it, or swallow it by returning `None`.
pub trait EventMiddleware: Send {
    fn handle(&mut self, event: Event) -> Option<Event>;
}

impl<F> EventMiddleware for F
where
    F: FnMut(Event) -> Option<Event> + Send,
{
    fn handle(&mut self, event: Event) -> Option<Event> {
        self(event)
    }
}

/// Runs `event` through the chain. `None` means some middleware dropped it.
pub(crate) fn run_chain(
    middlewares: &mut [Box<dyn EventMiddleware>],
    event: Event,
) -> Option<Event> {
    let mut current = event;
    for middleware in middlewares.iter_mut() {
        current = middleware.handle(current)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use chatline_shared::ServerEvent;
    use chrono::Utc;

    use super::*;

    fn typing_event(channel_id: &str) -> Event {
        Event {
            id: "evt".into(),
            payload: ServerEvent::TypingStart {
                channel_id: channel_id.into(),
                user_id: "ada".into(),
            },
            ts: Utc::now(),
        }
    }

    #[test]
    fn chain_runs_in_registration_order() {
        let mut middlewares: Vec<Box<dyn EventMiddleware>> = vec![
            Box::new(|mut event: Event| {
                event.id.push_str("-a");
                Some(event)
            }),
            Box::new(|mut event: Event| {
                event.id.push_str("-b");
                Some(event)
            }),
        ];

        let out = run_chain(&mut middlewares, typing_event("general")).unwrap();
        assert_eq!(out.id, "evt-a-b");
    }

    #[test]
    fn middleware_can_swallow_events() {
        let mut middlewares: Vec<Box<dyn EventMiddleware>> = vec![
            Box::new(|event: Event| {
                match &event.payload {
                    ServerEvent::TypingStart { channel_id, .. } if channel_id == "muted" => None,
                    _ => Some(event),
                }
            }),
            Box::new(|event: Event| Some(event)),
        ];

        assert!(run_chain(&mut middlewares, typing_event("muted")).is_none());
        assert!(run_chain(&mut middlewares, typing_event("general")).is_some());
    }
}
