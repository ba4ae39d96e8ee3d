//! Event Bus - synchronous, ordered delivery of `GameEvent`s
//!
//! Listeners are registered per `EventKind` and run in registration order on
//! the supervisor task. They receive the `CommandChannel` so they can answer
//! an event with server commands. A failing listener (error or panic) is
//! logged and skipped; delivery to the remaining listeners continues.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use super::{EventKind, GameEvent};
use crate::supervisor::command::CommandChannel;

/// Listeners must return promptly: they run inline with line processing.
pub type Listener = Box<dyn FnMut(&GameEvent, &CommandChannel) -> anyhow::Result<()> + Send>;

#[derive(Default)]
pub struct EventBus {
    listeners: HashMap<EventKind, Vec<Listener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, kind: EventKind, listener: Listener) {
        self.listeners.entry(kind).or_default().push(listener);
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.get(&kind).map_or(0, Vec::len)
    }

    /// Deliver `event` to every listener of its kind.
    ///
    /// Returns the number of listeners that completed without error.
    pub fn publish(&mut self, event: &GameEvent, commands: &CommandChannel) -> usize {
        let kind = event.kind();
        let Some(listeners) = self.listeners.get_mut(&kind) else {
            return 0;
        };

        let mut delivered = 0;
        for (index, listener) in listeners.iter_mut().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| listener(event, commands))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::warn!("Listener #{} for '{}' failed: {:#}", index, kind, e);
                }
                Err(_) => {
                    tracing::error!("Listener #{} for '{}' panicked", index, kind);
                }
            }
        }
        delivered
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<_, _> = self.listeners.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Listener {
        let log = log.clone();
        Box::new(move |event, _| {
            log.lock().unwrap().push(format!("{}:{}", tag, event.kind()));
            Ok(())
        })
    }

    #[test]
    fn delivers_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.subscribe(EventKind::Saved, recorder(&log, "a"));
        bus.subscribe(EventKind::Saved, recorder(&log, "b"));
        bus.subscribe(EventKind::SaveOn, recorder(&log, "c"));

        let commands = CommandChannel::detached();
        assert_eq!(bus.publish(&GameEvent::Saved, &commands), 2);
        assert_eq!(bus.publish(&GameEvent::SaveOff, &commands), 0);

        assert_eq!(*log.lock().unwrap(), vec!["a:saved", "b:saved"]);
    }

    #[test]
    fn failing_listener_does_not_stop_delivery() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.subscribe(EventKind::Started, Box::new(|_, _| anyhow::bail!("listener broke")));
        bus.subscribe(EventKind::Started, Box::new(|_, _| panic!("listener panicked")));
        bus.subscribe(EventKind::Started, recorder(&log, "ok"));

        let commands = CommandChannel::detached();
        assert_eq!(bus.publish(&GameEvent::Started, &commands), 1);
        assert_eq!(*log.lock().unwrap(), vec!["ok:started"]);
        assert_eq!(bus.listener_count(EventKind::Started), 3);
    }

    #[test]
    fn listener_sees_command_channel() {
        let mut bus = EventBus::new();
        bus.subscribe(
            EventKind::Joined,
            Box::new(|_, commands| {
                // no process attached in this test
                assert!(commands.say("welcome").is_err());
                Ok(())
            }),
        );
        let event = GameEvent::Joined {
            player: "Alice".into(),
            source: None,
            entity_id: 5,
            location: crate::events::Location { x: 1.0, y: 64.0, z: 1.0 },
        };
        assert_eq!(bus.publish(&event, &CommandChannel::detached()), 1);
    }
}
