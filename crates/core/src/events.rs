//! Event System
//!
//! Provides a pub/sub event bus for agent lifecycle events.

use parking_lot::RwLock;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::debug;

/// Events emitted by the agent
#[derive(Debug, Clone)]
pub enum Event {
    /// Agent finished startup and is consuming device events
    AgentStarted,
    /// A device completed registration and is controllable
    DeviceRegistered { serial: String },
    /// A device was unregistered and its resources released
    DeviceUnregistered { serial: String },
    /// The set of registered devices changed
    DeviceListChanged { serials: Vec<String> },
    /// Agent shutdown started
    Shutdown,
}

/// Subscriber handle for receiving events
#[derive(Clone)]
pub struct EventSubscription {
    receiver: Receiver<Event>,
}

impl EventSubscription {
    /// Receive the next event (blocking)
    pub fn recv(&self) -> Result<Event, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv(&self) -> Result<Event, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Iterate over pending events
    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.receiver.try_iter()
    }
}

/// Event bus for publish/subscribe pattern
pub struct EventBus {
    subscribers: RwLock<Vec<Sender<Event>>>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> EventSubscription {
        let (sender, receiver) = unbounded();
        self.subscribers.write().push(sender);
        EventSubscription { receiver }
    }

    /// Emit an event to all subscribers, returning the delivery count
    pub fn emit(&self, event: Event) -> usize {
        let subscribers = self.subscribers.read();
        let mut delivered = 0;

        for sender in subscribers.iter() {
            if sender.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }

        debug!("Event {:?} delivered to {} subscribers", event, delivered);
        delivered
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_to_every_subscriber() {
        let bus = EventBus::new();
        let sub1 = bus.subscribe();
        let sub2 = bus.subscribe();

        assert_eq!(bus.subscriber_count(), 2);

        let delivered = bus.emit(Event::AgentStarted);
        assert_eq!(delivered, 2);

        assert!(matches!(sub1.try_recv(), Ok(Event::AgentStarted)));
        assert!(matches!(sub2.try_recv(), Ok(Event::AgentStarted)));
    }

    #[test]
    fn list_change_carries_serials() {
        let bus = EventBus::new();
        let sub = bus.subscribe();

        bus.emit(Event::DeviceListChanged {
            serials: vec!["emulator-5554".into()],
        });

        match sub.try_recv() {
            Ok(Event::DeviceListChanged { serials }) => {
                assert_eq!(serials, vec!["emulator-5554".to_string()]);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
