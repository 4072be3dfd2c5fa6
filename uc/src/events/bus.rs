//! Event Bus - broadcast of coordinator lifecycle events
//!
//! The EventBus uses a tokio broadcast channel. Coordinators emit, consumers
//! (the JSONL logger, tests) subscribe.

use tokio::sync::broadcast;
use tracing::debug;

use super::types::CoordEvent;

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Broadcast bus for coordinator events
///
/// Cloning shares the underlying channel, so several coordinators can emit
/// onto one bus.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoordEvent>,
}

impl EventBus {
    /// Create a new event bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Create a new event bus with default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers
    ///
    /// Fire-and-forget: with no subscribers the event is dropped, and slow
    /// subscribers lag rather than block the emitter.
    pub fn emit(&self, event: CoordEvent) {
        debug!(
            event_type = event.event_type(),
            coordinator = event.coordinator(),
            "EventBus::emit"
        );
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<CoordEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}
