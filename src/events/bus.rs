//! # Event bus for broadcasting runtime events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`]. Publishing is
//! synchronous and non-blocking, so state-machine listeners can publish from
//! inside a transition without an async context.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                         Consumer (one):
//!   instance machines ──┐
//!   service machines  ──┼──► Bus ──► Supervisor::subscriber_listener ──► SubscriberSet
//!   Supervisor loop   ──┘
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks.
//! - **Bounded capacity**: one ring buffer shared by all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: events are lost if there are no receivers at send time.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus; capacity is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active receivers (dropped if there are none).
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver that observes events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn receivers_see_events_published_after_subscribe() {
        let bus = Bus::new(0);
        bus.publish(Event::new(EventKind::ShutdownRequested));

        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::AllStoppedWithin));

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::AllStoppedWithin);
    }
}
