//! # SubscriberSet: non-blocking fan-out to subscribers.
//!
//! ```text
//! emit(event)
//!     ├──► [queue 1] ──► worker 1 ──► subscriber1.on_event()
//!     │    (bounded)         └──────► panic → SubscriberPanicked
//!     └──► [queue N] ──► worker N ──► subscriberN.on_event()
//! ```
//!
//! ## Rules
//! - `emit()` returns immediately (`try_send`).
//! - Per-subscriber FIFO; no ordering across subscribers.
//! - Overflow drops the event for that subscriber only and publishes `SubscriberOverflow`.
//! - A panicking handler is reported as `SubscriberPanicked`; its worker keeps going.

use std::sync::Arc;

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::events::{Bus, Event, EventKind};

use super::Subscribe;

struct SubscriberChannel {
    name: &'static str,
    sender: mpsc::Sender<Arc<Event>>,
}

/// Fan-out coordinator with one queue and one worker per subscriber.
pub struct SubscriberSet {
    channels: Vec<SubscriberChannel>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Spawns one worker per subscriber. Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let mut channels = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let name = sub.name();
            let (tx, mut rx) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
            let worker_bus = bus.clone();

            let handle = tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    let fut = sub.on_event(ev.as_ref());
                    if let Err(panic_err) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                        let any = &*panic_err;
                        let info = if let Some(msg) = any.downcast_ref::<&'static str>() {
                            (*msg).to_string()
                        } else if let Some(msg) = any.downcast_ref::<String>() {
                            msg.clone()
                        } else {
                            "unknown panic".to_string()
                        };
                        tracing::error!(subscriber = sub.name(), %info, "subscriber panicked");
                        worker_bus.publish(Event::subscriber_panicked(sub.name(), info));
                    }
                }
            });
            channels.push(SubscriberChannel { name, sender: tx });
            workers.push(handle);
        }
        Self {
            channels,
            workers,
            bus,
        }
    }

    /// Emits an event to every subscriber.
    pub fn emit(&self, event: &Event) {
        self.emit_arc(Arc::new(event.clone()));
    }

    /// Emits a shared event to every subscriber.
    ///
    /// Overflow events are never re-published when they themselves overflow.
    pub fn emit_arc(&self, event: Arc<Event>) {
        let is_overflow_evt = matches!(event.kind, EventKind::SubscriberOverflow);

        for channel in &self.channels {
            let reason = match channel.sender.try_send(Arc::clone(&event)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "full",
                Err(mpsc::error::TrySendError::Closed(_)) => "closed",
            };
            tracing::warn!(subscriber = channel.name, reason, "subscriber dropped event");
            if !is_overflow_evt {
                self.bus
                    .publish(Event::subscriber_overflow(channel.name, reason));
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Closes every queue and waits for the workers to drain.
    pub async fn shutdown(self) {
        drop(self.channels);
        for h in self.workers {
            let _ = h.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<u64>>);

    #[async_trait]
    impl Subscribe for Collect {
        async fn on_event(&self, ev: &Event) {
            self.0.lock().unwrap().push(ev.seq);
        }
        fn name(&self) -> &'static str {
            "collect"
        }
    }

    struct Boom;

    #[async_trait]
    impl Subscribe for Boom {
        async fn on_event(&self, _ev: &Event) {
            panic!("boom");
        }
        fn name(&self) -> &'static str {
            "boom"
        }
    }

    #[tokio::test]
    async fn delivers_in_order_and_isolates_panics() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let collect = Arc::new(Collect::default());
        let set = SubscriberSet::new(vec![collect.clone(), Arc::new(Boom)], bus.clone());
        assert_eq!(set.len(), 2);

        let a = Event::new(EventKind::ServiceAdded);
        let b = Event::new(EventKind::ServiceRemoved);
        set.emit(&a);
        set.emit(&b);
        set.shutdown().await;

        assert_eq!(*collect.0.lock().unwrap(), vec![a.seq, b.seq]);
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::SubscriberPanicked);
        assert_eq!(ev.reason.as_deref(), Some("subscriber=boom info=boom"));
    }
}
