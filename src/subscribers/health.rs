//! # Latest known state of every instance.
//!
//! [`HealthTracker`] listens to `InstanceTransition` events and keeps the most
//! recent state per instance id, using event sequence numbers to ignore
//! out-of-order delivery.
//!
//! ```text
//! Bus ──► SubscriberSet ──► HealthTracker::on_event()
//!                                  │
//!                                  ▼
//!                     HashMap<instance id, {last_seq, state}>
//! ```
//!
//! ## Rules
//! - Only `InstanceTransition` changes the recorded state.
//! - Events with `seq <= last_seq` for the same instance are rejected (stale).
//! - Reads are eventually consistent with the event loop.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::events::{Event, EventKind};

use super::Subscribe;

#[derive(Debug, Clone, Copy)]
struct Seen {
    last_seq: u64,
    state: &'static str,
}

/// Thread-safe view of instance states built from events.
#[derive(Debug, Default)]
pub struct HealthTracker {
    state: RwLock<HashMap<String, Seen>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an event; returns true if it changed a recorded state.
    pub async fn update(&self, ev: &Event) -> bool {
        if ev.kind != EventKind::InstanceTransition {
            return false;
        }
        let (Some(id), Some(to)) = (ev.instance.as_deref(), ev.to) else {
            return false;
        };

        let mut state = self.state.write().await;
        let entry = state.entry(id.to_string()).or_insert(Seen {
            last_seq: 0,
            state: "down",
        });
        if ev.seq <= entry.last_seq {
            return false;
        }
        entry.last_seq = ev.seq;
        entry.state = to;
        true
    }

    /// Last recorded state of `instance`.
    pub async fn state_of(&self, instance: &str) -> Option<&'static str> {
        self.state.read().await.get(instance).map(|s| s.state)
    }

    /// Sorted ids of instances whose last recorded state is not `down`.
    pub async fn snapshot(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut alive: Vec<String> = state
            .iter()
            .filter(|(_, s)| s.state != "down")
            .map(|(id, _)| id.clone())
            .collect();
        alive.sort_unstable();
        alive
    }
}

#[async_trait]
impl Subscribe for HealthTracker {
    async fn on_event(&self, event: &Event) {
        self.update(event).await;
    }

    fn name(&self) -> &'static str {
        "health"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moved(id: &str, from: &'static str, to: &'static str) -> Event {
        Event::new(EventKind::InstanceTransition)
            .with_instance(id)
            .with_states(from, to)
    }

    #[tokio::test]
    async fn tracks_latest_state_and_rejects_stale() {
        let t = HealthTracker::new();
        let starting = moved("web.0", "down", "starting");
        let up = moved("web.0", "starting", "up");
        let other = moved("web.1", "down", "starting");

        assert!(t.update(&up).await);
        assert!(!t.update(&starting).await, "older seq must be ignored");
        assert!(t.update(&other).await);
        assert!(!t.update(&Event::new(EventKind::ServiceAdded)).await);

        assert_eq!(t.state_of("web.0").await, Some("up"));
        assert_eq!(t.snapshot().await, vec!["web.0", "web.1"]);

        t.update(&moved("web.1", "starting", "down")).await;
        assert_eq!(t.snapshot().await, vec!["web.0"]);
    }
}
