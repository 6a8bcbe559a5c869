//! # Delayed callbacks for instances.
//!
//! The core never sleeps. An instance asks the injected [`Scheduler`] to
//! deliver a [`Wakeup`] after a delay; the wakeup comes back to the event loop
//! as a [`Delivery::Timer`] and is routed like any other message.
//!
//! - [`TokioScheduler`] sleeps on the tokio timer wheel (honors paused test time).
//! - `testing::ManualScheduler` keeps a virtual clock for deterministic tests.
//!
//! Fire-and-forget: there is no cancellation API. A timer that outlives its
//! purpose is recognized as stale when it is delivered.

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::actions::{Delivery, InstanceKey, Wakeup};

/// `call_later` collaborator.
pub trait Scheduler: Send + Sync + fmt::Debug + 'static {
    /// Delivers `wakeup` for `target` after `delay`.
    fn call_later(&self, delay: Duration, target: InstanceKey, wakeup: Wakeup);
}

/// Timer-backed scheduler feeding the supervisor's delivery channel.
///
/// Pending sleeps end early (without delivering) once `token` is cancelled.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<Delivery>,
    token: CancellationToken,
}

impl TokioScheduler {
    pub fn new(tx: mpsc::UnboundedSender<Delivery>, token: CancellationToken) -> Self {
        Self { tx, token }
    }
}

impl Scheduler for TokioScheduler {
    fn call_later(&self, delay: Duration, target: InstanceKey, wakeup: Wakeup) {
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(%target, ?wakeup, "no async runtime; timer dropped");
            return;
        };
        let tx = self.tx.clone();
        let token = self.token.clone();
        rt.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(Delivery::Timer { target, wakeup });
                }
                _ = token.cancelled() => {}
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn delivers_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sched = TokioScheduler::new(tx, CancellationToken::new());
        sched.call_later(Duration::from_secs(5), InstanceKey::new("web", 0), Wakeup::Monitor);

        let got = rx.recv().await.unwrap();
        assert_eq!(
            got,
            Delivery::Timer {
                target: InstanceKey::new("web", 0),
                wakeup: Wakeup::Monitor
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_token_drops_pending_timers() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let sched = TokioScheduler::new(tx, token.clone());
        sched.call_later(Duration::from_secs(5), InstanceKey::new("web", 0), Wakeup::Monitor);
        token.cancel();
        drop(sched);

        assert!(rx.recv().await.is_none());
    }
}
