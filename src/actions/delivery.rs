//! # Delivery of asynchronous results back to the event loop.
//!
//! Nodes and timers never call into a service directly. They push a
//! [`Delivery`] onto the supervisor's channel and the event loop routes it to
//! the owning service by [`InstanceKey`], one message at a time.
//!
//! ```text
//! Node::run(action, sink) ── sink.complete(0) ──┐
//! Scheduler::call_later(..) ── sleep ───────────┼──► mpsc<Delivery> ──► Supervisor loop
//!                                               │                         └─► Service::deliver()
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::action::{ActionId, ActionOutcome};

/// Non-owning reference to an instance: service name plus instance number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    pub service: Arc<str>,
    pub number: u64,
}

impl InstanceKey {
    pub fn new(service: impl Into<Arc<str>>, number: u64) -> Self {
        Self {
            service: service.into(),
            number,
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service, self.number)
    }
}

/// Timer purposes an instance can schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// Run the next monitor cycle.
    Monitor,
    /// The monitor action with this id has been in flight for too long.
    MonitorTimeout(ActionId),
    /// Re-dispatch a kill action that failed to start.
    KillRetry,
}

/// Message for the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Action {
        target: InstanceKey,
        action: ActionId,
        outcome: ActionOutcome,
    },
    Timer {
        target: InstanceKey,
        wakeup: Wakeup,
    },
}

impl Delivery {
    pub fn target(&self) -> &InstanceKey {
        match self {
            Delivery::Action { target, .. } | Delivery::Timer { target, .. } => target,
        }
    }
}

/// Single-use completion signal for one action.
///
/// Consuming methods guarantee at most one outcome per action. A sink dropped
/// without an outcome means the node lost the action; the instance keeps
/// waiting (bounded only by the monitor timeout, when configured).
#[derive(Debug)]
pub struct OutcomeSink {
    target: InstanceKey,
    action: ActionId,
    tx: mpsc::UnboundedSender<Delivery>,
}

impl OutcomeSink {
    pub fn new(target: InstanceKey, action: ActionId, tx: mpsc::UnboundedSender<Delivery>) -> Self {
        Self { target, action, tx }
    }

    #[inline]
    pub fn action(&self) -> ActionId {
        self.action
    }

    #[inline]
    pub fn target(&self) -> &InstanceKey {
        &self.target
    }

    /// Signals COMPLETE with the command's exit status.
    pub fn complete(self, exit_status: i32) {
        self.send(ActionOutcome::Complete { exit_status });
    }

    /// Signals FAILSTART: the command could not be launched.
    pub fn fail_start(self, reason: impl Into<String>) {
        self.send(ActionOutcome::FailStart {
            reason: reason.into(),
        });
    }

    fn send(self, outcome: ActionOutcome) {
        // A closed channel means the event loop is gone; nobody is left to care.
        let _ = self.tx.send(Delivery::Action {
            target: self.target,
            action: self.action,
            outcome,
        });
    }
}
