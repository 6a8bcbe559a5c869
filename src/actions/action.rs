//! # Actions: one command dispatched to one node.
//!
//! An [`ActionCommand`] is created by a service instance, handed to a
//! [`Node`](crate::nodes::Node) together with an [`OutcomeSink`](super::OutcomeSink),
//! and finishes with exactly one [`ActionOutcome`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Process-wide counter for action ids.
static ACTION_SEQ: AtomicU64 = AtomicU64::new(1);

/// Unique id of one dispatched action.
///
/// Used to tell a current outcome from a late one for the same instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(u64);

impl ActionId {
    /// Allocates the next id.
    pub fn next() -> Self {
        Self(ACTION_SEQ.fetch_add(1, AtomicOrdering::Relaxed))
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What an action does for its instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Launch the service command.
    Start,
    /// Health check ("is the process alive").
    Monitor,
    /// Terminate the service process.
    Kill,
}

impl ActionKind {
    /// Suffix used in action names (`<instance id>.<suffix>`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Start => "start",
            ActionKind::Monitor => "monitor",
            ActionKind::Kill => "kill",
        }
    }
}

/// A rendered command bound for a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionCommand {
    pub id: ActionId,
    /// `<instance id>.<kind>`, e.g. `web.0.monitor`.
    pub name: String,
    pub kind: ActionKind,
    /// Shell command line.
    pub command: String,
}

impl ActionCommand {
    pub fn new(instance_id: &str, kind: ActionKind, command: impl Into<String>) -> Self {
        Self {
            id: ActionId::next(),
            name: format!("{instance_id}.{}", kind.as_str()),
            kind,
            command: command.into(),
        }
    }
}

/// Terminal signal of an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The command ran to completion.
    Complete { exit_status: i32 },
    /// The command could not be launched at all (e.g. unreachable node).
    FailStart { reason: String },
}

impl ActionOutcome {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, ActionOutcome::Complete { exit_status: 0 })
    }
}
