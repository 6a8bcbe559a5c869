//! # Execution node abstraction.
//!
//! A [`Node`] is an opaque execution target. The core only needs a stable
//! name (for pool lookup and snapshots) and a way to submit an action whose
//! outcome is reported through an [`OutcomeSink`].
//!
//! How commands actually reach a remote host is up to the implementation;
//! [`LocalNode`] runs them as local shell processes.

use std::fmt;
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;

use crate::actions::{ActionCommand, OutcomeSink};

/// Execution target for actions.
///
/// # Contract
/// - `run` must not block; it submits the action and returns.
/// - Exactly one of `sink.complete(..)` / `sink.fail_start(..)` should eventually be called.
/// - `fail_start` is for "could not even launch" (unreachable host, spawn failure).
pub trait Node: Send + Sync + fmt::Debug + 'static {
    /// Stable node name, unique within a pool.
    fn name(&self) -> &str;

    /// Submits `action` for execution.
    fn run(&self, action: ActionCommand, sink: OutcomeSink);
}

/// Shared handle to a node.
pub type NodeRef = Arc<dyn Node>;

/// Runs actions as `sh -c <command>` on the local host.
#[derive(Debug, Clone)]
pub struct LocalNode {
    name: String,
}

impl LocalNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Convenience constructor returning a [`NodeRef`].
    pub fn arc(name: impl Into<String>) -> NodeRef {
        Arc::new(Self::new(name))
    }
}

impl Node for LocalNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, action: ActionCommand, sink: OutcomeSink) {
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            sink.fail_start("no async runtime available");
            return;
        };

        let child = Command::new("sh")
            .arg("-c")
            .arg(&action.command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false)
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                sink.fail_start(format!("spawn failed: {e}"));
                return;
            }
        };

        rt.spawn(async move {
            match child.wait().await {
                // Killed by a signal: no exit code, report as failure.
                Ok(status) => sink.complete(status.code().unwrap_or(-1)),
                Err(e) => sink.fail_start(format!("wait failed: {e}")),
            }
        });
    }
}
