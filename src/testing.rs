//! # Deterministic collaborators for tests.
//!
//! - [`ManualScheduler`]: virtual clock; timers fire only on [`ManualScheduler::advance`].
//! - [`RecordingNode`] + [`ActionLog`]: nodes that record actions and hold their
//!   sinks until a test resolves them.
//! - [`TestEnv`]: an [`Env`] wired to both, plus the delivery receiver.
//!
//! Enabled for unit tests and behind the `testing` feature.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::actions::{ActionCommand, ActionKind, Delivery, InstanceKey, OutcomeSink, Wakeup};
use crate::core::Config;
use crate::events::Bus;
use crate::nodes::{Node, NodePool, NodeRef};
use crate::scheduler::Scheduler;
use crate::service::{Env, Service};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct Clock {
    now: Duration,
    seq: u64,
    pending: Vec<(Duration, u64, InstanceKey, Wakeup)>,
}

/// Scheduler with a virtual clock.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    clock: Mutex<Clock>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward and returns every timer that became due, in due order.
    pub fn advance(&self, by: Duration) -> Vec<Delivery> {
        let mut clock = lock(&self.clock);
        clock.now += by;
        let now = clock.now;

        let (mut due, rest): (Vec<_>, Vec<_>) =
            clock.pending.drain(..).partition(|(at, ..)| *at <= now);
        clock.pending = rest;
        due.sort_by_key(|(at, seq, ..)| (*at, *seq));
        due.into_iter()
            .map(|(_, _, target, wakeup)| Delivery::Timer { target, wakeup })
            .collect()
    }

    /// Virtual time elapsed since creation.
    pub fn now(&self) -> Duration {
        lock(&self.clock).now
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.clock).pending.len()
    }

    /// Remaining delay of every pending timer for `target`.
    pub fn pending_for(&self, target: &InstanceKey) -> Vec<(Duration, Wakeup)> {
        let clock = lock(&self.clock);
        clock
            .pending
            .iter()
            .filter(|(_, _, t, _)| t == target)
            .map(|(at, _, _, w)| (at.saturating_sub(clock.now), *w))
            .collect()
    }
}

impl Scheduler for ManualScheduler {
    fn call_later(&self, delay: Duration, target: InstanceKey, wakeup: Wakeup) {
        let mut clock = lock(&self.clock);
        let at = clock.now + delay;
        clock.seq += 1;
        let seq = clock.seq;
        clock.pending.push((at, seq, target, wakeup));
    }
}

/// One action seen by a [`RecordingNode`].
#[derive(Debug)]
pub struct Recorded {
    pub node: String,
    pub command: ActionCommand,
    sink: Option<OutcomeSink>,
}

/// Shared log of actions submitted to recording nodes.
#[derive(Debug, Clone, Default)]
pub struct ActionLog {
    entries: Arc<Mutex<Vec<Recorded>>>,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the oldest unresolved action of `kind`.
    pub fn take(&self, kind: ActionKind) -> Option<(ActionCommand, OutcomeSink)> {
        self.take_where(|c| c.kind == kind)
    }

    /// Takes the oldest unresolved action named `<instance>.<kind>`.
    pub fn take_for(&self, instance: &str, kind: ActionKind) -> Option<(ActionCommand, OutcomeSink)> {
        let name = format!("{instance}.{}", kind.as_str());
        self.take_where(|c| c.name == name)
    }

    /// Completes every unresolved action of `kind` with `exit_status`; returns how many.
    pub fn complete_all(&self, kind: ActionKind, exit_status: i32) -> usize {
        let mut n = 0;
        while let Some((_, sink)) = self.take(kind) {
            sink.complete(exit_status);
            n += 1;
        }
        n
    }

    /// Number of actions still waiting for an outcome.
    pub fn pending_len(&self) -> usize {
        lock(&self.entries).iter().filter(|r| r.sink.is_some()).count()
    }

    /// `(node, action name)` of everything ever submitted, in order.
    pub fn history(&self) -> Vec<(String, String)> {
        lock(&self.entries)
            .iter()
            .map(|r| (r.node.clone(), r.command.name.clone()))
            .collect()
    }

    fn take_where(
        &self,
        pred: impl Fn(&ActionCommand) -> bool,
    ) -> Option<(ActionCommand, OutcomeSink)> {
        let mut entries = lock(&self.entries);
        let entry = entries
            .iter_mut()
            .find(|r| r.sink.is_some() && pred(&r.command))?;
        let sink = entry.sink.take()?;
        Some((entry.command.clone(), sink))
    }

    fn push(&self, node: &str, command: ActionCommand, sink: OutcomeSink) {
        lock(&self.entries).push(Recorded {
            node: node.to_string(),
            command,
            sink: Some(sink),
        });
    }
}

/// Node that records actions instead of running them.
#[derive(Debug, Clone)]
pub struct RecordingNode {
    name: String,
    log: ActionLog,
}

impl RecordingNode {
    pub fn new(name: impl Into<String>, log: ActionLog) -> Self {
        Self {
            name: name.into(),
            log,
        }
    }

    pub fn arc(name: impl Into<String>, log: &ActionLog) -> NodeRef {
        Arc::new(Self::new(name, log.clone()))
    }
}

impl Node for RecordingNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, action: ActionCommand, sink: OutcomeSink) {
        self.log.push(&self.name, action, sink);
    }
}

/// Wired test environment.
pub struct TestEnv {
    pub env: Env,
    pub scheduler: Arc<ManualScheduler>,
    pub recorder: ActionLog,
    /// A recording node named `node0`.
    pub node: NodeRef,
    pub bus: Bus,
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl TestEnv {
    /// Default config with a 5s monitor interval.
    pub fn new() -> Self {
        Self::with_config(Config {
            monitor_interval: Duration::from_secs(5),
            ..Config::default()
        })
    }

    pub fn with_monitor_timeout(timeout: Duration) -> Self {
        Self::with_config(Config {
            monitor_interval: Duration::from_secs(5),
            monitor_timeout: timeout,
            ..Config::default()
        })
    }

    pub fn with_config(cfg: Config) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(ManualScheduler::new());
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let env = Env::new(&cfg, scheduler.clone(), tx, bus.clone());
        let recorder = ActionLog::new();
        let node = RecordingNode::arc("node0", &recorder);
        Self {
            env,
            scheduler,
            recorder,
            node,
            bus,
            rx,
        }
    }

    /// A pool of recording nodes sharing this environment's log.
    pub fn pool(&self, name: &str, nodes: &[&str]) -> Arc<NodePool> {
        let nodes = nodes
            .iter()
            .map(|n| RecordingNode::arc(*n, &self.recorder))
            .collect();
        Arc::new(NodePool::new(name, nodes))
    }

    /// Everything currently queued on the delivery channel.
    pub fn drain(&mut self) -> Vec<Delivery> {
        let mut out = Vec::new();
        while let Ok(d) = self.rx.try_recv() {
            out.push(d);
        }
        out
    }

    /// Routes queued deliveries into `service` until the channel is empty.
    pub fn pump(&mut self, service: &mut Service) {
        loop {
            let batch = self.drain();
            if batch.is_empty() {
                return;
            }
            for d in batch {
                if let Err(e) = service.deliver(d) {
                    tracing::warn!(error = %e, "test delivery failed");
                }
            }
        }
    }

    /// Advances virtual time and routes the due timers (and resulting outcomes) into `service`.
    pub fn tick(&mut self, service: &mut Service, by: Duration) {
        for d in self.scheduler.advance(by) {
            if let Err(e) = service.deliver(d) {
                tracing::warn!(error = %e, "test timer delivery failed");
            }
        }
        self.pump(service);
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
