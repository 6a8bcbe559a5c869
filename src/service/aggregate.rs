//! # Service: desired-state aggregate over its instances.
//!
//! ## Transition table
//! ```text
//! state    │ start     stop      mark_all_up  mark_down  mark_all_down
//! ─────────┼─────────────────────────────────────────────────────────
//! down     │ starting
//! starting │                     up
//! up       │           stopping               degraded
//! degraded │           stopping  up
//! stopping │                                             down
//! ```
//!
//! ## Aggregation
//! Every instance reports entering `up`/`down` through a notice channel. The
//! service drains those notices right after each operation it performs and
//! recomputes its aggregate state (edge-triggered, never polled):
//!
//! ```text
//! child entered up   ─► all instances up?   ─► mark_all_up
//! child entered down ─► all instances down? ─► mark_all_down (when stopping)
//!                       otherwise           ─► mark_down
//! ```
//! Aggregate events the current state does not define are skipped (logged at
//! `debug`), e.g. `mark_down` while still `starting`.
//!
//! `mark_all_down` is only defined from `stopping`. Every instance failing
//! on its own leaves the service `degraded`, not `down`: it went down without
//! being asked to, and `start_instance` brings it back.
//!
//! ## Retiring instances
//! Instances removed by `stop()` or by reconciliation leave `instances` right
//! away and wait in a retiring list until they reach `down`. An instance that
//! cannot be stopped yet (`starting`, `unknown`) is stopped as soon as it
//! enters `up`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::actions::{Delivery, InstanceKey};
use crate::context::CommandContext;
use crate::error::{ListenerError, ServiceError};
use crate::events::{Event, EventKind};
use crate::machine::{Label, State, StateMachine, Transition, Trigger};
use crate::nodes::{NodePool, NodeRef};
use crate::persistence::ServiceData;

use super::config::ServiceConfig;
use super::env::Env;
use super::instance::{InstanceEvent, InstanceParams, InstanceState, ServiceInstance};

/// Aggregate lifecycle of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Down,
    Starting,
    Up,
    Degraded,
    Stopping,
}

/// Events accepted by [`ServiceState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceEvent {
    Start,
    Stop,
    MarkAllUp,
    MarkDown,
    MarkAllDown,
}

impl Label for ServiceState {
    fn label(&self) -> &'static str {
        match self {
            ServiceState::Down => "down",
            ServiceState::Starting => "starting",
            ServiceState::Up => "up",
            ServiceState::Degraded => "degraded",
            ServiceState::Stopping => "stopping",
        }
    }
}

impl Label for ServiceEvent {
    fn label(&self) -> &'static str {
        match self {
            ServiceEvent::Start => "start",
            ServiceEvent::Stop => "stop",
            ServiceEvent::MarkAllUp => "mark_all_up",
            ServiceEvent::MarkDown => "mark_down",
            ServiceEvent::MarkAllDown => "mark_all_down",
        }
    }
}

impl State for ServiceState {
    type Event = ServiceEvent;

    fn on(&self, event: ServiceEvent) -> Option<ServiceState> {
        use ServiceEvent as E;
        use ServiceState as S;
        match (self, event) {
            (S::Down, E::Start) => Some(S::Starting),
            (S::Starting, E::MarkAllUp) => Some(S::Up),
            (S::Up, E::Stop) => Some(S::Stopping),
            (S::Up, E::MarkDown) => Some(S::Degraded),
            (S::Degraded, E::Stop) => Some(S::Stopping),
            (S::Degraded, E::MarkAllUp) => Some(S::Up),
            (S::Stopping, E::MarkAllDown) => Some(S::Down),
            _ => None,
        }
    }
}

/// An instance entered `up` or `down`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChildNotice {
    pub number: u64,
    pub entered: InstanceState,
}

/// A named service and the instances that run it.
pub struct Service {
    pub(super) config: ServiceConfig,
    pub(super) name: Arc<str>,
    pub(super) pool: Arc<NodePool>,
    pub(super) context: Arc<CommandContext>,
    pub(super) monitor_interval: Duration,
    pub(super) machine: StateMachine<ServiceState>,
    pub(super) instances: Vec<ServiceInstance>,
    pub(super) retiring: Vec<ServiceInstance>,
    pub(super) last_instance: Option<u64>,
    pub(super) notices_tx: mpsc::UnboundedSender<ChildNotice>,
    pub(super) notices_rx: mpsc::UnboundedReceiver<ChildNotice>,
    pub(super) env: Env,
}

impl Service {
    /// Creates a `down` service with no instances.
    pub fn new(config: ServiceConfig, pool: Arc<NodePool>, env: Env) -> Result<Self, ServiceError> {
        config.validate()?;

        let name: Arc<str> = Arc::from(config.name.as_str());
        let mut vars = config.context.clone();
        vars.insert("name".into(), config.name.clone());
        vars.insert("count".into(), config.count.to_string());
        let context = Arc::new(CommandContext::new(vars, Some(Arc::clone(&env.context))));
        let monitor_interval = config.monitor_interval.unwrap_or(env.monitor.interval);

        let mut machine = StateMachine::new(Arc::clone(&name), ServiceState::Down);
        let bus = env.bus.clone();
        let service = Arc::clone(&name);
        machine.listen(Trigger::Any, move |t| {
            bus.publish(
                Event::new(EventKind::ServiceTransition)
                    .with_service(Arc::clone(&service))
                    .with_states(t.from.label(), t.to.label())
                    .with_reason(t.event.label()),
            );
            Ok(())
        });

        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            name,
            pool,
            context,
            monitor_interval,
            machine,
            instances: Vec::new(),
            retiring: Vec::new(),
            last_instance: None,
            notices_tx,
            notices_rx,
            env,
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    #[inline]
    pub fn state(&self) -> ServiceState {
        self.machine.state()
    }

    #[inline]
    pub fn pool(&self) -> &Arc<NodePool> {
        &self.pool
    }

    /// Live instances in creation order.
    #[inline]
    pub fn instances(&self) -> &[ServiceInstance] {
        &self.instances
    }

    /// Instances removed from the service that have not reached `down` yet.
    #[inline]
    pub fn retiring(&self) -> &[ServiceInstance] {
        &self.retiring
    }

    pub fn instance(&self, number: u64) -> Option<&ServiceInstance> {
        self.instances
            .iter()
            .chain(self.retiring.iter())
            .find(|i| i.number() == number)
    }

    /// Number the next built instance will get.
    #[inline]
    pub fn next_instance_number(&self) -> u64 {
        self.last_instance.map_or(0, |n| n + 1)
    }

    #[inline]
    pub fn monitor_interval(&self) -> Duration {
        self.monitor_interval
    }

    /// True when no instance (live or retiring) is left.
    pub fn is_drained(&self) -> bool {
        self.instances.is_empty() && self.retiring.is_empty()
    }

    /// Ids of every instance not yet `down`.
    pub fn active_ids(&self) -> Vec<String> {
        self.instances
            .iter()
            .chain(self.retiring.iter())
            .filter(|i| i.state() != InstanceState::Down)
            .map(|i| i.id().to_string())
            .collect()
    }

    /// Registers a listener on the aggregate machine.
    pub fn listen<F>(&mut self, trigger: Trigger<ServiceState>, listener: F)
    where
        F: FnMut(&Transition<ServiceState>) -> Result<(), ListenerError> + Send + 'static,
    {
        self.machine.listen(trigger, listener);
    }

    /// Fires `start`, then builds and starts `count` fresh instances.
    ///
    /// Fails without leaving `down` when the pool is empty or the command or
    /// pid file does not render.
    pub fn start(&mut self) -> Result<(), ServiceError> {
        if !self.instances.is_empty() {
            return Err(ServiceError::AlreadyRunning {
                service: self.config.name.clone(),
                instances: self.instances.iter().map(|i| i.id().to_string()).collect(),
            });
        }
        self.preflight()?;
        self.machine.transition(ServiceEvent::Start)?;
        tracing::info!(service = %self.name, count = self.config.count, "starting service");

        for _ in 0..self.config.count {
            self.build_instance()?.start()?;
        }
        if self.instances.is_empty() {
            self.fire(ServiceEvent::MarkAllUp)?;
        }
        self.process_notices()
    }

    /// Fires `stop`, then stops every instance, newest first.
    pub fn stop(&mut self) -> Result<(), ServiceError> {
        self.machine.transition(ServiceEvent::Stop)?;
        tracing::info!(service = %self.name, "stopping service");
        self.halt()
    }

    /// Stops every instance without touching the aggregate machine.
    ///
    /// Used on shutdown for services whose state does not accept `stop`.
    pub fn halt(&mut self) -> Result<(), ServiceError> {
        while let Some(inst) = self.instances.pop() {
            self.retire(inst)?;
        }
        self.process_notices()?;
        self.settle()
    }

    /// Re-fires `start` on a `down` instance. The core never restarts on its own.
    pub fn start_instance(&mut self, number: u64) -> Result<(), ServiceError> {
        let inst = self.live_mut(number)?;
        inst.start()?;
        self.process_notices()
    }

    /// Drives `mark_up` on an instance (bypasses its start action).
    pub fn mark_instance_up(&mut self, number: u64) -> Result<(), ServiceError> {
        self.find_mut(number)?.mark_up()?;
        self.process_notices()
    }

    /// Drives `mark_down` on an instance (bypasses its start/kill action).
    pub fn mark_instance_down(&mut self, number: u64) -> Result<(), ServiceError> {
        self.find_mut(number)?.mark_down()?;
        self.process_notices()
    }

    /// Routes an action outcome or timer to its instance.
    ///
    /// Deliveries for instances that no longer exist are dropped.
    pub fn deliver(&mut self, delivery: Delivery) -> Result<(), ServiceError> {
        let number = delivery.target().number;
        let Ok(inst) = self.find_mut(number) else {
            tracing::debug!(service = %self.name, number, ?delivery, "delivery for unknown instance dropped");
            self.env.bus.publish(
                Event::new(EventKind::StaleOutcome)
                    .with_service(Arc::clone(&self.name))
                    .with_instance(delivery.target().to_string())
                    .with_reason("instance is gone"),
            );
            return Ok(());
        };

        let res = match delivery {
            Delivery::Action { action, outcome, .. } => inst.on_outcome(action, outcome),
            Delivery::Timer { wakeup, .. } => inst.on_wakeup(wakeup),
        };
        let settled = self.process_notices();
        res.and(settled)
    }

    /// Snapshot for persistence (live instances only).
    pub fn data(&self) -> ServiceData {
        ServiceData {
            name: self.config.name.clone(),
            state: self.state(),
            last_instance: self.last_instance,
            instances: self.instances.iter().map(ServiceInstance::data).collect(),
        }
    }

    /// Rehydrates a freshly built service from a snapshot.
    ///
    /// Nodes are looked up by name in the current pool. A `stopping`
    /// snapshot restores as `down` since its retiring instances are not kept.
    pub fn restore(&mut self, data: &ServiceData) -> Result<(), ServiceError> {
        if !self.instances.is_empty() {
            return Err(ServiceError::AlreadyRunning {
                service: self.config.name.clone(),
                instances: self.instances.iter().map(|i| i.id().to_string()).collect(),
            });
        }

        let mut restored = Vec::with_capacity(data.instances.len());
        for d in &data.instances {
            let node = self.pool.lookup(&d.node)?;
            let mut inst = self.make_instance(d.number, node)?;
            inst.restore(d);
            restored.push(inst);
        }

        let state = match data.state {
            ServiceState::Stopping => ServiceState::Down,
            s => s,
        };
        self.machine.restore(state);
        self.last_instance = data
            .instances
            .iter()
            .map(|i| i.number)
            .chain(data.last_instance)
            .max();
        self.instances = restored;
        tracing::info!(
            service = %self.name,
            state = state.label(),
            instances = self.instances.len(),
            "service restored"
        );
        Ok(())
    }

    // ---- Instance management ----

    /// Checks that new instances can be built and started: a node is
    /// available and the command and pid file render for the next number.
    /// Nothing is consumed; the pool cursor does not move.
    pub(crate) fn preflight(&self) -> Result<(), ServiceError> {
        if self.config.count == 0 {
            return Ok(());
        }
        let node = self.pool.peek()?;
        let inst = self.make_instance(self.next_instance_number(), node)?;
        inst.rendered_command().map(drop)
    }

    /// Takes a node from the pool, assigns the next instance number and
    /// registers a new `down` instance.
    pub(crate) fn build_instance(&mut self) -> Result<&mut ServiceInstance, ServiceError> {
        let node = self.pool.next()?;
        let number = self.next_instance_number();
        self.last_instance = Some(number);
        let inst = self.make_instance(number, node)?;
        let idx = self.instances.len();
        self.instances.push(inst);
        Ok(&mut self.instances[idx])
    }

    fn make_instance(&self, number: u64, node: NodeRef) -> Result<ServiceInstance, ServiceError> {
        let mut inst = ServiceInstance::new(InstanceParams {
            key: InstanceKey::new(Arc::clone(&self.name), number),
            node,
            service_context: Arc::clone(&self.context),
            command: self.config.command.clone(),
            pid_file: self.config.pid_file.clone(),
            monitor_interval: self.monitor_interval,
            env: self.env.clone(),
        })?;
        for state in [InstanceState::Up, InstanceState::Down] {
            let tx = self.notices_tx.clone();
            inst.listen(Trigger::Enter(state), move |_| {
                // Receiver lives in the owning service; a closed channel means it is gone.
                let _ = tx.send(ChildNotice {
                    number,
                    entered: state,
                });
                Ok(())
            });
        }
        Ok(inst)
    }

    /// Moves an instance out of the live set and stops it (now or once it is `up`).
    pub(super) fn retire(&mut self, mut inst: ServiceInstance) -> Result<(), ServiceError> {
        if inst.state() == InstanceState::Down {
            tracing::debug!(instance = inst.id(), "retired instance already down");
            return Ok(());
        }
        if inst.accepts(InstanceEvent::Stop) {
            let res = inst.stop();
            self.retiring.push(inst);
            return res;
        }
        tracing::debug!(
            instance = inst.id(),
            state = inst.state().label(),
            "instance cannot stop yet; stopping once up"
        );
        inst.request_stop();
        self.retiring.push(inst);
        Ok(())
    }

    fn find_mut(&mut self, number: u64) -> Result<&mut ServiceInstance, ServiceError> {
        let service = &self.config.name;
        self.instances
            .iter_mut()
            .chain(self.retiring.iter_mut())
            .find(|i| i.number() == number)
            .ok_or_else(|| ServiceError::UnknownInstance {
                service: service.clone(),
                number,
            })
    }

    fn live_mut(&mut self, number: u64) -> Result<&mut ServiceInstance, ServiceError> {
        let service = &self.config.name;
        self.instances
            .iter_mut()
            .find(|i| i.number() == number)
            .ok_or_else(|| ServiceError::UnknownInstance {
                service: service.clone(),
                number,
            })
    }

    // ---- Aggregation ----

    pub(super) fn process_notices(&mut self) -> Result<(), ServiceError> {
        while let Ok(notice) = self.notices_rx.try_recv() {
            match notice.entered {
                InstanceState::Up => self.child_up(notice.number)?,
                InstanceState::Down => self.child_down(notice.number)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn child_up(&mut self, number: u64) -> Result<(), ServiceError> {
        if let Some(inst) = self.retiring.iter_mut().find(|i| i.number() == number) {
            if inst.stop_requested() && inst.accepts(InstanceEvent::Stop) {
                inst.stop()?;
            }
            return Ok(());
        }
        if !self.instances.is_empty()
            && self.instances.iter().all(|i| i.state() == InstanceState::Up)
        {
            self.fire(ServiceEvent::MarkAllUp)?;
        }
        Ok(())
    }

    fn child_down(&mut self, number: u64) -> Result<(), ServiceError> {
        if let Some(pos) = self.retiring.iter().position(|i| i.number() == number) {
            if self.retiring[pos].state() == InstanceState::Down {
                let inst = self.retiring.remove(pos);
                tracing::debug!(instance = inst.id(), "retired instance is down");
            }
            return self.settle();
        }
        if !self.instances.iter().any(|i| i.number() == number) {
            return Ok(());
        }
        let all_down = self
            .instances
            .iter()
            .all(|i| i.state() == InstanceState::Down);
        if all_down && self.machine.accepts(ServiceEvent::MarkAllDown) {
            self.fire(ServiceEvent::MarkAllDown)
        } else {
            self.fire(ServiceEvent::MarkDown)
        }
    }

    /// Completes `stopping` once nothing is left to drain.
    pub(super) fn settle(&mut self) -> Result<(), ServiceError> {
        if self.state() == ServiceState::Stopping && self.is_drained() {
            self.fire(ServiceEvent::MarkAllDown)?;
        }
        Ok(())
    }

    fn fire(&mut self, event: ServiceEvent) -> Result<(), ServiceError> {
        if !self.machine.accepts(event) {
            tracing::debug!(
                service = %self.name,
                state = self.state().label(),
                event = event.label(),
                "aggregate event not applicable"
            );
            return Ok(());
        }
        self.machine.transition(event)?;
        Ok(())
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("pool", &self.pool.name())
            .field("instances", &self.instances)
            .field("retiring", &self.retiring.len())
            .field("last_instance", &self.last_instance)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionKind, Wakeup};
    use crate::testing::TestEnv;

    fn web(env: &TestEnv, count: usize) -> Service {
        let pool = env.pool("pool", &["A", "B", "C"]);
        let cfg = ServiceConfig::new("web", "run-web", "pool").with_count(count);
        Service::new(cfg, pool, env.env.clone()).unwrap()
    }

    fn states(svc: &Service) -> Vec<InstanceState> {
        svc.instances().iter().map(ServiceInstance::state).collect()
    }

    #[test]
    fn table_matches_lifecycle() {
        use ServiceEvent as E;
        use ServiceState as S;
        assert_eq!(S::Down.on(E::Start), Some(S::Starting));
        assert_eq!(S::Up.on(E::MarkDown), Some(S::Degraded));
        assert_eq!(S::Degraded.on(E::MarkAllUp), Some(S::Up));
        assert_eq!(S::Stopping.on(E::MarkAllDown), Some(S::Down));
        assert_eq!(S::Starting.on(E::Stop), None);
        assert_eq!(S::Up.on(E::MarkAllDown), None);
    }

    #[test]
    fn start_builds_count_instances_with_consecutive_numbers() {
        let env = TestEnv::new();
        for n in 0..5 {
            let mut svc = web(&env, n);
            svc.start().unwrap();
            let numbers: Vec<u64> = svc.instances().iter().map(|i| i.number()).collect();
            assert_eq!(numbers, (0..n as u64).collect::<Vec<_>>());
            assert_eq!(svc.next_instance_number(), n as u64);
        }
    }

    #[test]
    fn start_twice_is_already_running() {
        let env = TestEnv::new();
        let mut svc = web(&env, 2);
        svc.start().unwrap();
        let err = svc.start().unwrap_err();
        assert_eq!(err.as_label(), "service_already_running");
        assert_eq!(svc.instances().len(), 2);
    }

    #[test]
    fn failed_start_stays_down_and_can_retry() {
        let env = TestEnv::new();
        let pool = env.pool("pool", &["A", "B"]);
        let cfg = ServiceConfig::new("web", "run %(typo)s", "pool").with_count(2);
        let mut svc = Service::new(cfg, pool, env.env.clone()).unwrap();

        let err = svc.start().unwrap_err();
        assert_eq!(err.as_label(), "render_failed");
        assert_eq!(svc.state(), ServiceState::Down);
        assert!(svc.instances().is_empty());
        assert_eq!(svc.next_instance_number(), 0);
        assert_eq!(env.recorder.pending_len(), 0);

        // Still down: retrying reports the same error, not already-running.
        let err = svc.start().unwrap_err();
        assert_eq!(err.as_label(), "render_failed");
    }

    #[test]
    fn bad_pid_file_or_empty_pool_fails_before_starting() {
        let env = TestEnv::new();
        let pool = env.pool("pool", &["A"]);
        let cfg = ServiceConfig::new("web", "run-web", "pool").with_pid_file("/run/%(nope)s.pid");
        let mut svc = Service::new(cfg, pool, env.env.clone()).unwrap();
        assert_eq!(svc.start().unwrap_err().as_label(), "render_failed");
        assert_eq!(svc.state(), ServiceState::Down);

        let empty = env.pool("empty", &[]);
        let cfg = ServiceConfig::new("web", "run-web", "empty");
        let mut svc = Service::new(cfg, empty, env.env.clone()).unwrap();
        assert_eq!(svc.start().unwrap_err().as_label(), "node_pool_empty");
        assert_eq!(svc.state(), ServiceState::Down);
        assert!(svc.instances().is_empty());
    }

    #[test]
    fn every_instance_failing_stays_degraded() {
        let mut env = TestEnv::new();
        let mut svc = web(&env, 2);
        svc.start().unwrap();
        env.recorder.complete_all(ActionKind::Start, 0);
        env.pump(&mut svc);
        assert_eq!(svc.state(), ServiceState::Up);

        env.tick(&mut svc, Duration::from_secs(5));
        assert_eq!(env.recorder.complete_all(ActionKind::Monitor, 1), 2);
        env.pump(&mut svc);

        // mark_all_down only applies while stopping.
        assert_eq!(states(&svc), [InstanceState::Down, InstanceState::Down]);
        assert_eq!(svc.state(), ServiceState::Degraded);

        svc.start_instance(0).unwrap();
        svc.start_instance(1).unwrap();
        env.recorder.complete_all(ActionKind::Start, 0);
        env.pump(&mut svc);
        assert_eq!(svc.state(), ServiceState::Up);
    }

    #[test]
    fn single_instance_scenario() {
        let env = TestEnv::new();
        let mut svc = web(&env, 1);
        svc.start().unwrap();

        assert_eq!(svc.state(), ServiceState::Starting);
        assert_eq!(svc.instances()[0].id(), "web.0");
        assert_eq!(svc.instances()[0].state(), InstanceState::Starting);
        assert_eq!(svc.instances()[0].node().name(), "A");

        svc.mark_instance_up(0).unwrap();
        assert_eq!(svc.instances()[0].state(), InstanceState::Up);
        assert_eq!(svc.state(), ServiceState::Up);
    }

    #[test]
    fn aggregate_follows_instances() {
        let mut env = TestEnv::new();
        let mut svc = web(&env, 2);
        svc.start().unwrap();
        assert_eq!(env.recorder.complete_all(ActionKind::Start, 0), 2);
        env.pump(&mut svc);
        assert_eq!(states(&svc), [InstanceState::Up, InstanceState::Up]);
        assert_eq!(svc.state(), ServiceState::Up);

        // One health check fails: {up, down} is degraded.
        env.tick(&mut svc, Duration::from_secs(5));
        env.recorder
            .take_for("web.0", ActionKind::Monitor)
            .unwrap()
            .1
            .complete(0);
        env.recorder
            .take_for("web.1", ActionKind::Monitor)
            .unwrap()
            .1
            .complete(1);
        env.pump(&mut svc);
        assert_eq!(states(&svc), [InstanceState::Up, InstanceState::Down]);
        assert_eq!(svc.state(), ServiceState::Degraded);

        // Operator restarts web.1: back to {up, up}.
        svc.start_instance(1).unwrap();
        env.recorder.complete_all(ActionKind::Start, 0);
        env.pump(&mut svc);
        assert_eq!(svc.state(), ServiceState::Up);

        // Stop drains to {down, down}: service down.
        svc.stop().unwrap();
        assert_eq!(svc.state(), ServiceState::Stopping);
        assert!(svc.instances().is_empty());
        assert_eq!(svc.retiring().len(), 2);
        assert_eq!(env.recorder.complete_all(ActionKind::Kill, 0), 2);
        env.pump(&mut svc);
        assert!(svc.is_drained());
        assert_eq!(svc.state(), ServiceState::Down);
    }

    #[test]
    fn stop_kills_newest_first() {
        let mut env = TestEnv::new();
        let mut svc = web(&env, 3);
        svc.start().unwrap();
        env.recorder.complete_all(ActionKind::Start, 0);
        env.pump(&mut svc);

        svc.stop().unwrap();
        let kills: Vec<String> = env
            .recorder
            .history()
            .into_iter()
            .map(|(_, name)| name)
            .filter(|n| n.ends_with(".kill"))
            .collect();
        assert_eq!(kills, ["web.2.kill", "web.1.kill", "web.0.kill"]);
    }

    #[test]
    fn halt_waits_for_starting_instance() {
        let mut env = TestEnv::new();
        let mut svc = web(&env, 2);
        svc.start().unwrap();
        env.recorder
            .take_for("web.0", ActionKind::Start)
            .unwrap()
            .1
            .complete(0);
        env.pump(&mut svc);
        assert_eq!(svc.state(), ServiceState::Starting);

        // `stop` is not defined while starting; halt drains instances anyway.
        assert!(svc.stop().is_err());
        svc.halt().unwrap();
        assert_eq!(svc.retiring().len(), 2);
        assert_eq!(svc.instance(0).unwrap().state(), InstanceState::Killing);
        assert_eq!(svc.instance(1).unwrap().state(), InstanceState::Starting);

        // web.1 finishes starting: it is stopped right away.
        env.recorder
            .take_for("web.1", ActionKind::Start)
            .unwrap()
            .1
            .complete(0);
        env.pump(&mut svc);
        assert_eq!(svc.instance(1).unwrap().state(), InstanceState::Killing);

        assert_eq!(env.recorder.complete_all(ActionKind::Kill, 0), 2);
        env.pump(&mut svc);
        assert!(svc.is_drained());
        assert_eq!(svc.state(), ServiceState::Starting);
    }

    #[test]
    fn delivery_for_unknown_instance_is_dropped() {
        let env = TestEnv::new();
        let mut svc = web(&env, 1);
        svc.start().unwrap();
        let mut rx = env.bus.subscribe();

        svc.deliver(Delivery::Timer {
            target: InstanceKey::new("web", 42),
            wakeup: Wakeup::Monitor,
        })
        .unwrap();

        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.kind, EventKind::StaleOutcome);
        assert_eq!(ev.instance.as_deref(), Some("web.42"));
    }

    #[test]
    fn unknown_instance_operations_fail() {
        let env = TestEnv::new();
        let mut svc = web(&env, 1);
        assert_eq!(
            svc.mark_instance_up(7).unwrap_err().as_label(),
            "unknown_instance"
        );
    }

    #[test]
    fn empty_pool_is_reported() {
        let env = TestEnv::new();
        let pool = env.pool("empty", &[]);
        let cfg = ServiceConfig::new("web", "run-web", "empty");
        let mut svc = Service::new(cfg, pool, env.env.clone()).unwrap();
        assert_eq!(svc.start().unwrap_err().as_label(), "node_pool_empty");
    }

    #[test]
    fn restore_rehydrates_numbering_and_monitoring() {
        let mut env = TestEnv::new();
        let mut svc = web(&env, 2);
        svc.start().unwrap();
        env.recorder.complete_all(ActionKind::Start, 0);
        env.pump(&mut svc);
        env.tick(&mut svc, Duration::from_secs(5));
        let snapshot = svc.data();
        assert_eq!(snapshot.state, ServiceState::Up);
        assert_eq!(snapshot.instances[0].state, InstanceState::Monitoring);

        let fresh = TestEnv::new();
        let mut restored = web(&fresh, 2);
        restored.restore(&snapshot).unwrap();
        assert_eq!(restored.state(), ServiceState::Up);
        assert_eq!(restored.next_instance_number(), 2);
        assert_eq!(
            states(&restored),
            [InstanceState::Unknown, InstanceState::Unknown]
        );
        assert_eq!(restored.instances()[1].node().name(), "B");
        assert_eq!(fresh.scheduler.pending_len(), 2);
    }

    #[test]
    fn restore_with_missing_node_fails() {
        let env = TestEnv::new();
        let mut svc = web(&env, 1);
        let mut data = svc.data();
        data.instances.push(crate::persistence::InstanceData {
            number: 0,
            node: "Z".into(),
            state: InstanceState::Up,
            pid_file: String::new(),
        });
        assert_eq!(svc.restore(&data).unwrap_err().as_label(), "node_not_found");
    }
}
