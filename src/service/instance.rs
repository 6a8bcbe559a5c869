//! # ServiceInstance: one copy of a service on one node.
//!
//! Owns a health state machine and drives its recurring monitor cycle.
//!
//! ## Transition table
//! ```text
//! state      │ start    stop     monitor     mark_up  mark_down  monitor_fail
//! ───────────┼─────────────────────────────────────────────────────────────
//! down       │ starting
//! starting   │                               up       down
//! up         │          killing  monitoring
//! monitoring │          killing              up       down       unknown
//! killing    │                                        down
//! unknown    │                   monitoring
//! ```
//!
//! ## Monitor cycle
//! ```text
//! up ──(timer: monitor_interval)──► monitor ──► monitoring ──► dispatch "cat <pid_file> | xargs kill -0"
//!                                                                  │
//!      COMPLETE(0)  ──► mark_up      ──► up      ──► re-arm ◄──────┤
//!      COMPLETE(≠0) ──► mark_down    ──► down    (no re-arm)       │
//!      FAILSTART    ──► monitor_fail ──► unknown ──► re-arm ◄──────┤
//!      timeout      ──► monitor_fail ──► unknown ──► re-arm ◄──────┘ (only if configured)
//! ```
//!
//! ## Rules
//! - At most one monitor action in flight; a second cycle request while one is
//!   outstanding is logged as a defect and ignored.
//! - Outcomes are matched by [`ActionId`]; anything else is stale and dropped.
//! - `stop()` forgets the in-flight monitor action, so its late outcome is stale.
//! - No automatic restart: a `down` instance stays down until `start()` is called again.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::actions::{ActionCommand, ActionId, ActionKind, ActionOutcome, InstanceKey, OutcomeSink, Wakeup};
use crate::context::CommandContext;
use crate::error::{ListenerError, ServiceError};
use crate::events::{Event, EventKind};
use crate::machine::{Label, State, StateMachine, Trigger};
use crate::nodes::NodeRef;
use crate::persistence::InstanceData;

use super::env::Env;

/// Health-check command; `%(pid_file)s` comes from the instance context.
pub const MONITOR_COMMAND: &str = "cat %(pid_file)s | xargs kill -0";

/// Kill command; `%(pid_file)s` comes from the instance context.
pub const KILL_COMMAND: &str = "cat %(pid_file)s | xargs kill";

/// Health lifecycle of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Down,
    Starting,
    Up,
    Monitoring,
    Killing,
    Unknown,
}

/// Events accepted by [`InstanceState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceEvent {
    Start,
    Stop,
    Monitor,
    MarkUp,
    MarkDown,
    MonitorFail,
}

impl Label for InstanceState {
    fn label(&self) -> &'static str {
        match self {
            InstanceState::Down => "down",
            InstanceState::Starting => "starting",
            InstanceState::Up => "up",
            InstanceState::Monitoring => "monitoring",
            InstanceState::Killing => "killing",
            InstanceState::Unknown => "unknown",
        }
    }
}

impl Label for InstanceEvent {
    fn label(&self) -> &'static str {
        match self {
            InstanceEvent::Start => "start",
            InstanceEvent::Stop => "stop",
            InstanceEvent::Monitor => "monitor",
            InstanceEvent::MarkUp => "mark_up",
            InstanceEvent::MarkDown => "mark_down",
            InstanceEvent::MonitorFail => "monitor_fail",
        }
    }
}

impl State for InstanceState {
    type Event = InstanceEvent;

    fn on(&self, event: InstanceEvent) -> Option<InstanceState> {
        use InstanceEvent as E;
        use InstanceState as S;
        match (self, event) {
            (S::Down, E::Start) => Some(S::Starting),
            (S::Starting, E::MarkUp) => Some(S::Up),
            (S::Starting, E::MarkDown) => Some(S::Down),
            (S::Up, E::Stop) => Some(S::Killing),
            (S::Up, E::Monitor) => Some(S::Monitoring),
            (S::Monitoring, E::Stop) => Some(S::Killing),
            (S::Monitoring, E::MarkUp) => Some(S::Up),
            (S::Monitoring, E::MarkDown) => Some(S::Down),
            (S::Monitoring, E::MonitorFail) => Some(S::Unknown),
            (S::Killing, E::MarkDown) => Some(S::Down),
            (S::Unknown, E::Monitor) => Some(S::Monitoring),
            _ => None,
        }
    }
}

/// Construction parameters, filled in by the owning [`Service`](super::Service).
pub(crate) struct InstanceParams {
    pub key: InstanceKey,
    pub node: NodeRef,
    pub service_context: Arc<CommandContext>,
    pub command: String,
    pub pid_file: String,
    pub monitor_interval: Duration,
    pub env: Env,
}

/// One running (or transitioning) copy of a service.
pub struct ServiceInstance {
    key: InstanceKey,
    id: Arc<str>,
    node: NodeRef,
    machine: StateMachine<InstanceState>,
    context: CommandContext,
    command: String,
    monitor_interval: Duration,
    env: Env,

    monitor_action: Option<ActionId>,
    start_action: Option<ActionId>,
    kill_action: Option<ActionId>,
    kill_attempts: u32,
    monitor_armed: bool,
    stop_requested: bool,
    last_check: Option<SystemTime>,
}

impl ServiceInstance {
    pub(crate) fn new(params: InstanceParams) -> Result<Self, ServiceError> {
        let InstanceParams {
            key,
            node,
            service_context,
            command,
            pid_file,
            monitor_interval,
            env,
        } = params;

        let id: Arc<str> = Arc::from(key.to_string());
        let mut context = CommandContext::from_pairs(
            [
                ("id", id.to_string()),
                ("instance_number", key.number.to_string()),
                ("node", node.name().to_string()),
            ],
            Some(service_context),
        );
        let pid_file = context.render(&pid_file)?;
        context.set("pid_file", pid_file);

        let mut machine = StateMachine::new(Arc::clone(&id), InstanceState::Down);
        let bus = env.bus.clone();
        let service = Arc::clone(&key.service);
        let instance = Arc::clone(&id);
        machine.listen(Trigger::Any, move |t| {
            bus.publish(
                Event::new(EventKind::InstanceTransition)
                    .with_service(Arc::clone(&service))
                    .with_instance(Arc::clone(&instance))
                    .with_states(t.from.label(), t.to.label())
                    .with_reason(t.event.label()),
            );
            Ok(())
        });

        Ok(Self {
            key,
            id,
            node,
            machine,
            context,
            command,
            monitor_interval,
            env,
            monitor_action: None,
            start_action: None,
            kill_action: None,
            kill_attempts: 0,
            monitor_armed: false,
            stop_requested: false,
            last_check: None,
        })
    }

    /// `<service name>.<instance number>`.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn number(&self) -> u64 {
        self.key.number
    }

    #[inline]
    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    #[inline]
    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    #[inline]
    pub fn state(&self) -> InstanceState {
        self.machine.state()
    }

    /// Rendered PID-file path.
    pub fn pid_file(&self) -> &str {
        self.context.get("pid_file").unwrap_or_default()
    }

    #[inline]
    pub fn monitor_interval(&self) -> Duration {
        self.monitor_interval
    }

    /// Id of the outstanding monitor action, if any.
    #[inline]
    pub fn monitor_in_flight(&self) -> Option<ActionId> {
        self.monitor_action
    }

    /// Time of the last completed health check.
    #[inline]
    pub fn last_check(&self) -> Option<SystemTime> {
        self.last_check
    }

    /// True if `event` is defined for the current state.
    #[inline]
    pub fn accepts(&self, event: InstanceEvent) -> bool {
        self.machine.accepts(event)
    }

    #[inline]
    pub fn context(&self) -> &CommandContext {
        &self.context
    }

    /// Registers a state listener (see [`StateMachine::listen`]).
    pub fn listen<F>(&mut self, trigger: Trigger<InstanceState>, listener: F)
    where
        F: FnMut(&crate::machine::Transition<InstanceState>) -> Result<(), ListenerError>
            + Send
            + 'static,
    {
        self.machine.listen(trigger, listener);
    }

    /// Fires `start` and dispatches the service command.
    ///
    /// The start action's COMPLETE(0) drives `mark_up` (and arms monitoring);
    /// anything else drives `mark_down`.
    pub fn start(&mut self) -> Result<(), ServiceError> {
        let command = self.rendered_command()?;
        self.machine.transition(InstanceEvent::Start)?;
        self.stop_requested = false;
        self.start_action = Some(self.dispatch(ActionKind::Start, command));
        Ok(())
    }

    /// The service command rendered against this instance's context.
    pub(crate) fn rendered_command(&self) -> Result<String, ServiceError> {
        Ok(self.context.render(&self.command)?)
    }

    /// Fires `stop` and dispatches the kill action.
    ///
    /// An in-flight monitor action is forgotten: its outcome will be dropped as stale.
    pub fn stop(&mut self) -> Result<(), ServiceError> {
        self.machine.transition(InstanceEvent::Stop)?;
        self.monitor_action = None;
        self.kill_attempts = 0;
        self.dispatch_kill();
        Ok(())
    }

    /// Fires `mark_up` directly, bypassing any pending start action.
    pub fn mark_up(&mut self) -> Result<(), ServiceError> {
        self.machine.transition(InstanceEvent::MarkUp)?;
        self.start_action = None;
        self.queue_monitor();
        Ok(())
    }

    /// Fires `mark_down` directly, bypassing any pending start/kill action.
    pub fn mark_down(&mut self) -> Result<(), ServiceError> {
        self.machine.transition(InstanceEvent::MarkDown)?;
        self.start_action = None;
        self.kill_action = None;
        self.monitor_action = None;
        Ok(())
    }

    /// Handles the outcome of a dispatched action.
    pub(crate) fn on_outcome(
        &mut self,
        action: ActionId,
        outcome: ActionOutcome,
    ) -> Result<(), ServiceError> {
        if self.monitor_action == Some(action) {
            self.publish_outcome(ActionKind::Monitor, &outcome);
            return self.monitor_complete(outcome);
        }
        if self.start_action == Some(action) {
            self.publish_outcome(ActionKind::Start, &outcome);
            self.start_action = None;
            return if outcome.is_success() {
                self.machine.transition(InstanceEvent::MarkUp)?;
                self.queue_monitor();
                Ok(())
            } else {
                self.machine.transition(InstanceEvent::MarkDown)?;
                Ok(())
            };
        }
        if self.kill_action == Some(action) {
            self.publish_outcome(ActionKind::Kill, &outcome);
            self.kill_action = None;
            return match outcome {
                ActionOutcome::Complete { .. } => {
                    self.kill_attempts = 0;
                    self.machine.transition(InstanceEvent::MarkDown)?;
                    Ok(())
                }
                ActionOutcome::FailStart { .. } => {
                    let delay = self.env.monitor.kill_backoff.next(self.kill_attempts);
                    self.kill_attempts = self.kill_attempts.saturating_add(1);
                    self.schedule(delay, Wakeup::KillRetry, "kill_retry");
                    Ok(())
                }
            };
        }

        tracing::debug!(instance = %self.id, %action, ?outcome, "dropping stale action outcome");
        self.env.bus.publish(
            Event::new(EventKind::StaleOutcome)
                .with_service(Arc::clone(&self.key.service))
                .with_instance(Arc::clone(&self.id))
                .with_reason(format!("action {action} is not in flight")),
        );
        Ok(())
    }

    /// Handles a timer scheduled by this instance.
    pub(crate) fn on_wakeup(&mut self, wakeup: Wakeup) -> Result<(), ServiceError> {
        match wakeup {
            Wakeup::Monitor => {
                self.monitor_armed = false;
                self.run_monitor()
            }
            Wakeup::MonitorTimeout(action) => {
                if self.monitor_action != Some(action) {
                    return Ok(());
                }
                self.monitor_action = None;
                tracing::warn!(instance = %self.id, %action, "monitor action timed out");
                let mut ev = Event::new(EventKind::MonitorTimeout)
                    .with_service(Arc::clone(&self.key.service))
                    .with_instance(Arc::clone(&self.id))
                    .with_action(format!("{}.monitor", self.id));
                if let Some(t) = self.env.monitor.timeout {
                    ev = ev.with_timeout(t);
                }
                self.env.bus.publish(ev);
                self.machine.transition(InstanceEvent::MonitorFail)?;
                self.queue_monitor();
                Ok(())
            }
            Wakeup::KillRetry => {
                if self.state() == InstanceState::Killing && self.kill_action.is_none() {
                    self.dispatch_kill();
                }
                Ok(())
            }
        }
    }

    /// Starts one monitor cycle.
    fn run_monitor(&mut self) -> Result<(), ServiceError> {
        if let Some(outstanding) = self.monitor_action {
            tracing::warn!(
                instance = %self.id,
                action = %outstanding,
                "monitor action already in flight; skipping cycle"
            );
            self.env.bus.publish(
                Event::new(EventKind::MonitorOverlap)
                    .with_service(Arc::clone(&self.key.service))
                    .with_instance(Arc::clone(&self.id))
                    .with_reason(format!("outstanding {outstanding}")),
            );
            return Ok(());
        }
        if !self.machine.accepts(InstanceEvent::Monitor) {
            tracing::debug!(
                instance = %self.id,
                state = self.state().label(),
                "monitor cycle ended"
            );
            return Ok(());
        }

        self.machine.transition(InstanceEvent::Monitor)?;
        let command = match self.context.render(MONITOR_COMMAND) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(instance = %self.id, error = %e, "cannot render monitor command");
                self.machine.transition(InstanceEvent::MonitorFail)?;
                self.queue_monitor();
                return Ok(());
            }
        };

        let action = self.dispatch(ActionKind::Monitor, command);
        self.monitor_action = Some(action);
        if let Some(timeout) = self.env.monitor.timeout {
            self.schedule(timeout, Wakeup::MonitorTimeout(action), "monitor_timeout");
        }
        Ok(())
    }

    fn monitor_complete(&mut self, outcome: ActionOutcome) -> Result<(), ServiceError> {
        self.monitor_action = None;
        match outcome {
            ActionOutcome::Complete { exit_status: 0 } => {
                self.last_check = Some(SystemTime::now());
                self.machine.transition(InstanceEvent::MarkUp)?;
                self.queue_monitor();
            }
            ActionOutcome::Complete { .. } => {
                self.last_check = Some(SystemTime::now());
                self.machine.transition(InstanceEvent::MarkDown)?;
            }
            ActionOutcome::FailStart { .. } => {
                self.machine.transition(InstanceEvent::MonitorFail)?;
                self.queue_monitor();
            }
        }
        Ok(())
    }

    /// Arms the next monitor cycle after the (jittered) monitor interval.
    ///
    /// At most one cycle timer is pending at a time.
    fn queue_monitor(&mut self) {
        self.monitor_action = None;
        if self.monitor_armed {
            return;
        }
        self.monitor_armed = true;
        let delay = self.env.monitor.jitter.apply(self.monitor_interval);
        self.schedule(delay, Wakeup::Monitor, "monitor");
    }

    fn schedule(&self, delay: Duration, wakeup: Wakeup, purpose: &'static str) {
        self.env.bus.publish(
            Event::new(EventKind::Scheduled)
                .with_service(Arc::clone(&self.key.service))
                .with_instance(Arc::clone(&self.id))
                .with_delay(delay)
                .with_reason(purpose),
        );
        self.env
            .scheduler
            .call_later(delay, self.key.clone(), wakeup);
    }

    fn dispatch_kill(&mut self) {
        match self.context.render(KILL_COMMAND) {
            Ok(command) => self.kill_action = Some(self.dispatch(ActionKind::Kill, command)),
            // The pid_file key is always set at construction; only a broken template gets here.
            Err(e) => tracing::error!(instance = %self.id, error = %e, "cannot render kill command"),
        }
    }

    fn dispatch(&self, kind: ActionKind, command: String) -> ActionId {
        let action = ActionCommand::new(&self.id, kind, command);
        let id = action.id;
        self.env.bus.publish(
            Event::new(EventKind::ActionDispatched)
                .with_service(Arc::clone(&self.key.service))
                .with_instance(Arc::clone(&self.id))
                .with_action(action.name.as_str())
                .with_node(self.node.name()),
        );
        let sink = OutcomeSink::new(self.key.clone(), id, self.env.outcomes.clone());
        self.node.run(action, sink);
        id
    }

    fn publish_outcome(&self, kind: ActionKind, outcome: &ActionOutcome) {
        let ev = match outcome {
            ActionOutcome::Complete { exit_status } => {
                Event::new(EventKind::ActionCompleted).with_exit_status(*exit_status)
            }
            ActionOutcome::FailStart { reason } => {
                tracing::info!(instance = %self.id, action = kind.as_str(), %reason, "action failed to start");
                Event::new(EventKind::ActionFailStart).with_reason(reason.as_str())
            }
        };
        self.env.bus.publish(
            ev.with_service(Arc::clone(&self.key.service))
                .with_instance(Arc::clone(&self.id))
                .with_action(format!("{}.{}", self.id, kind.as_str())),
        );
    }

    // ---- Service-side helpers ----

    /// Marks the instance for stopping as soon as it accepts `stop`.
    pub(crate) fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    #[inline]
    pub(crate) fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Re-links the instance context to a new service context and interval.
    pub(crate) fn adopt(&mut self, service_context: Arc<CommandContext>, monitor_interval: Duration) {
        let mut context = CommandContext::new(Default::default(), Some(service_context));
        for key in ["id", "instance_number", "node", "pid_file"] {
            if let Some(v) = self.context.get(key) {
                context.set(key, v);
            }
        }
        self.context = context;
        self.monitor_interval = monitor_interval;
    }

    /// Snapshot for persistence.
    pub fn data(&self) -> InstanceData {
        InstanceData {
            number: self.key.number,
            node: self.node.name().to_string(),
            state: self.state(),
            pid_file: self.pid_file().to_string(),
        }
    }

    /// Rehydrates from a snapshot.
    ///
    /// Transient states (`starting`, `monitoring`, `killing`) come back as
    /// `unknown`: whatever was in flight belonged to the previous process.
    /// Every non-`down` instance resumes monitoring.
    pub(crate) fn restore(&mut self, data: &InstanceData) {
        let state = match data.state {
            InstanceState::Down => InstanceState::Down,
            InstanceState::Up => InstanceState::Up,
            _ => InstanceState::Unknown,
        };
        self.machine.restore(state);
        if !data.pid_file.is_empty() {
            self.context.set("pid_file", data.pid_file.clone());
        }
        if state != InstanceState::Down {
            self.queue_monitor();
        }
    }
}

impl std::fmt::Debug for ServiceInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceInstance")
            .field("id", &self.id)
            .field("node", &self.node.name())
            .field("state", &self.state())
            .field("monitor_action", &self.monitor_action)
            .finish()
    }
}
