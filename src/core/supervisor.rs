//! # Supervisor: the single event loop that owns every service.
//!
//! The [`Supervisor`] owns the event bus, the subscriber set, the node pools
//! and every [`Service`]. All state changes happen inside [`Supervisor::run`],
//! one message at a time, so services never need locks.
//!
//! ## Architecture
//! ```text
//! Inputs to run():
//!   SupervisorHandle ── Control ──────────┐
//!   Node::run(..)    ── OutcomeSink ──┐   │
//!   TokioScheduler   ── Timer ────────┼───┼──► select! ──► handle one message to completion
//!   OS signal ─────────────────────────────┘                 │
//!                                                            ├─► Service::deliver / apply / start / stop
//!                                                            └─► StateManager::save_service (optional)
//!
//! Event flow:
//!   state machines / loop ── publish(Event) ──► Bus ──► listener ──► SubscriberSet::emit
//!                                                                 ┌──────────┼──────────┐
//!                                                                 ▼          ▼          ▼
//!                                                          HealthTracker  LogWriter  custom
//!
//! Shutdown path:
//!   signal or Control::Shutdown
//!     └─► publish(ShutdownRequested)
//!     └─► stop (or halt) every service
//!     └─► keep routing deliveries until every instance is down, at most cfg.grace:
//!            ├─ drained          → publish(AllStoppedWithin)
//!            └─ grace exceeded   → publish(GraceExceeded), RuntimeError::GraceExceeded{stuck}
//!     └─► cancel pending timers, flush persisted state, drain subscribers
//! ```
//!
//! ## Error policy
//! Errors from handling a delivery never end the loop: they are logged and
//! published as `HandlerFailed`. Errors from a control request go back to the
//! caller through its reply channel.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::actions::Delivery;
use crate::core::handle::{Control, SupervisorHandle};
use crate::core::{shutdown, Config};
use crate::error::{RuntimeError, ServiceError};
use crate::events::{Bus, Event, EventKind};
use crate::nodes::NodePool;
use crate::persistence::{ServiceData, StateManager};
use crate::scheduler::TokioScheduler;
use crate::service::{Env, Service, ServiceConfig, ServiceState};
use crate::subscribers::{HealthTracker, Subscribe, SubscriberSet};

/// Owns services, pools and the runtime plumbing. Built by [`SupervisorBuilder`](super::SupervisorBuilder).
pub struct Supervisor {
    cfg: Config,
    bus: Bus,
    pools: HashMap<String, Arc<NodePool>>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    health: Arc<HealthTracker>,
    state: Option<StateManager>,
    initial: Vec<ServiceConfig>,
    control_tx: mpsc::UnboundedSender<Control>,
    control_rx: mpsc::UnboundedReceiver<Control>,
}

/// Mutable state of a running event loop.
struct Runtime {
    cfg: Config,
    bus: Bus,
    env: Env,
    pools: HashMap<String, Arc<NodePool>>,
    services: BTreeMap<String, Service>,
    /// Removed from the configuration, still stopping.
    draining: Vec<Service>,
    /// Snapshots loaded at startup, consumed when their service is first added.
    restored: HashMap<String, ServiceData>,
    state: Option<StateManager>,
}

impl Supervisor {
    pub(crate) fn new_internal(
        cfg: Config,
        pools: HashMap<String, Arc<NodePool>>,
        subscribers: Vec<Arc<dyn Subscribe>>,
        state: Option<StateManager>,
        initial: Vec<ServiceConfig>,
    ) -> Self {
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        Self {
            cfg,
            bus,
            pools,
            subscribers,
            health: Arc::new(HealthTracker::new()),
            state,
            initial,
            control_tx,
            control_rx,
        }
    }

    /// Shorthand for [`SupervisorBuilder::new`](super::SupervisorBuilder::new).
    pub fn builder(cfg: Config) -> super::SupervisorBuilder {
        super::SupervisorBuilder::new(cfg)
    }

    /// Control handle; stays valid for the lifetime of the event loop.
    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle::new(self.control_tx.clone())
    }

    /// Event bus shared by every service.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Instance states as seen through events.
    pub fn health(&self) -> Arc<HealthTracker> {
        Arc::clone(&self.health)
    }

    /// Runs the event loop until a shutdown signal or [`SupervisorHandle::shutdown`].
    ///
    /// Startup restores persisted state (if a state manager is configured) and
    /// applies the initial services. Returns `GraceExceeded` if instances are
    /// still alive `cfg.grace` after shutdown began.
    pub async fn run(self) -> Result<(), RuntimeError> {
        let Supervisor {
            cfg,
            bus,
            pools,
            mut subscribers,
            health,
            mut state,
            initial,
            control_tx,
            mut control_rx,
        } = self;
        // Only handles keep the control channel open.
        drop(control_tx);

        subscribers.push(health);
        let subs = Arc::new(SubscriberSet::new(subscribers, bus.clone()));
        let listener_token = CancellationToken::new();
        let listener = subscriber_listener(bus.subscribe(), Arc::clone(&subs), listener_token.clone());

        let timers = CancellationToken::new();
        let (delivery_tx, mut delivery_rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(TokioScheduler::new(delivery_tx.clone(), timers.clone()));
        let env = Env::new(&cfg, scheduler, delivery_tx, bus.clone());

        let restored = match state.as_mut() {
            Some(mgr) => {
                let names: Vec<&str> = initial.iter().map(|c| c.name.as_str()).collect();
                let restored = mgr.restore(names)?;
                mgr.save_metadata()?;
                restored
            }
            None => HashMap::new(),
        };

        let mut rt = Runtime {
            cfg,
            bus,
            env,
            pools,
            services: BTreeMap::new(),
            draining: Vec::new(),
            restored,
            state,
        };

        let outcome = match rt.apply(initial) {
            Ok(()) => rt.event_loop(&mut control_rx, &mut delivery_rx).await,
            Err(e) => Err(e),
        };

        timers.cancel();
        rt.flush_state();
        drop(rt);

        listener_token.cancel();
        let _ = listener.await;
        if let Ok(set) = Arc::try_unwrap(subs) {
            set.shutdown().await;
        }
        outcome
    }
}

/// Forwards bus events to the subscriber set until `token` is cancelled,
/// then emits whatever is still buffered.
fn subscriber_listener(
    mut rx: broadcast::Receiver<Event>,
    set: Arc<SubscriberSet>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                res = rx.recv() => match res {
                    Ok(ev) => set.emit(&ev),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "subscriber listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
                _ = token.cancelled() => break,
            }
        }
        loop {
            match rx.try_recv() {
                Ok(ev) => set.emit(&ev),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return,
            }
        }
    })
}

impl Runtime {
    async fn event_loop(
        &mut self,
        control_rx: &mut mpsc::UnboundedReceiver<Control>,
        delivery_rx: &mut mpsc::UnboundedReceiver<Delivery>,
    ) -> Result<(), RuntimeError> {
        let signal = shutdown::shutdown_signal();
        tokio::pin!(signal);
        let mut control_open = true;

        loop {
            tokio::select! {
                name = &mut signal => {
                    tracing::info!(signal = name, "shutdown signal received");
                    break;
                }
                ctrl = control_rx.recv(), if control_open => match ctrl {
                    Some(Control::Shutdown) => {
                        tracing::info!("shutdown requested");
                        break;
                    }
                    Some(ctrl) => self.control(ctrl),
                    None => control_open = false,
                },
                Some(delivery) = delivery_rx.recv() => self.route(delivery),
            }
        }

        self.shutdown(delivery_rx).await
    }

    fn control(&mut self, ctrl: Control) {
        match ctrl {
            Control::Apply { configs, reply } => {
                let res = self.apply(configs);
                let _ = reply.send(res);
            }
            Control::Start { service, reply } => {
                let res = self.with_service(&service, Service::start);
                let _ = reply.send(res);
            }
            Control::Stop { service, reply } => {
                let res = self.with_service(&service, Service::stop);
                let _ = reply.send(res);
            }
            Control::RestartInstance {
                service,
                number,
                reply,
            } => {
                let res = self.with_service(&service, |s| s.start_instance(number));
                let _ = reply.send(res);
            }
            Control::Snapshot { reply } => {
                let _ = reply.send(Ok(self.services.values().map(Service::data).collect()));
            }
            Control::Shutdown => {}
        }
    }

    fn with_service(
        &mut self,
        name: &str,
        op: impl FnOnce(&mut Service) -> Result<(), ServiceError>,
    ) -> Result<(), RuntimeError> {
        let svc = self
            .services
            .get_mut(name)
            .ok_or_else(|| RuntimeError::UnknownService {
                name: name.to_string(),
            })?;
        let res = op(svc);
        self.persist(name);
        Ok(res?)
    }

    /// Routes one delivery to its service; failures are logged, never returned.
    fn route(&mut self, delivery: Delivery) {
        let name = Arc::clone(&delivery.target().service);

        let res = if let Some(svc) = self.services.get_mut(&*name) {
            let res = svc.deliver(delivery);
            self.persist(&name);
            res
        } else if let Some(pos) = self.draining.iter().position(|s| s.name() == &*name) {
            let res = self.draining[pos].deliver(delivery);
            if self.draining[pos].is_drained() {
                let svc = self.draining.remove(pos);
                tracing::info!(service = svc.name(), "removed service drained");
            }
            res
        } else {
            tracing::debug!(service = %name, ?delivery, "delivery for unknown service dropped");
            Ok(())
        };

        if let Err(e) = res {
            tracing::warn!(service = %name, error = %e, label = e.as_label(), "delivery handling failed");
            self.bus.publish(
                Event::new(EventKind::HandlerFailed)
                    .with_service(name)
                    .with_reason(e.to_string()),
            );
        }
    }

    /// Reconciles the running services with `configs`.
    ///
    /// All configs are checked before anything changes; afterwards every
    /// service is handled even if one of them fails (the first error is returned).
    fn apply(&mut self, configs: Vec<ServiceConfig>) -> Result<(), RuntimeError> {
        let mut seen = HashSet::new();
        for cfg in &configs {
            cfg.validate()?;
            if !seen.insert(cfg.name.as_str()) {
                return Err(ServiceError::InvalidConfig {
                    service: cfg.name.clone(),
                    reason: "duplicate service name".into(),
                }
                .into());
            }
            if !self.pools.contains_key(&cfg.node_pool) {
                return Err(RuntimeError::UnknownPool {
                    name: cfg.node_pool.clone(),
                });
            }
            if self.draining.iter().any(|s| s.name() == cfg.name) {
                return Err(ServiceError::InvalidConfig {
                    service: cfg.name.clone(),
                    reason: "a removed service with this name is still stopping".into(),
                }
                .into());
            }
        }

        let mut first_err: Option<RuntimeError> = None;
        let mut keep = |res: Result<(), ServiceError>| {
            if let Err(e) = res {
                tracing::warn!(error = %e, "applying service configuration failed");
                first_err.get_or_insert(e.into());
            }
        };

        let mut previous = std::mem::take(&mut self.services);
        for cfg in configs {
            let name = cfg.name.clone();
            let prev = previous.remove(&name);

            // Pools are fixed after build, so an equal config means nothing to do.
            let prev = match prev {
                Some(prev) if prev.config() == &cfg => {
                    self.services.insert(name, prev);
                    continue;
                }
                other => other,
            };

            let Some(pool) = self.pools.get(&cfg.node_pool).map(Arc::clone) else {
                continue;
            };
            let mut svc = match Service::new(cfg, pool, self.env.clone()) {
                Ok(svc) => svc,
                Err(e) => {
                    keep(Err(e));
                    if let Some(prev) = prev {
                        self.services.insert(name, prev);
                    }
                    continue;
                }
            };

            match prev {
                Some(prev) => keep(svc.absorb_previous(prev)),
                None => {
                    self.bus.publish(Event::new(EventKind::ServiceAdded).with_service(name.as_str()));
                    keep(bring_up(&mut svc, self.restored.remove(&name)));
                }
            }
            self.services.insert(name, svc);
        }

        for (name, mut svc) in previous {
            tracing::info!(service = %name, "service removed from configuration");
            self.bus.publish(Event::new(EventKind::ServiceRemoved).with_service(name.as_str()));
            keep(stop_or_halt(&mut svc));
            if !svc.is_drained() {
                self.draining.push(svc);
            }
        }

        let names: Vec<String> = self.services.keys().cloned().collect();
        for name in names {
            self.persist(&name);
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Stops everything and keeps routing deliveries until drained or `grace` runs out.
    async fn shutdown(
        &mut self,
        delivery_rx: &mut mpsc::UnboundedReceiver<Delivery>,
    ) -> Result<(), RuntimeError> {
        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        let names: Vec<String> = self.services.keys().cloned().collect();
        for name in names {
            if let Some(svc) = self.services.get_mut(&name) {
                if let Err(e) = stop_or_halt(svc) {
                    tracing::warn!(service = %name, error = %e, "stopping service failed");
                }
            }
            self.persist(&name);
        }

        let grace = self.cfg.grace;
        let drained = async {
            while !self.all_drained() {
                match delivery_rx.recv().await {
                    Some(d) => self.route(d),
                    None => break,
                }
            }
        };

        match tokio::time::timeout(grace, drained).await {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                tracing::info!("all instances stopped within grace");
                Ok(())
            }
            Err(_) => {
                let stuck = self.stuck();
                self.bus.publish(
                    Event::new(EventKind::GraceExceeded).with_reason(stuck.join(",")),
                );
                tracing::warn!(?grace, ?stuck, "shutdown grace exceeded");
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }

    fn all_drained(&self) -> bool {
        self.draining.is_empty() && self.services.values().all(Service::is_drained)
    }

    fn stuck(&self) -> Vec<String> {
        let mut stuck: Vec<String> = self
            .services
            .values()
            .chain(self.draining.iter())
            .flat_map(Service::active_ids)
            .collect();
        stuck.sort_unstable();
        stuck
    }

    fn persist(&mut self, name: &str) {
        let (Some(mgr), Some(svc)) = (self.state.as_mut(), self.services.get(name)) else {
            return;
        };
        if let Err(e) = mgr.save_service(&svc.data()) {
            tracing::warn!(service = name, error = %e, "saving service state failed");
            self.bus.publish(
                Event::new(EventKind::HandlerFailed)
                    .with_service(name)
                    .with_reason(e.to_string()),
            );
        }
    }

    fn flush_state(&mut self) {
        let Some(mgr) = self.state.as_mut() else {
            return;
        };
        for svc in self.services.values() {
            if let Err(e) = mgr.save_service(&svc.data()) {
                tracing::warn!(service = svc.name(), error = %e, "saving service state failed");
            }
        }
        if let Err(e) = mgr.cleanup() {
            tracing::warn!(error = %e, "flushing state failed");
        }
    }
}

/// Starts a newly added service, or resumes it from a persisted snapshot.
fn bring_up(svc: &mut Service, restored: Option<ServiceData>) -> Result<(), ServiceError> {
    match restored {
        Some(data) if data.state != ServiceState::Down => svc.restore(&data),
        _ => svc.start(),
    }
}

/// `stop` when the aggregate machine allows it, otherwise just stop the instances.
fn stop_or_halt(svc: &mut Service) -> Result<(), ServiceError> {
    match svc.state() {
        ServiceState::Up | ServiceState::Degraded => svc.stop(),
        _ => svc.halt(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::actions::ActionKind;
    use crate::testing::{ActionLog, RecordingNode};

    fn pool(log: &ActionLog) -> NodePool {
        NodePool::new(
            "pool",
            vec![RecordingNode::arc("a", log), RecordingNode::arc("b", log)],
        )
    }

    fn config() -> Config {
        Config {
            grace: Duration::from_secs(2),
            ..Config::default()
        }
    }

    async fn wait_for<F>(handle: &SupervisorHandle, mut pred: F) -> Vec<ServiceData>
    where
        F: FnMut(&[ServiceData]) -> bool,
    {
        for _ in 0..100 {
            let snap = handle.snapshot().await.unwrap();
            if pred(&snap) {
                return snap;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn starts_services_and_stops_them_on_shutdown() {
        let log = ActionLog::new();
        let sup = Supervisor::builder(config())
            .with_pool(pool(&log))
            .with_service(ServiceConfig::new("web", "run-web", "pool").with_count(2))
            .build();
        let handle = sup.handle();
        let join = tokio::spawn(sup.run());

        let snap = wait_for(&handle, |s| s.len() == 1).await;
        assert_eq!(snap[0].state, ServiceState::Starting);

        log.complete_all(ActionKind::Start, 0);
        wait_for(&handle, |s| s[0].state == ServiceState::Up).await;

        handle.shutdown().unwrap();
        while !join.is_finished() {
            log.complete_all(ActionKind::Kill, 0);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        join.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn apply_grows_and_removes_services() {
        let log = ActionLog::new();
        let sup = Supervisor::builder(config())
            .with_pool(pool(&log))
            .with_service(ServiceConfig::new("web", "run-web", "pool"))
            .build();
        let handle = sup.handle();
        let join = tokio::spawn(sup.run());

        wait_for(&handle, |s| s.len() == 1).await;
        log.complete_all(ActionKind::Start, 0);
        wait_for(&handle, |s| s[0].state == ServiceState::Up).await;

        handle
            .apply(vec![
                ServiceConfig::new("web", "run-web", "pool").with_count(3),
                ServiceConfig::new("api", "run-api", "pool"),
            ])
            .await
            .unwrap();
        let snap = handle.snapshot().await.unwrap();
        let names: Vec<&str> = snap.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["api", "web"]);
        assert_eq!(snap[1].instances.len(), 3);

        handle
            .apply(vec![ServiceConfig::new("web", "run-web", "pool").with_count(3)])
            .await
            .unwrap();
        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.len(), 1);

        handle.shutdown().unwrap();
        while !join.is_finished() {
            log.complete_all(ActionKind::Start, 0);
            log.complete_all(ActionKind::Kill, 0);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        join.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn apply_rejects_unknown_pool_without_changes() {
        let log = ActionLog::new();
        let sup = Supervisor::builder(config()).with_pool(pool(&log)).build();
        let handle = sup.handle();
        let join = tokio::spawn(sup.run());

        let err = handle
            .apply(vec![
                ServiceConfig::new("web", "run-web", "pool"),
                ServiceConfig::new("api", "run-api", "missing"),
            ])
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "runtime_unknown_pool");
        assert!(handle.snapshot().await.unwrap().is_empty());

        let err = handle.stop("web").await.unwrap_err();
        assert_eq!(err.as_label(), "runtime_unknown_service");

        handle.shutdown().unwrap();
        join.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_reports_stuck_instances() {
        let log = ActionLog::new();
        let sup = Supervisor::builder(config())
            .with_pool(pool(&log))
            .with_service(ServiceConfig::new("web", "run-web", "pool").with_count(2))
            .build();
        let handle = sup.handle();
        let join = tokio::spawn(sup.run());

        wait_for(&handle, |s| s.len() == 1).await;
        log.complete_all(ActionKind::Start, 0);
        wait_for(&handle, |s| s[0].state == ServiceState::Up).await;

        // Kills are never answered.
        handle.shutdown().unwrap();
        match join.await.unwrap() {
            Err(RuntimeError::GraceExceeded { stuck, .. }) => {
                assert_eq!(stuck, ["web.0", "web.1"]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
