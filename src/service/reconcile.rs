//! # Reconciliation: applying a new configuration to a running service.
//!
//! ```text
//! absorb_previous(prev)
//!   ├─ adopt prev's machine, numbering, notice channel and retiring list
//!   ├─ not running (down/stopping)  ─► adopt instances as they are
//!   ├─ node_pool | command | scheduler changed
//!   │     └─► rebuild: build+start `count` new instances, retire every old one (newest first)
//!   └─ otherwise (incremental)
//!         ├─ adopt instances (re-linked to the new context and interval)
//!         ├─ fewer than `count` ─► build+start the delta
//!         └─ more than `count`  ─► retire from the tail (newest first)
//! ```
//!
//! The aggregate machine never sees `start`/`stop` here: reconfiguring a
//! running service does not take it through `down`.
//!
//! A running `prev` is only consumed once new instances are known to build
//! (non-empty pool, command and pid file render). Otherwise `self` becomes
//! `prev` again, instances untouched, and the error is returned.

use std::sync::Arc;

use crate::error::ServiceError;
use crate::events::{Event, EventKind};
use crate::machine::Label;

use super::aggregate::{Service, ServiceState};

impl Service {
    /// Takes over the live state of `prev`, the running copy of this service
    /// built from the previous configuration.
    ///
    /// Must be called on a freshly built service (no instances yet). When the
    /// new configuration cannot start instances, `self` is replaced by `prev`
    /// unchanged and the error is returned.
    pub fn absorb_previous(&mut self, prev: Service) -> Result<(), ServiceError> {
        if prev.config.name != self.config.name {
            return Err(ServiceError::InvalidConfig {
                service: self.config.name.clone(),
                reason: format!("cannot absorb service '{}'", prev.config.name),
            });
        }
        if !self.instances.is_empty() {
            return Err(ServiceError::AlreadyRunning {
                service: self.config.name.clone(),
                instances: self.instances.iter().map(|i| i.id().to_string()).collect(),
            });
        }

        let was_running = matches!(
            prev.state(),
            ServiceState::Starting | ServiceState::Up | ServiceState::Degraded
        );
        if was_running {
            self.last_instance = prev.last_instance;
            if let Err(e) = self.preflight() {
                tracing::warn!(
                    service = %self.name,
                    error = %e,
                    "new configuration rejected, keeping the running one"
                );
                *self = prev;
                return Err(e);
            }
        }

        let Service {
            config: prev_config,
            pool: prev_pool,
            machine,
            instances,
            retiring,
            last_instance,
            notices_tx,
            notices_rx,
            ..
        } = prev;

        // Existing instances report to the previous channel; keep one channel for all.
        self.machine = machine;
        self.last_instance = last_instance;
        self.notices_tx = notices_tx;
        self.notices_rx = notices_rx;
        self.retiring = retiring;

        let rebuild = *self.pool != *prev_pool
            || self.config.command != prev_config.command
            || self.config.scheduler != prev_config.scheduler;
        let mode = if !was_running {
            self.adopt(instances);
            "idle"
        } else if rebuild {
            tracing::info!(
                service = %self.name,
                old = instances.len(),
                new = self.config.count,
                "configuration change requires a rebuild"
            );
            for _ in 0..self.config.count {
                self.build_instance()?.start()?;
            }
            for inst in instances.into_iter().rev() {
                self.retire(inst)?;
            }
            "rebuild"
        } else {
            self.adopt(instances);
            let count = self.config.count;
            while self.instances.len() < count {
                self.build_instance()?.start()?;
            }
            while self.instances.len() > count {
                if let Some(inst) = self.instances.pop() {
                    self.retire(inst)?;
                }
            }
            "incremental"
        };

        self.env.bus.publish(
            Event::new(EventKind::Reconfigured)
                .with_service(Arc::clone(&self.name))
                .with_reason(mode),
        );
        tracing::debug!(
            service = %self.name,
            mode,
            state = self.state().label(),
            instances = self.instances.len(),
            "service reconfigured"
        );

        self.process_notices()?;
        self.settle()
    }

    fn adopt(&mut self, mut instances: Vec<super::ServiceInstance>) {
        for inst in &mut instances {
            inst.adopt(Arc::clone(&self.context), self.monitor_interval);
        }
        self.instances = instances;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::actions::ActionKind;
    use crate::service::{InstanceState, Service, ServiceConfig, ServiceState};
    use crate::testing::TestEnv;

    fn config(count: usize) -> ServiceConfig {
        ServiceConfig::new("web", "run-web", "pool").with_count(count)
    }

    fn running(env: &mut TestEnv, count: usize) -> Service {
        let pool = env.pool("pool", &["A", "B"]);
        let mut svc = Service::new(config(count), pool, env.env.clone()).unwrap();
        svc.start().unwrap();
        env.recorder.complete_all(ActionKind::Start, 0);
        env.pump(&mut svc);
        assert_eq!(svc.state(), ServiceState::Up);
        svc
    }

    fn numbers(svc: &Service) -> Vec<u64> {
        svc.instances().iter().map(|i| i.number()).collect()
    }

    #[test]
    fn growing_count_keeps_existing_instances() {
        let mut env = TestEnv::new();
        let prev = running(&mut env, 2);
        let nodes_before: Vec<String> = prev
            .instances()
            .iter()
            .map(|i| i.node().name().to_string())
            .collect();

        let mut next = Service::new(config(4), prev.pool().clone(), env.env.clone()).unwrap();
        next.absorb_previous(prev).unwrap();

        assert_eq!(numbers(&next), [0, 1, 2, 3]);
        assert_eq!(next.instances()[0].state(), InstanceState::Up);
        assert_eq!(next.instances()[1].state(), InstanceState::Up);
        assert_eq!(next.instances()[2].state(), InstanceState::Starting);
        assert_eq!(next.instances()[0].node().name(), nodes_before[0]);
        assert_eq!(next.instances()[1].node().name(), nodes_before[1]);
        assert!(next.retiring().is_empty());
        assert_eq!(next.state(), ServiceState::Up);

        env.recorder.complete_all(ActionKind::Start, 0);
        env.pump(&mut next);
        assert!(next
            .instances()
            .iter()
            .all(|i| i.state() == InstanceState::Up));
    }

    #[test]
    fn shrinking_count_retires_newest_first() {
        let mut env = TestEnv::new();
        let prev = running(&mut env, 4);

        let mut next = Service::new(config(2), prev.pool().clone(), env.env.clone()).unwrap();
        next.absorb_previous(prev).unwrap();

        assert_eq!(numbers(&next), [0, 1]);
        let retiring: Vec<u64> = next.retiring().iter().map(|i| i.number()).collect();
        assert_eq!(retiring, [3, 2]);

        env.recorder.complete_all(ActionKind::Kill, 0);
        env.pump(&mut next);
        assert!(next.retiring().is_empty());
        assert_eq!(next.state(), ServiceState::Up);
    }

    #[test]
    fn numbering_continues_across_reconfigurations() {
        let mut env = TestEnv::new();
        let prev = running(&mut env, 3);

        let mut shrunk = Service::new(config(1), prev.pool().clone(), env.env.clone()).unwrap();
        shrunk.absorb_previous(prev).unwrap();
        env.recorder.complete_all(ActionKind::Kill, 0);
        env.pump(&mut shrunk);

        let mut grown = Service::new(config(3), shrunk.pool().clone(), env.env.clone()).unwrap();
        grown.absorb_previous(shrunk).unwrap();
        assert_eq!(numbers(&grown), [0, 3, 4]);
        assert_eq!(grown.next_instance_number(), 5);
    }

    #[test]
    fn changed_pool_rebuilds_every_instance() {
        let mut env = TestEnv::new();
        let prev = running(&mut env, 2);

        let new_pool = env.pool("pool", &["C", "D"]);
        let mut next = Service::new(config(2), new_pool, env.env.clone()).unwrap();
        next.absorb_previous(prev).unwrap();

        assert_eq!(numbers(&next), [2, 3]);
        let nodes: Vec<&str> = next.instances().iter().map(|i| i.node().name()).collect();
        assert_eq!(nodes, ["C", "D"]);
        let retiring: Vec<(u64, InstanceState)> = next
            .retiring()
            .iter()
            .map(|i| (i.number(), i.state()))
            .collect();
        assert_eq!(
            retiring,
            [(1, InstanceState::Killing), (0, InstanceState::Killing)]
        );

        // Old instances going down does not degrade the service.
        env.recorder.complete_all(ActionKind::Kill, 0);
        env.recorder.complete_all(ActionKind::Start, 0);
        env.pump(&mut next);
        assert!(next.retiring().is_empty());
        assert_eq!(next.state(), ServiceState::Up);
    }

    #[test]
    fn changed_command_rebuilds() {
        let mut env = TestEnv::new();
        let prev = running(&mut env, 1);

        let cfg = ServiceConfig::new("web", "run-web --v2", "pool");
        let mut next = Service::new(cfg, prev.pool().clone(), env.env.clone()).unwrap();
        next.absorb_previous(prev).unwrap();

        assert_eq!(numbers(&next), [1]);
        assert_eq!(next.retiring().len(), 1);
        let (cmd, _) = env.recorder.take_for("web.1", ActionKind::Start).unwrap();
        assert_eq!(cmd.command, "run-web --v2");
    }

    #[test]
    fn stopped_service_stays_stopped() {
        let mut env = TestEnv::new();
        let mut prev = running(&mut env, 2);
        prev.stop().unwrap();
        env.recorder.complete_all(ActionKind::Kill, 0);
        env.pump(&mut prev);
        assert_eq!(prev.state(), ServiceState::Down);

        let mut next = Service::new(config(3), prev.pool().clone(), env.env.clone()).unwrap();
        next.absorb_previous(prev).unwrap();
        assert_eq!(next.state(), ServiceState::Down);
        assert!(next.instances().is_empty());
        assert_eq!(next.next_instance_number(), 2);
        assert_eq!(env.recorder.pending_len(), 0);
    }

    #[test]
    fn new_interval_applies_to_adopted_instances() {
        let mut env = TestEnv::new();
        let prev = running(&mut env, 1);

        let cfg = config(1).with_monitor_interval(Duration::from_secs(30));
        let mut next = Service::new(cfg, prev.pool().clone(), env.env.clone()).unwrap();
        next.absorb_previous(prev).unwrap();
        assert_eq!(next.instances()[0].monitor_interval(), Duration::from_secs(30));
    }

    fn assert_untouched(env: &TestEnv, svc: &Service) {
        assert_eq!(svc.config().command, "run-web");
        assert_eq!(svc.state(), ServiceState::Up);
        assert_eq!(numbers(svc), [0, 1]);
        assert!(svc
            .instances()
            .iter()
            .all(|i| i.state() == InstanceState::Up));
        assert!(svc.retiring().is_empty());
        assert!(env.recorder.take(ActionKind::Kill).is_none());
        assert!(env.recorder.take(ActionKind::Start).is_none());
        assert_eq!(svc.next_instance_number(), 2);
    }

    #[test]
    fn unrenderable_command_keeps_running_instances() {
        let mut env = TestEnv::new();
        let prev = running(&mut env, 2);

        let cfg = ServiceConfig::new("web", "run-web %(typo)s", "pool").with_count(2);
        let mut next = Service::new(cfg, prev.pool().clone(), env.env.clone()).unwrap();
        let err = next.absorb_previous(prev).unwrap_err();

        assert_eq!(err.as_label(), "render_failed");
        assert_untouched(&env, &next);
    }

    #[test]
    fn empty_pool_keeps_running_instances() {
        let mut env = TestEnv::new();
        let prev = running(&mut env, 2);

        let empty = env.pool("pool", &[]);
        let mut next = Service::new(config(2), empty, env.env.clone()).unwrap();
        let err = next.absorb_previous(prev).unwrap_err();

        assert_eq!(err.as_label(), "node_pool_empty");
        assert_untouched(&env, &next);
        assert_eq!(next.pool().node_names(), ["A", "B"]);
    }

    #[test]
    fn rejected_config_still_tracks_instances() {
        let mut env = TestEnv::new();
        let prev = running(&mut env, 2);

        let cfg = ServiceConfig::new("web", "run-web %(typo)s", "pool").with_count(2);
        let mut next = Service::new(cfg, prev.pool().clone(), env.env.clone()).unwrap();
        assert!(next.absorb_previous(prev).is_err());

        // The kept service still aggregates its instances.
        next.stop().unwrap();
        assert_eq!(env.recorder.complete_all(ActionKind::Kill, 0), 2);
        env.pump(&mut next);
        assert!(next.is_drained());
        assert_eq!(next.state(), ServiceState::Down);
    }

    #[test]
    fn absorbing_another_service_is_rejected() {
        let mut env = TestEnv::new();
        let prev = running(&mut env, 1);
        let cfg = ServiceConfig::new("api", "run-api", "pool");
        let mut next = Service::new(cfg, prev.pool().clone(), env.env.clone()).unwrap();
        assert_eq!(
            next.absorb_previous(prev).unwrap_err().as_label(),
            "invalid_config"
        );
    }
}
