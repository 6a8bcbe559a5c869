//! # Collaborators injected into services and instances.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::actions::Delivery;
use crate::context::CommandContext;
use crate::core::Config;
use crate::events::Bus;
use crate::policies::{BackoffPolicy, JitterPolicy};
use crate::scheduler::Scheduler;

/// Monitor-loop timing shared by every instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorSettings {
    /// Interval used when a service does not set its own.
    pub interval: Duration,
    pub timeout: Option<Duration>,
    pub jitter: JitterPolicy,
    pub kill_backoff: BackoffPolicy,
}

impl MonitorSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            interval: cfg.monitor_interval,
            timeout: cfg.default_monitor_timeout(),
            jitter: cfg.monitor_jitter,
            kill_backoff: cfg.kill_backoff,
        }
    }
}

/// Everything a service needs from the outside world.
///
/// - `scheduler`: `call_later` for monitor re-arm, monitor timeouts and kill retries
/// - `outcomes`: channel handed to nodes (inside each `OutcomeSink`)
/// - `bus`: event publishing
/// - `context`: global link of every command-context chain
#[derive(Debug, Clone)]
pub struct Env {
    pub scheduler: Arc<dyn Scheduler>,
    pub outcomes: mpsc::UnboundedSender<Delivery>,
    pub bus: Bus,
    pub monitor: MonitorSettings,
    pub context: Arc<CommandContext>,
}

impl Env {
    pub fn new(
        cfg: &Config,
        scheduler: Arc<dyn Scheduler>,
        outcomes: mpsc::UnboundedSender<Delivery>,
        bus: Bus,
    ) -> Self {
        let context = CommandContext::new(cfg.context.clone(), None);
        Self {
            scheduler,
            outcomes,
            bus,
            monitor: MonitorSettings::from_config(cfg),
            context: Arc::new(context),
        }
    }
}
