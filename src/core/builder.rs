use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    core::Config,
    nodes::NodePool,
    persistence::StateManager,
    service::ServiceConfig,
    subscribers::Subscribe,
};

use super::supervisor::Supervisor;

/// Builder for constructing a [`Supervisor`] with its pools, subscribers and services.
pub struct SupervisorBuilder {
    cfg: Config,
    pools: HashMap<String, Arc<NodePool>>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    services: Vec<ServiceConfig>,
    state: Option<StateManager>,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            pools: HashMap::new(),
            subscribers: Vec::new(),
            services: Vec::new(),
            state: None,
        }
    }

    /// Registers a node pool. A later pool with the same name replaces the earlier one.
    pub fn with_pool(mut self, pool: NodePool) -> Self {
        self.pools.insert(pool.name().to_string(), Arc::new(pool));
        self
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (transitions, actions, failures)
    /// through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Adds a service started when the supervisor runs.
    pub fn with_service(mut self, service: ServiceConfig) -> Self {
        self.services.push(service);
        self
    }

    pub fn with_services(mut self, services: impl IntoIterator<Item = ServiceConfig>) -> Self {
        self.services.extend(services);
        self
    }

    /// Persists service snapshots and resumes from them on startup.
    pub fn with_state_manager(mut self, manager: StateManager) -> Self {
        self.state = Some(manager);
        self
    }

    /// Builds the supervisor. Nothing runs until [`Supervisor::run`].
    pub fn build(self) -> Supervisor {
        Supervisor::new_internal(
            self.cfg,
            self.pools,
            self.subscribers,
            self.state,
            self.services,
        )
    }
}
