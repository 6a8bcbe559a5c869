//! # Desired configuration of one service.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::ServiceError;

/// Default PID-file template, rendered against the instance context.
pub const DEFAULT_PID_FILE: &str = "/var/run/%(id)s.pid";

/// What a service should look like.
///
/// `command`, `node_pool` and `scheduler` affect every running instance: a
/// change to any of them makes reconciliation rebuild all instances. A change
/// to `count` only grows or shrinks the instance set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub name: String,
    /// Command template launched by each instance's start action.
    pub command: String,
    /// Desired number of instances.
    pub count: usize,
    /// Name of the node pool instances are placed on.
    pub node_pool: String,
    /// PID-file template used by monitor and kill actions.
    pub pid_file: String,
    /// Monitor interval; falls back to the runtime default when `None`.
    pub monitor_interval: Option<Duration>,
    /// Opaque scheduler policy, compared only for equality.
    pub scheduler: Option<String>,
    /// Service-level template variables.
    pub context: BTreeMap<String, String>,
}

impl ServiceConfig {
    /// A single-instance service with the default PID-file template.
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        node_pool: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            count: 1,
            node_pool: node_pool.into(),
            pid_file: DEFAULT_PID_FILE.to_string(),
            monitor_interval: None,
            scheduler: None,
            context: BTreeMap::new(),
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn with_pid_file(mut self, template: impl Into<String>) -> Self {
        self.pid_file = template.into();
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = Some(interval);
        self
    }

    pub fn with_scheduler(mut self, policy: impl Into<String>) -> Self {
        self.scheduler = Some(policy.into());
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Rejects configurations no service can run with.
    pub fn validate(&self) -> Result<(), ServiceError> {
        let invalid = |reason: &str| ServiceError::InvalidConfig {
            service: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("empty name"));
        }
        if self.name.contains('.') {
            return Err(invalid("name must not contain '.'"));
        }
        if self.command.trim().is_empty() {
            return Err(invalid("empty command"));
        }
        if self.pid_file.trim().is_empty() {
            return Err(invalid("empty pid_file"));
        }
        if self.monitor_interval == Some(Duration::ZERO) {
            return Err(invalid("monitor_interval must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation() {
        assert!(ServiceConfig::new("web", "run-web", "pool").validate().is_ok());
        assert!(ServiceConfig::new("", "run-web", "pool").validate().is_err());
        assert!(ServiceConfig::new("web.1", "run-web", "pool").validate().is_err());
        assert!(ServiceConfig::new("web", " ", "pool").validate().is_err());
        assert!(ServiceConfig::new("web", "run-web", "pool")
            .with_monitor_interval(Duration::ZERO)
            .validate()
            .is_err());
    }
}
