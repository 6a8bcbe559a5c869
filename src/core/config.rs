//! # Global runtime configuration.
//!
//! Provides [`Config`] centralized settings for the supervisor runtime and the
//! defaults handed to every service instance.
//!
//! ## Sentinel values
//! - `monitor_timeout = 0s` → no timeout (a hung health check blocks its instance's cycle)
//! - `bus_capacity = 0` → clamped to 1

use std::collections::BTreeMap;
use std::time::Duration;

use crate::policies::{BackoffPolicy, JitterPolicy};

/// Global configuration for the supervisor runtime.
///
/// ## Field semantics
/// - `grace`: Maximum wait for instances to reach `down` on shutdown
/// - `bus_capacity`: Event bus ring buffer size (min 1)
/// - `monitor_interval`: Default delay between monitor cycles (services may override)
/// - `monitor_timeout`: Max in-flight time of one monitor action (`0s` = unbounded)
/// - `monitor_jitter`: Randomization applied to every monitor re-arm delay
/// - `kill_backoff`: Delay schedule for re-dispatching a kill that failed to start
/// - `context`: Global command-context variables (last link of every chain)
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum time to wait for a graceful shutdown.
    ///
    /// On shutdown every service is stopped; the supervisor keeps handling
    /// outcomes until all instances are `down` or `grace` elapses, in which case
    /// `RuntimeError::GraceExceeded` is returned.
    pub grace: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,

    /// Default monitor interval for services without their own.
    pub monitor_interval: Duration,

    /// Monitor action timeout (`Duration::ZERO` = none).
    pub monitor_timeout: Duration,

    /// Jitter applied to monitor re-arm delays.
    pub monitor_jitter: JitterPolicy,

    /// Backoff between kill re-dispatches.
    pub kill_backoff: BackoffPolicy,

    /// Global template variables.
    pub context: BTreeMap<String, String>,
}

impl Config {
    /// Returns the monitor timeout as an `Option`.
    ///
    /// - `None` → monitor actions may run forever
    /// - `Some(d)` → a monitor still in flight after `d` counts as `monitor_fail`
    #[inline]
    pub fn default_monitor_timeout(&self) -> Option<Duration> {
        if self.monitor_timeout == Duration::ZERO {
            None
        } else {
            Some(self.monitor_timeout)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `grace = 60s`
    /// - `bus_capacity = 1024`
    /// - `monitor_interval = 10s`
    /// - `monitor_timeout = 0s` (no timeout)
    /// - `monitor_jitter = JitterPolicy::None`
    /// - `kill_backoff = BackoffPolicy::default()`
    /// - empty `context`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(60),
            bus_capacity: 1024,
            monitor_interval: Duration::from_secs(10),
            monitor_timeout: Duration::ZERO,
            monitor_jitter: JitterPolicy::None,
            kill_backoff: BackoffPolicy::default(),
            context: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels() {
        let mut cfg = Config::default();
        assert_eq!(cfg.default_monitor_timeout(), None);
        cfg.monitor_timeout = Duration::from_secs(3);
        assert_eq!(cfg.default_monitor_timeout(), Some(Duration::from_secs(3)));
        cfg.bus_capacity = 0;
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }
}
