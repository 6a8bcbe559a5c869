//! # Runtime events emitted by services, instances and the supervisor.
//!
//! The [`EventKind`] enum classifies events across four categories:
//! - **State events**: every instance/service state-machine transition
//! - **Action events**: dispatch, fail-to-start, timeouts and dropped outcomes
//! - **Configuration events**: services added, removed or reconfigured
//! - **Runtime events**: shutdown progress and subscriber health
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use servicevisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::InstanceTransition)
//!     .with_service("web")
//!     .with_instance("web.0")
//!     .with_states("starting", "up");
//!
//! assert_eq!(ev.kind, EventKind::InstanceTransition);
//! assert_eq!(ev.to, Some("up"));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === State events ===
    /// An instance state machine changed state.
    ///
    /// Sets: `service`, `instance`, `from`, `to`, `reason` (event name).
    InstanceTransition,

    /// A service aggregate state machine changed state.
    ///
    /// Sets: `service`, `from`, `to`, `reason` (event name).
    ServiceTransition,

    // === Action events ===
    /// An action was submitted to a node.
    ///
    /// Sets: `service`, `instance`, `action`, `node`.
    ActionDispatched,

    /// An action completed.
    ///
    /// Sets: `service`, `instance`, `action`, `exit_status`.
    ActionCompleted,

    /// An action could not even be launched.
    ///
    /// Sets: `service`, `instance`, `action`, `reason`.
    ActionFailStart,

    /// A monitor action exceeded the configured monitor timeout.
    ///
    /// Sets: `service`, `instance`, `action`, `timeout_ms`.
    MonitorTimeout,

    /// A monitor cycle was requested while another one was still in flight (defect).
    ///
    /// Sets: `service`, `instance`, `reason` (the outstanding action).
    MonitorOverlap,

    /// An outcome or timer arrived for an action/instance that is no longer current.
    ///
    /// Sets: `service`, `instance`, `reason`.
    StaleOutcome,

    /// Next delayed step of an instance was armed.
    ///
    /// Sets: `service`, `instance`, `delay_ms`, `reason` (purpose).
    Scheduled,

    // === Configuration events ===
    /// A new service was added to the supervisor.
    ServiceAdded,

    /// A service was removed from the configuration and is draining.
    ServiceRemoved,

    /// A running service absorbed a new configuration.
    ///
    /// Sets: `service`, `reason` (`rebuild` or `incremental`).
    Reconfigured,

    // === Runtime events ===
    /// Shutdown requested (OS signal or explicit request).
    ShutdownRequested,

    /// All instances reached `down` within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some instances did not stop in time.
    GraceExceeded,

    /// Handling a message failed; the loop continues.
    ///
    /// Sets: `service`, `reason`.
    HandlerFailed,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `reason`.
    SubscriberOverflow,

    /// Subscriber panicked during event processing.
    ///
    /// Sets: `reason`.
    SubscriberPanicked,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Debug, Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Service name, if applicable.
    pub service: Option<Arc<str>>,
    /// Instance id (`<service>.<number>`), if applicable.
    pub instance: Option<Arc<str>>,
    /// Previous state (transition events).
    pub from: Option<&'static str>,
    /// New state (transition events).
    pub to: Option<&'static str>,
    /// Action name (`<instance>.<kind>`), if applicable.
    pub action: Option<Arc<str>>,
    /// Node name, if applicable.
    pub node: Option<Arc<str>>,
    /// Exit status of a completed action.
    pub exit_status: Option<i32>,
    /// Delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Human-readable reason (event names, errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            service: None,
            instance: None,
            from: None,
            to: None,
            action: None,
            node: None,
            exit_status: None,
            delay_ms: None,
            timeout_ms: None,
            reason: None,
        }
    }

    #[inline]
    pub fn with_service(mut self, service: impl Into<Arc<str>>) -> Self {
        self.service = Some(service.into());
        self
    }

    #[inline]
    pub fn with_instance(mut self, instance: impl Into<Arc<str>>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    #[inline]
    pub fn with_states(mut self, from: &'static str, to: &'static str) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    #[inline]
    pub fn with_action(mut self, action: impl Into<Arc<str>>) -> Self {
        self.action = Some(action.into());
        self
    }

    #[inline]
    pub fn with_node(mut self, node: impl Into<Arc<str>>) -> Self {
        self.node = Some(node.into());
        self
    }

    #[inline]
    pub fn with_exit_status(mut self, status: i32) -> Self {
        self.exit_status = Some(status);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(compact_ms(d));
        self
    }

    /// Attaches a timeout (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(compact_ms(d));
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_reason(format!("subscriber={subscriber} info={info}"))
    }
}

fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let a = Event::new(EventKind::ShutdownRequested);
        let b = Event::new(EventKind::ShutdownRequested);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn durations_are_clamped() {
        let ev = Event::new(EventKind::Scheduled).with_delay(Duration::from_secs(u64::MAX));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }
}
