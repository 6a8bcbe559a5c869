//! Error types used by the servicevisor core and runtime.
//!
//! - [`MachineError`]: state-machine defects (illegal transitions, failing listeners).
//! - [`ServiceError`]: synchronous failures of service and instance operations.
//! - [`RenderError`]: command-template substitution failures.
//! - [`PersistenceError`]: snapshot store failures.
//! - [`RuntimeError`]: failures of the supervisor event loop itself.
//!
//! Every enum provides `as_label` (stable snake_case label for logs/metrics).

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by a state-machine listener.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// # Errors produced by [`StateMachine`](crate::machine::StateMachine).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum MachineError {
    /// The event is not a key of the current state's transition table.
    ///
    /// Always an ordering/programming defect. The machine state is left unchanged.
    #[error("{machine}: illegal transition '{event}' from state '{state}'")]
    IllegalTransition {
        /// Identity of the machine owner (instance id or service name).
        machine: Arc<str>,
        /// State the machine was in.
        state: &'static str,
        /// Rejected event.
        event: &'static str,
    },

    /// A listener failed while being notified of a transition.
    ///
    /// The transition itself has already happened; remaining listeners were skipped.
    #[error("{machine}: listener failed on entering '{state}': {source}")]
    Listener {
        /// Identity of the machine owner.
        machine: Arc<str>,
        /// State that had just been entered.
        state: &'static str,
        /// Error returned by the listener.
        #[source]
        source: ListenerError,
    },
}

impl MachineError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            MachineError::IllegalTransition { .. } => "illegal_transition",
            MachineError::Listener { .. } => "listener_failed",
        }
    }
}

/// # Errors produced by command-template rendering.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// `%(key)s` referenced a key absent from the whole context chain.
    #[error("unknown context key '{key}' in '{template}'")]
    MissingKey { key: String, template: String },

    /// The template contains an unterminated or unsupported `%` directive.
    #[error("malformed template '{template}' at byte {at}")]
    Malformed { template: String, at: usize },
}

/// # Errors produced by service and instance operations.
///
/// These surface synchronously to the caller of the operation.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ServiceError {
    /// A state-machine event was fired against a state that does not define it.
    #[error(transparent)]
    Transition(#[from] MachineError),

    /// `Service::start` was called while instances already exist.
    #[error("service '{service}' already has instances: {instances:?}")]
    AlreadyRunning {
        service: String,
        instances: Vec<String>,
    },

    /// Node lookup by name found no match.
    #[error("node '{name}' not found in pool '{pool}'")]
    NodeNotFound { pool: String, name: String },

    /// A node was requested from a pool without nodes.
    #[error("node pool '{pool}' has no nodes")]
    EmptyPool { pool: String },

    /// A command template could not be rendered.
    #[error(transparent)]
    Render(#[from] RenderError),

    /// No instance with this number is owned by the service.
    #[error("service '{service}' has no instance {number}")]
    UnknownInstance { service: String, number: u64 },

    /// The service configuration is unusable.
    #[error("invalid configuration for service '{service}': {reason}")]
    InvalidConfig { service: String, reason: String },
}

impl ServiceError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ServiceError::Transition(e) => e.as_label(),
            ServiceError::AlreadyRunning { .. } => "service_already_running",
            ServiceError::NodeNotFound { .. } => "node_not_found",
            ServiceError::EmptyPool { .. } => "node_pool_empty",
            ServiceError::Render(_) => "render_failed",
            ServiceError::UnknownInstance { .. } => "unknown_instance",
            ServiceError::InvalidConfig { .. } => "invalid_config",
        }
    }
}

/// # Errors produced by snapshot persistence.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("state store i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("state encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Stored state was written by a newer version.
    #[error("state for version {found:?}, expected at most {expected:?}")]
    VersionMismatch {
        found: (u32, u32, u32),
        expected: (u32, u32, u32),
    },
}

impl PersistenceError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            PersistenceError::Io(_) => "persistence_io",
            PersistenceError::Json(_) => "persistence_json",
            PersistenceError::VersionMismatch { .. } => "persistence_version_mismatch",
        }
    }
}

/// # Errors produced by the supervisor runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some instances never reached `down`.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Ids of instances that were still alive.
        stuck: Vec<String>,
    },

    /// A control request named a service the supervisor does not run.
    #[error("unknown service '{name}'")]
    UnknownService { name: String },

    /// A service configuration named an unregistered node pool.
    #[error("unknown node pool '{name}'")]
    UnknownPool { name: String },

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// The supervisor event loop is no longer running.
    #[error("supervisor is not running")]
    Closed,
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use servicevisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::UnknownService { .. } => "runtime_unknown_service",
            RuntimeError::UnknownPool { .. } => "runtime_unknown_pool",
            RuntimeError::Service(e) => e.as_label(),
            RuntimeError::Persistence(e) => e.as_label(),
            RuntimeError::Closed => "runtime_closed",
        }
    }
}
