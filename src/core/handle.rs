//! # Control channel into a running supervisor.
//!
//! [`SupervisorHandle`] is a cheap, cloneable sender. Every request is handled
//! by the event loop between deliveries, so it never races a state machine.
//!
//! ```text
//! handle.apply(configs) ──► Control::Apply ──► Supervisor loop ──► reply (oneshot)
//! handle.shutdown()     ──► Control::Shutdown ──► stop all, wait grace
//! ```

use tokio::sync::{mpsc, oneshot};

use crate::error::RuntimeError;
use crate::persistence::ServiceData;
use crate::service::ServiceConfig;

type Reply<T> = oneshot::Sender<Result<T, RuntimeError>>;

/// Requests understood by the event loop.
#[derive(Debug)]
pub(crate) enum Control {
    /// Reconcile the running set of services with `configs`.
    Apply {
        configs: Vec<ServiceConfig>,
        reply: Reply<()>,
    },
    Start {
        service: String,
        reply: Reply<()>,
    },
    Stop {
        service: String,
        reply: Reply<()>,
    },
    RestartInstance {
        service: String,
        number: u64,
        reply: Reply<()>,
    },
    Snapshot {
        reply: Reply<Vec<ServiceData>>,
    },
    Shutdown,
}

/// Cloneable handle for controlling a running [`Supervisor`](super::Supervisor).
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<Control>,
}

impl SupervisorHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Control>) -> Self {
        Self { tx }
    }

    /// Applies a full set of service configurations.
    ///
    /// Existing services absorb their new configuration, new ones are started
    /// and services missing from `configs` are stopped.
    pub async fn apply(&self, configs: Vec<ServiceConfig>) -> Result<(), RuntimeError> {
        self.request(|reply| Control::Apply { configs, reply }).await
    }

    /// Starts a stopped service.
    pub async fn start(&self, service: impl Into<String>) -> Result<(), RuntimeError> {
        let service = service.into();
        self.request(|reply| Control::Start { service, reply }).await
    }

    /// Stops a running service (it stays configured).
    pub async fn stop(&self, service: impl Into<String>) -> Result<(), RuntimeError> {
        let service = service.into();
        self.request(|reply| Control::Stop { service, reply }).await
    }

    /// Re-starts a `down` instance.
    pub async fn restart_instance(
        &self,
        service: impl Into<String>,
        number: u64,
    ) -> Result<(), RuntimeError> {
        let service = service.into();
        self.request(|reply| Control::RestartInstance {
            service,
            number,
            reply,
        })
        .await
    }

    /// Snapshots of every configured service, sorted by name.
    pub async fn snapshot(&self) -> Result<Vec<ServiceData>, RuntimeError> {
        self.request(|reply| Control::Snapshot { reply }).await
    }

    /// Asks the supervisor to stop every service and exit.
    pub fn shutdown(&self) -> Result<(), RuntimeError> {
        self.tx
            .send(Control::Shutdown)
            .map_err(|_| RuntimeError::Closed)
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Control) -> Result<T, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).map_err(|_| RuntimeError::Closed)?;
        rx.await.map_err(|_| RuntimeError::Closed)?
    }
}
