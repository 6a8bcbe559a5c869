//! # servicevisor
//!
//! **Servicevisor** keeps long-running services alive on a pool of execution nodes.
//!
//! A service is a command launched as `count` instances. Each instance is
//! placed on a node (round-robin over its pool), started, and then watched by
//! a periodic health check. A failing check marks the instance `down`; the
//! service aggregates its instances into `up`, `degraded` or `down`. Applying
//! a new configuration grows, shrinks or rebuilds the instance set without
//! taking the service down.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  ServiceConfig   ServiceConfig            SupervisorHandle
//!       │               │                  (apply/start/stop/shutdown)
//!       ▼               ▼                          │
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  Supervisor (single event loop)                                  │
//! │  - Service per name: aggregate machine + instances               │
//! │  - NodePools by name                                             │
//! │  - StateManager (optional snapshots)                             │
//! └──────┬───────────────────────────┬───────────────────────────────┘
//!        │ ServiceInstance           │ publish(Event)
//!        │  start/monitor/kill       ▼
//!        ▼                    ┌──────────────┐    ┌───────────────┐
//!   Node::run(action, sink)   │ Bus          │──► │ SubscriberSet │──► HealthTracker, LogWriter, ...
//!        │                    └──────────────┘    └───────────────┘
//!        │ sink.complete(exit_status)
//!        ▼
//!   mpsc<Delivery> ◄── TokioScheduler (monitor re-arm, timeouts, kill retries)
//!        │
//!        └──► Supervisor routes by (service, instance number)
//! ```
//!
//! ### Instance lifecycle
//! ```text
//! down ──start──► starting ──mark_up──► up ──monitor──► monitoring ──mark_up──► up
//!                    │                   │                  │
//!                    │ mark_down         │ stop             ├─ mark_down ──► down
//!                    ▼                   ▼                  ├─ monitor_fail ──► unknown ──monitor──► monitoring
//!                  down               killing               └─ stop ──► killing
//!
//! killing ──mark_down──► down
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                       |
//! |-------------------|--------------------------------------------------------------|------------------------------------------|
//! | **Supervision**   | Event loop owning every service; reconfiguration; shutdown.  | [`Supervisor`], [`SupervisorHandle`]     |
//! | **Services**      | Instance set, aggregate state, reconciliation.               | [`Service`], [`ServiceConfig`]           |
//! | **Nodes**         | Where actions run; round-robin placement.                    | [`Node`], [`LocalNode`], [`NodePool`]    |
//! | **Templates**     | `%(name)s` command templates over a context chain.           | [`CommandContext`]                       |
//! | **Subscriber API**| Hook into transitions and actions (logging, health).         | [`Subscribe`], [`HealthTracker`]         |
//! | **Persistence**   | Snapshot services and resume after a restart.                | [`StateManager`], [`StateStore`]         |
//! | **Policies**      | Monitor jitter and kill retry backoff.                       | [`JitterPolicy`], [`BackoffPolicy`]      |
//! | **Errors**        | Typed errors with stable labels.                             | [`ServiceError`], [`RuntimeError`]       |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//! - `testing`: exports the [`testing`] module (virtual-time scheduler, recording nodes).
//!
//! ## Example
//! ```rust,no_run
//! use servicevisor::{Config, LocalNode, NodePool, ServiceConfig, Supervisor};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = NodePool::new("local", vec![LocalNode::arc("localhost")]);
//!
//!     let sup = Supervisor::builder(Config::default())
//!         .with_pool(pool)
//!         .with_service(
//!             ServiceConfig::new("web", "python3 -m http.server 80%(instance_number)s", "local")
//!                 .with_count(2)
//!                 .with_pid_file("/tmp/%(id)s.pid"),
//!         )
//!         .build();
//!
//!     // Runs until SIGINT/SIGTERM, then stops every instance.
//!     sup.run().await?;
//!     Ok(())
//! }
//! ```
mod actions;
mod context;
mod core;
mod error;
mod events;
pub mod machine;
mod nodes;
mod persistence;
mod policies;
mod scheduler;
mod service;
mod subscribers;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// ---- Public re-exports ----

pub use actions::{
    ActionCommand, ActionId, ActionKind, ActionOutcome, Delivery, InstanceKey, OutcomeSink, Wakeup,
};
pub use context::CommandContext;
pub use self::core::{Config, Supervisor, SupervisorBuilder, SupervisorHandle};
pub use error::{
    ListenerError, MachineError, PersistenceError, RenderError, RuntimeError, ServiceError,
};
pub use events::{Bus, Event, EventKind};
pub use nodes::{LocalNode, Node, NodePool, NodeRef};
pub use persistence::{
    InstanceData, JsonFileStore, MemoryStore, ServiceData, StateKey, StateKind, StateManager,
    StateMetadata, StateSaveBuffer, StateStore,
};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use scheduler::{Scheduler, TokioScheduler};
pub use service::{
    Env, InstanceEvent, InstanceState, MonitorSettings, Service, ServiceConfig, ServiceEvent,
    ServiceInstance, ServiceState, DEFAULT_PID_FILE, KILL_COMMAND, MONITOR_COMMAND,
};
pub use subscribers::{HealthTracker, Subscribe, SubscriberSet};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
