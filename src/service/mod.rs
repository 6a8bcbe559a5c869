//! Services and their instances.
//!
//! ## Contents
//! - [`ServiceInstance`] one copy of a service on one node, with its monitor loop
//! - [`Service`] the aggregate over instances, plus reconciliation (`absorb_previous`)
//! - [`ServiceConfig`] desired configuration of a service
//! - [`Env`] collaborators injected into both (scheduler, delivery channel, bus, global context)
//!
//! Everything here is synchronous: methods run to completion and hand
//! asynchronous work to a node or the scheduler. Results come back later as
//! [`Delivery`](crate::actions::Delivery) messages routed through [`Service::deliver`].

mod aggregate;
mod config;
mod env;
mod instance;
mod reconcile;

pub use aggregate::{Service, ServiceEvent, ServiceState};
pub use config::{ServiceConfig, DEFAULT_PID_FILE};
pub use env::{Env, MonitorSettings};
pub use instance::{InstanceEvent, InstanceState, ServiceInstance, KILL_COMMAND, MONITOR_COMMAND};
