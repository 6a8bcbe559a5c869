//! Runtime core: configuration, the supervisor event loop and its handle.
//!
//! Internal modules:
//! - [`supervisor`]: owns services, routes deliveries, drives shutdown;
//! - [`builder`]: assembles pools, subscribers and initial services;
//! - [`handle`]: cloneable control channel into a running supervisor;
//! - [`shutdown`]: cross-platform shutdown signal handling.

mod builder;
mod config;
mod handle;
mod shutdown;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use config::Config;
pub use handle::SupervisorHandle;
pub use supervisor::Supervisor;
