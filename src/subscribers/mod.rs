//! # Event subscribers.
//!
//! ```text
//! instances / services / Supervisor ── publish(Event) ──► Bus
//!                                                          │
//!                                        Supervisor listener (one task)
//!                                                          │
//!                                                   SubscriberSet::emit
//!                                              ┌───────────┼───────────┐
//!                                              ▼           ▼           ▼
//!                                        HealthTracker  LogWriter   custom
//! ```
//!
//! - [`Subscribe`] trait for custom handlers
//! - [`SubscriberSet`] per-subscriber bounded queues and workers
//! - [`HealthTracker`] latest state per instance (always installed by the supervisor)
//! - [`LogWriter`] stdout printer (feature `logging`)

mod health;
#[cfg(feature = "logging")]
mod log;
mod set;
mod subscribe;

pub use health::HealthTracker;
#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
