//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: instance and service state machines (`Trigger::Any` listeners),
//!   service operations (dispatch, stale outcomes), the `Supervisor` loop,
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the supervisor's subscriber listener, which fans out to the
//!   `SubscriberSet` (including `HealthTracker`).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
