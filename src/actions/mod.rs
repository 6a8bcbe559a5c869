//! Actions and their asynchronous outcomes.
//!
//! ## Contents
//! - [`ActionCommand`], [`ActionId`], [`ActionKind`], [`ActionOutcome`] what is dispatched and how it ends
//! - [`OutcomeSink`], [`Delivery`], [`InstanceKey`], [`Wakeup`] how results travel back to the event loop

mod action;
mod delivery;

pub use action::{ActionCommand, ActionId, ActionKind, ActionOutcome};
pub use delivery::{Delivery, InstanceKey, OutcomeSink, Wakeup};
