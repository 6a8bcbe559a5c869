//! Persistence of service state across restarts.
//!
//! ## Contents
//! - [`ServiceData`], [`InstanceData`], [`StateMetadata`] serde snapshots
//! - [`StateStore`] storage trait with [`JsonFileStore`] and [`MemoryStore`]
//! - [`StateSaveBuffer`] coalesces saves per key
//! - [`StateManager`] ties the three together

mod buffer;
mod manager;
mod snapshot;
mod store;

pub use buffer::StateSaveBuffer;
pub use manager::StateManager;
pub use snapshot::{InstanceData, ServiceData, StateMetadata};
pub use store::{JsonFileStore, MemoryStore, StateKey, StateKind, StateStore};
