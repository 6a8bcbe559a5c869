//! # StateManager: buffered snapshot persistence.
//!
//! ```text
//! save_service(data) ──► StateSaveBuffer ──(flush due)──► StateStore::save
//! restore(names)     ──► validate StateMetadata ──► StateStore::restore ──► ServiceData per name
//! cleanup()          ──► flush remaining ──► StateStore::cleanup
//! ```

use std::collections::HashMap;
use std::time::Instant;

use serde_json::Value;

use crate::error::PersistenceError;

use super::buffer::StateSaveBuffer;
use super::snapshot::{ServiceData, StateMetadata};
use super::store::{StateKey, StateKind, StateStore};

const METADATA_NAME: &str = "StateMetadata";

/// Persists service snapshots through a [`StateStore`].
#[derive(Debug)]
pub struct StateManager {
    store: Box<dyn StateStore>,
    buffer: StateSaveBuffer,
}

impl StateManager {
    pub fn new(store: impl StateStore, buffer_size: usize) -> Self {
        Self {
            store: Box::new(store),
            buffer: StateSaveBuffer::new(buffer_size),
        }
    }

    /// Validates stored metadata, then returns the stored snapshot of every named service.
    pub fn restore<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<HashMap<String, ServiceData>, PersistenceError> {
        tracing::debug!("restoring state");
        let meta_key = StateKey::new(StateKind::Metadata, METADATA_NAME);
        let meta = self.store.restore(std::slice::from_ref(&meta_key))?;
        let meta = meta
            .get(&meta_key)
            .map(|v| serde_json::from_value::<StateMetadata>(v.clone()))
            .transpose()?;
        StateMetadata::validate(meta.as_ref())?;

        let keys: Vec<StateKey> = names
            .into_iter()
            .map(|n| StateKey::new(StateKind::Service, n))
            .collect();
        self.store
            .restore(&keys)?
            .into_iter()
            .map(|(key, value)| -> Result<_, PersistenceError> {
                Ok((key.name, serde_json::from_value(value)?))
            })
            .collect()
    }

    pub fn save_service(&mut self, data: &ServiceData) -> Result<(), PersistenceError> {
        let value = serde_json::to_value(data)?;
        self.save(StateKey::new(StateKind::Service, data.name.as_str()), value)
    }

    pub fn save_metadata(&mut self) -> Result<(), PersistenceError> {
        let value = serde_json::to_value(StateMetadata::current())?;
        self.save(StateKey::new(StateKind::Metadata, METADATA_NAME), value)
    }

    /// Writes every buffered snapshot.
    pub fn flush(&mut self) -> Result<(), PersistenceError> {
        let pairs = self.buffer.drain();
        if pairs.is_empty() {
            return Ok(());
        }
        let keys = pairs
            .iter()
            .map(|(k, _)| k.to_string())
            .collect::<Vec<_>>()
            .join(",");
        tracing::debug!(%keys, "saving state");

        let started = Instant::now();
        if let Err(e) = self.store.save(pairs) {
            tracing::warn!(%keys, error = %e, "failed to save state");
            return Err(e);
        }
        tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "state saved");
        Ok(())
    }

    /// Flushes and releases the store.
    pub fn cleanup(&mut self) -> Result<(), PersistenceError> {
        self.flush()?;
        self.store.cleanup()
    }

    fn save(&mut self, key: StateKey, value: Value) -> Result<(), PersistenceError> {
        if self.buffer.save(key, value) {
            self.flush()?;
        }
        Ok(())
    }
}
