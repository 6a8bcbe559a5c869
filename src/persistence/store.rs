//! # Storage backends for snapshots.
//!
//! A [`StateStore`] maps [`StateKey`]s to JSON documents.
//!
//! - [`JsonFileStore`]: one `<kind>-<name>.json` file per key in a directory
//! - [`MemoryStore`]: shared in-memory map (tests, embedding)

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::PersistenceError;

/// What a stored document describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateKind {
    Service,
    Metadata,
}

impl StateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKind::Service => "service",
            StateKind::Metadata => "metadata",
        }
    }
}

/// Key of one stored document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateKey {
    pub kind: StateKind,
    pub name: String,
}

impl StateKey {
    pub fn new(kind: StateKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind.as_str(), self.name)
    }
}

/// Snapshot storage.
pub trait StateStore: Send + fmt::Debug + 'static {
    /// Returns the documents stored for `keys`; missing keys are absent from the map.
    fn restore(&self, keys: &[StateKey]) -> Result<HashMap<StateKey, Value>, PersistenceError>;

    /// Writes every pair.
    fn save(&mut self, pairs: Vec<(StateKey, Value)>) -> Result<(), PersistenceError>;

    /// Releases resources; called once on shutdown.
    fn cleanup(&mut self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// Directory of JSON files.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Creates the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, key: &StateKey) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl StateStore for JsonFileStore {
    fn restore(&self, keys: &[StateKey]) -> Result<HashMap<StateKey, Value>, PersistenceError> {
        let mut out = HashMap::new();
        for key in keys {
            let bytes = match fs::read(self.path(key)) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            out.insert(key.clone(), serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    fn save(&mut self, pairs: Vec<(StateKey, Value)>) -> Result<(), PersistenceError> {
        for (key, value) in pairs {
            let path = self.path(&key);
            let tmp = path.with_extension("json.tmp");
            fs::write(&tmp, serde_json::to_vec_pretty(&value)?)?;
            fs::rename(&tmp, &path)?;
        }
        Ok(())
    }
}

/// In-memory store; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    docs: Arc<Mutex<BTreeMap<StateKey, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &StateKey) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<StateKey, Value>> {
        self.docs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StateStore for MemoryStore {
    fn restore(&self, keys: &[StateKey]) -> Result<HashMap<StateKey, Value>, PersistenceError> {
        let docs = self.lock();
        Ok(keys
            .iter()
            .filter_map(|k| docs.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    fn save(&mut self, pairs: Vec<(StateKey, Value)>) -> Result<(), PersistenceError> {
        self.lock().extend(pairs);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_roundtrip_and_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::open(dir.path().join("state")).unwrap();
        let web = StateKey::new(StateKind::Service, "web");
        let api = StateKey::new(StateKind::Service, "api");

        store
            .save(vec![(web.clone(), serde_json::json!({ "name": "web" }))])
            .unwrap();
        assert!(dir.path().join("state/service-web.json").exists());

        let got = store.restore(&[web.clone(), api]).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[&web]["name"], "web");
    }

    #[test]
    fn corrupt_file_is_a_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        let key = StateKey::new(StateKind::Metadata, "StateMetadata");
        fs::write(dir.path().join("metadata-StateMetadata.json"), b"{ nope").unwrap();
        assert_eq!(
            store.restore(&[key]).unwrap_err().as_label(),
            "persistence_json"
        );
    }
}
