//! # Snapshots of service state.
//!
//! Plain serde records; what is saved is exactly what `restore` needs.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::service::{InstanceState, ServiceState};

/// Snapshot of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceData {
    pub number: u64,
    /// Node name, looked up in the pool on restore.
    pub node: String,
    pub state: InstanceState,
    /// Rendered PID-file path.
    #[serde(default)]
    pub pid_file: String,
}

/// Snapshot of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceData {
    pub name: String,
    pub state: ServiceState,
    /// Last assigned instance number (`None` = no instance was ever built).
    pub last_instance: Option<u64>,
    pub instances: Vec<InstanceData>,
}

/// Version record stored next to service snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMetadata {
    pub version: (u32, u32, u32),
    /// Seconds since the Unix epoch.
    pub create_time: u64,
}

impl StateMetadata {
    /// Metadata for the running crate version.
    pub fn current() -> Self {
        let create_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            version: crate_version(),
            create_time,
        }
    }

    /// Fails when the stored state was written by a newer version.
    pub fn validate(stored: Option<&StateMetadata>) -> Result<(), PersistenceError> {
        let Some(stored) = stored else {
            return Ok(());
        };
        let expected = crate_version();
        if stored.version > expected {
            return Err(PersistenceError::VersionMismatch {
                found: stored.version,
                expected,
            });
        }
        Ok(())
    }
}

fn crate_version() -> (u32, u32, u32) {
    let part = |s: &str| s.parse().unwrap_or(0);
    (
        part(env!("CARGO_PKG_VERSION_MAJOR")),
        part(env!("CARGO_PKG_VERSION_MINOR")),
        part(env!("CARGO_PKG_VERSION_PATCH")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_serialize_lowercase() {
        let data = InstanceData {
            number: 3,
            node: "A".into(),
            state: InstanceState::Monitoring,
            pid_file: "/var/run/web.3.pid".into(),
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["state"], "monitoring");

        let bad = serde_json::json!({ "number": 0, "node": "A", "state": "zombie" });
        assert!(serde_json::from_value::<InstanceData>(bad).is_err());
    }

    #[test]
    fn newer_version_is_rejected() {
        assert!(StateMetadata::validate(None).is_ok());
        assert!(StateMetadata::validate(Some(&StateMetadata::current())).is_ok());

        let newer = StateMetadata {
            version: (u32::MAX, 0, 0),
            create_time: 0,
        };
        let err = StateMetadata::validate(Some(&newer)).unwrap_err();
        assert_eq!(err.as_label(), "persistence_version_mismatch");
    }
}
