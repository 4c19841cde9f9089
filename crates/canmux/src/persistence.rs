//! Network profile persistence
//!
//! Profiles are stored as one JSON object keyed by network id:
//!
//! ```json
//! {
//!   "6f1c...": { "id": "6f1c...", "name": "Bus 1", "busNumber": 1, "bitrate": 500000, ... }
//! }
//! ```
//!
//! Loading is tolerant: a record that does not parse is skipped with a
//! warning instead of failing the whole file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use canmux_core::{NetworkConfig, NetworkError, NetworkResult};

/// Reads and writes the profile file
#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, configs: &[NetworkConfig]) -> NetworkResult<()> {
        save_to(&self.path, configs)
    }

    /// `None` when the file does not exist
    pub fn load(&self) -> NetworkResult<Option<Vec<NetworkConfig>>> {
        load_from(&self.path)
    }
}

pub fn save_to(path: &Path, configs: &[NetworkConfig]) -> NetworkResult<()> {
    let map: BTreeMap<&str, &NetworkConfig> = configs.iter().map(|c| (c.id.as_str(), c)).collect();
    let json = serde_json::to_string_pretty(&map)
        .map_err(|e| NetworkError::PersistenceFailed(format!("Failed to serialize profiles: {}", e)))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            NetworkError::PersistenceFailed(format!("Failed to create {}: {}", parent.display(), e))
        })?;
    }
    std::fs::write(path, json).map_err(|e| {
        NetworkError::PersistenceFailed(format!("Failed to write {}: {}", path.display(), e))
    })?;

    tracing::debug!(path = %path.display(), networks = configs.len(), "Profiles saved");
    Ok(())
}

/// Read profiles, sorted by bus number
pub fn load_from(path: &Path) -> NetworkResult<Option<Vec<NetworkConfig>>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "No profile file found");
            return Ok(None);
        }
        Err(e) => {
            return Err(NetworkError::PersistenceFailed(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };

    let root: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
        NetworkError::PersistenceFailed(format!("Failed to parse {}: {}", path.display(), e))
    })?;
    let serde_json::Value::Object(records) = root else {
        return Err(NetworkError::PersistenceFailed(format!(
            "{} does not contain a profile map",
            path.display()
        )));
    };

    let mut configs = Vec::with_capacity(records.len());
    for (id, record) in records {
        if !record.is_object() {
            tracing::warn!(network_id = %id, "Skipping profile that is not an object");
            continue;
        }
        match serde_json::from_value::<NetworkConfig>(record) {
            Ok(mut config) => {
                config.id = id;
                configs.push(config);
            }
            Err(e) => {
                tracing::warn!(network_id = %id, error = %e, "Skipping unreadable profile");
            }
        }
    }
    configs.sort_by_key(|c| c.bus_number);

    tracing::info!(path = %path.display(), networks = configs.len(), "Profiles loaded");
    Ok(Some(configs))
}
