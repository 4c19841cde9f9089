//! Daemon configuration file
//!
//! ```toml
//! [manager]
//! profiles_path = "/var/lib/canmux/network_profiles.json"
//! create_default_networks = true
//!
//! [discovery]
//! virtual_channels = 2
//! backend_timeout_ms = 3000
//!
//! [virtual_bus]
//! simulate_traffic = false
//! ```

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use canmux::ManagerSettings;
use canmux_transport::{DiscoverySettings, VirtualBusSettings};

/// Top-level TOML tables; every table is optional
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub manager: ManagerSettings,
    pub discovery: DiscoverySettings,
    pub virtual_bus: VirtualBusSettings,
}

impl DaemonConfig {
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("Invalid daemon configuration")
    }

    /// Read `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml(&content)
    }
}
