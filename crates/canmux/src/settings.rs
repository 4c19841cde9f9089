//! Manager settings

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Manager configuration; every field has a default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerSettings {
    /// Network profile file
    pub profiles_path: PathBuf,
    /// Save profiles after every configuration change
    pub auto_save: bool,
    /// Scheduler and inbound drain interval
    pub tick_interval_ms: u64,
    pub hardware_refresh_interval_ms: u64,
    /// Delay before the first auto-reconnect sweep
    pub startup_sweep_delay_ms: u64,
    /// Run the auto-reconnect sweep after every hardware refresh
    pub sweep_after_refresh: bool,
    pub inbound_queue_capacity: usize,
    pub event_capacity: usize,
    /// Create the stock networks when no profile file is found
    pub create_default_networks: bool,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            profiles_path: PathBuf::from("network_profiles.json"),
            auto_save: true,
            tick_interval_ms: 100,
            hardware_refresh_interval_ms: 10_000,
            startup_sweep_delay_ms: 2000,
            sweep_after_refresh: true,
            inbound_queue_capacity: 4096,
            event_capacity: 1024,
            create_default_networks: false,
        }
    }
}

impl ManagerSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn hardware_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.hardware_refresh_interval_ms.max(1))
    }

    pub fn startup_sweep_delay(&self) -> Duration {
        Duration::from_millis(self.startup_sweep_delay_ms)
    }

    /// Settings for tests: profiles under `path`, no auto-save
    pub fn ephemeral(path: impl Into<PathBuf>) -> Self {
        Self {
            profiles_path: path.into(),
            auto_save: false,
            ..Default::default()
        }
    }
}
