//! Discovery and virtual bus settings

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Hardware discovery configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    /// Wall-clock budget for a single backend enumeration
    pub backend_timeout_ms: u64,
    /// Number of synthesized `virtual{n}` channels
    pub virtual_channels: usize,
    /// Root of the sysfs network class tree
    pub sysfs_net_root: PathBuf,
    pub enable_socketcan: bool,
    pub enable_vendor_sdks: bool,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            backend_timeout_ms: 5000,
            virtual_channels: 4,
            sysfs_net_root: PathBuf::from("/sys/class/net"),
            enable_socketcan: true,
            enable_vendor_sdks: true,
        }
    }
}

impl DiscoverySettings {
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }
}

/// Virtual bus behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualBusSettings {
    /// Generate simulated vehicle traffic on open virtual channels
    pub simulate_traffic: bool,
    /// Divides every simulated message period; 2.0 sends twice as often
    pub traffic_speedup: f64,
}

impl Default for VirtualBusSettings {
    fn default() -> Self {
        Self {
            simulate_traffic: true,
            traffic_speedup: 1.0,
        }
    }
}

impl VirtualBusSettings {
    /// Quiet bus, used by tests and headless setups
    pub fn silent() -> Self {
        Self {
            simulate_traffic: false,
            ..Default::default()
        }
    }

    /// Scale a nominal period by the speedup, never below 1 ms
    pub fn scaled_period(&self, period_ms: u64) -> Duration {
        let speedup = if self.traffic_speedup.is_finite() && self.traffic_speedup > 0.0 {
            self.traffic_speedup
        } else {
            1.0
        };
        let scaled = (period_ms as f64 / speedup).round() as u64;
        Duration::from_millis(scaled.max(1))
    }
}
