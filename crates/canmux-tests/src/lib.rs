//! Integration tests for the CAN network manager
//!
//! These tests exercise the crates together:
//! - Manager, connection state machine and scheduler
//! - Virtual bus transport with simulated traffic
//! - Hardware discovery backends
//! - Signal definition files
//!
//! No CAN hardware is needed; SocketCAN discovery runs against a fake sysfs
//! tree and physical opens go through the mock provider.
//!
//! # Test Structure
//!
//! - `manager_test.rs` - Lifecycle, arbitration and persistence across managers
//! - `discovery_test.rs` - Discovery with slow, failing and fake-sysfs backends
//! - `traffic_test.rs` - Virtual bus traffic and signal decoding end to end

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use canmux::{ManagerSettings, NetworkManager};
use canmux_core::{DecoderLoader, HardwareDescriptor, TransportProvider};
use canmux_transport::HardwareCatalog;
use tempfile::TempDir;

/// Manager wired to `provider`, with profiles under `dir` and no auto-save
pub fn manager_with(
    dir: &TempDir,
    catalog: HardwareCatalog,
    provider: Arc<dyn TransportProvider>,
    loader: Arc<dyn DecoderLoader>,
) -> NetworkManager {
    NetworkManager::new(
        ManagerSettings::ephemeral(dir.path().join("network_profiles.json")),
        Arc::new(catalog),
        provider,
        loader,
    )
}

/// Catalog with `channels` virtual channels and a short backend budget
pub fn virtual_catalog(channels: usize) -> HardwareCatalog {
    HardwareCatalog::new(channels, Duration::from_millis(300))
}

/// Create `<root>/<name>` as a sysfs net entry
pub fn fake_can_interface(root: &Path, name: &str, operstate: Option<&str>) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).expect("create sysfs dir");
    std::fs::write(dir.join("type"), "280\n").expect("write type");
    if let Some(state) = operstate {
        std::fs::write(dir.join("operstate"), format!("{}\n", state)).expect("write operstate");
    }
}

pub fn keys(hardware: &[HardwareDescriptor]) -> Vec<String> {
    hardware.iter().map(HardwareDescriptor::key).collect()
}
