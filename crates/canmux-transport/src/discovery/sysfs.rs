//! SocketCAN interface discovery from the sysfs network class tree

use std::fs;
use std::path::{Path, PathBuf};

use canmux_core::{DiscoveryError, HardwareDescriptor, HardwareKind};

use super::DiscoveryBackend;

/// `ARPHRD_CAN` link type
const ARPHRD_CAN: &str = "280";

/// Lists network interfaces whose link type is CAN
#[derive(Debug, Clone)]
pub struct SysfsSocketCanBackend {
    root: PathBuf,
}

impl SysfsSocketCanBackend {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn describe(&self, dir: &Path, name: &str) -> Option<HardwareDescriptor> {
        let link_type = fs::read_to_string(dir.join("type")).ok()?;
        if link_type.trim() != ARPHRD_CAN {
            return None;
        }

        let (description, available) = match fs::read_to_string(dir.join("operstate")) {
            Ok(state) => {
                let state = state.trim().to_string();
                let available = matches!(state.as_str(), "up" | "down" | "unknown");
                (
                    format!("SocketCAN interface {} (State: {})", name, state),
                    available,
                )
            }
            Err(_) => (
                format!("SocketCAN interface {} (Hardware detected)", name),
                true,
            ),
        };

        Some(
            HardwareDescriptor::new(
                HardwareKind::SocketCan,
                name,
                format!("SocketCAN {}", name),
                description,
            )
            .with_available(available),
        )
    }
}

impl DiscoveryBackend for SysfsSocketCanBackend {
    fn name(&self) -> &str {
        "SocketCAN"
    }

    fn enumerate(&self) -> Result<Vec<HardwareDescriptor>, DiscoveryError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.root).map_err(|e| DiscoveryError::Backend {
            backend: self.name().to_string(),
            reason: format!("cannot read {}: {}", self.root.display(), e),
        })?;

        let mut found: Vec<HardwareDescriptor> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                // sysfs entries are symlinks to device directories
                let path = entry.path();
                path.is_dir().then(|| self.describe(&path, &name)).flatten()
            })
            .collect();
        found.sort_by(|a, b| a.channel.cmp(&b.channel));
        Ok(found)
    }
}
