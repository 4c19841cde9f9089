//! Hardware adapter descriptors

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Adapter family
///
/// Each family implements the same open/send/close transport contract;
/// adding a backend means adding a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareKind {
    /// Simulated bus, always present
    Virtual,
    /// Linux kernel CAN network interface
    SocketCan,
    /// PEAK-System PCAN
    Pcan,
    /// Vector XL
    Vector,
    /// Kvaser CANlib
    Kvaser,
}

impl HardwareKind {
    pub const ALL: [HardwareKind; 5] = [
        HardwareKind::Virtual,
        HardwareKind::SocketCan,
        HardwareKind::Pcan,
        HardwareKind::Vector,
        HardwareKind::Kvaser,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HardwareKind::Virtual => "virtual",
            HardwareKind::SocketCan => "socketcan",
            HardwareKind::Pcan => "pcan",
            HardwareKind::Vector => "vector",
            HardwareKind::Kvaser => "kvaser",
        }
    }

    /// Capability tags derived from the adapter family
    pub fn capabilities(&self) -> &'static [&'static str] {
        match self {
            HardwareKind::Virtual => &["error_injection", "simulation", "unlimited_channels"],
            HardwareKind::SocketCan => &["native_linux", "error_frames"],
            HardwareKind::Pcan => &["hardware_filters", "timestamp_sync", "error_frames"],
            HardwareKind::Vector => &["hardware_filters", "precise_timing", "can_fd"],
            HardwareKind::Kvaser => &["hardware_filters", "silent_mode", "error_frames"],
        }
    }

    pub fn is_physical(&self) -> bool {
        !matches!(self, HardwareKind::Virtual)
    }
}

impl fmt::Display for HardwareKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown hardware kind: {0}")]
pub struct UnknownHardwareKind(pub String);

impl FromStr for HardwareKind {
    type Err = UnknownHardwareKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        HardwareKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lower)
            .ok_or_else(|| UnknownHardwareKind(s.to_string()))
    }
}

/// A discovered adapter channel
///
/// Identity is the `(kind, channel)` pair, written as `"kind:channel"`.
/// Descriptors are immutable within one catalog snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareDescriptor {
    pub kind: HardwareKind,
    pub channel: String,
    pub name: String,
    pub description: String,
    pub available: bool,
    pub capabilities: BTreeSet<String>,
}

impl HardwareDescriptor {
    pub fn new(
        kind: HardwareKind,
        channel: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            channel: channel.into(),
            name: name.into(),
            description: description.into(),
            available: true,
            capabilities: kind.capabilities().iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Synthesized virtual channel `virtual{index}`
    pub fn virtual_channel(index: usize) -> Self {
        Self::new(
            HardwareKind::Virtual,
            format!("virtual{}", index),
            format!("Virtual CAN {}", index),
            format!(
                "Virtual CAN interface for testing and simulation (Channel {})",
                index
            ),
        )
    }

    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.kind, self.channel)
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Split a `"kind:channel"` key
///
/// The channel may itself contain `:`; only the first separator counts.
pub fn parse_hardware_key(key: &str) -> Option<(HardwareKind, &str)> {
    let (kind, channel) = key.split_once(':')?;
    if channel.is_empty() {
        return None;
    }
    Some((kind.parse().ok()?, channel))
}
