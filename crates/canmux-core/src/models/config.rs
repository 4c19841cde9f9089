//! Persisted configuration of a logical CAN network

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// CAN protocol variant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// 11-bit identifiers
    Can20A,
    /// 29-bit identifiers
    #[default]
    Can20B,
    /// Flexible data-rate
    CanFd,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Can20A => "CAN-2.0A",
            Protocol::Can20B => "CAN-2.0B",
            Protocol::CanFd => "CAN-FD",
        }
    }

    /// Lenient parse: accepts `CAN-2.0A`, `CAN 2.0A`, `can_fd`, ...
    pub fn parse(s: &str) -> Option<Self> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '_' => '-',
                other => other.to_ascii_uppercase(),
            })
            .collect();
        match normalized.as_str() {
            "CAN-2.0A" => Some(Protocol::Can20A),
            "CAN-2.0B" => Some(Protocol::Can20B),
            "CAN-FD" | "CANFD" => Some(Protocol::CanFd),
            _ => None,
        }
    }

    pub fn is_fd(&self) -> bool {
        matches!(self, Protocol::CanFd)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Protocol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Protocol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Protocol::parse(&raw).unwrap_or_else(|| {
            tracing::warn!(protocol = %raw, "Unknown protocol in configuration, using default");
            Protocol::default()
        }))
    }
}

/// Configuration for a logical CAN network
///
/// This is the unit of persistence. Missing keys take their default value
/// and unknown keys are ignored, so older or newer profile files still load.
/// The snake_case aliases accept profiles written by earlier tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkConfig {
    #[serde(alias = "network_id")]
    pub id: String,
    pub name: String,
    pub description: String,
    /// User-facing bus number, unique per manager; `<= 0` means "assign one"
    #[serde(alias = "bus_number")]
    pub bus_number: i32,
    pub bitrate: u32,
    /// Sample point as a fraction (0-1)
    #[serde(alias = "sample_point")]
    pub sample_point: f64,
    pub protocol: Protocol,
    #[serde(alias = "listen_only")]
    pub listen_only: bool,
    #[serde(alias = "enable_error_frames")]
    pub enable_error_frames: bool,
    #[serde(alias = "auto_reconnect")]
    pub auto_reconnect: bool,
    #[serde(alias = "reconnect_delay")]
    pub reconnect_delay_seconds: u32,
    /// Opaque filter records, carried through untouched
    #[serde(alias = "message_filters")]
    pub message_filters: Vec<serde_json::Value>,
    /// Signal definition file; empty means no decoding
    #[serde(alias = "symbol_file_path")]
    pub symbol_file_path: String,
    /// Most recently bound hardware key (`kind:channel`)
    #[serde(alias = "last_hardware_interface")]
    pub last_hardware_key: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: "New Network".to_string(),
            description: String::new(),
            bus_number: 1,
            bitrate: 500_000,
            sample_point: 0.75,
            protocol: Protocol::default(),
            listen_only: false,
            enable_error_frames: true,
            auto_reconnect: true,
            reconnect_delay_seconds: 5,
            message_filters: Vec::new(),
            symbol_file_path: String::new(),
            last_hardware_key: String::new(),
        }
    }
}

impl NetworkConfig {
    /// New configuration with a fresh id and an unassigned bus number
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bus_number: 0,
            ..Default::default()
        }
    }

    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn with_bus_number(mut self, bus_number: i32) -> Self {
        self.bus_number = bus_number;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Reconnect delay, clamped to at least one second
    pub fn reconnect_delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.reconnect_delay_seconds.max(1)))
    }

    pub fn has_symbol_file(&self) -> bool {
        !self.symbol_file_path.trim().is_empty()
    }
}
