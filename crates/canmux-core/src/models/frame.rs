//! CAN frames and frame records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_STANDARD_ID: u32 = 0x7FF;
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;
pub const MAX_CLASSIC_PAYLOAD: usize = 8;
pub const MAX_FD_PAYLOAD: usize = 64;

/// A single CAN frame (identifier + payload)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanFrame {
    pub id: u32,
    pub data: Vec<u8>,
    pub extended: bool,
    #[serde(default)]
    pub remote: bool,
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub fd: bool,
}

impl CanFrame {
    pub fn new(id: u32, data: impl Into<Vec<u8>>, extended: bool) -> Self {
        Self {
            id,
            data: data.into(),
            extended,
            remote: false,
            error: false,
            fd: false,
        }
    }

    /// 11-bit data frame
    pub fn standard(id: u32, data: impl Into<Vec<u8>>) -> Self {
        Self::new(id, data, false)
    }

    /// 29-bit data frame
    pub fn extended(id: u32, data: impl Into<Vec<u8>>) -> Self {
        Self::new(id, data, true)
    }

    pub fn error_frame() -> Self {
        Self {
            error: true,
            ..Self::new(0, Vec::new(), false)
        }
    }

    pub fn with_fd(mut self, fd: bool) -> Self {
        self.fd = fd;
        self
    }

    /// Check identifier range and payload length
    pub fn validate(&self) -> Result<(), String> {
        let max_id = if self.extended {
            MAX_EXTENDED_ID
        } else {
            MAX_STANDARD_ID
        };
        if self.id > max_id {
            return Err(format!(
                "identifier 0x{:X} exceeds {} range",
                self.id,
                if self.extended { "29-bit" } else { "11-bit" }
            ));
        }
        let max_len = if self.fd {
            MAX_FD_PAYLOAD
        } else {
            MAX_CLASSIC_PAYLOAD
        };
        if self.data.len() > max_len {
            return Err(format!(
                "payload of {} bytes exceeds {} byte limit",
                self.data.len(),
                max_len
            ));
        }
        Ok(())
    }
}

/// Frame direction relative to this host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Rx,
    Tx,
}

/// A frame as observed on a network, emitted to consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub timestamp: DateTime<Utc>,
    pub network_id: String,
    pub bus_number: i32,
    pub direction: Direction,
    pub frame: CanFrame,
}
