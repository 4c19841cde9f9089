//! Data models shared across the workspace

mod config;
mod frame;
mod hardware;
mod state;
mod stats;

pub use config::{NetworkConfig, Protocol};
pub use frame::{
    CanFrame, Direction, FrameRecord, MAX_CLASSIC_PAYLOAD, MAX_EXTENDED_ID, MAX_FD_PAYLOAD,
    MAX_STANDARD_ID,
};
pub use hardware::{parse_hardware_key, HardwareDescriptor, HardwareKind, UnknownHardwareKind};
pub use state::ConnectionState;
pub use stats::{ConnectionStatistics, GlobalStatistics};
