//! canmux-transport - CAN transport backends and hardware discovery
//!
//! Transports:
//! - Virtual bus with optional simulated vehicle traffic, frame injection
//!   and per-message schedule control
//! - SocketCAN raw sockets (Linux only, `socketcan` feature)
//! - Vendor SDK adapters (PCAN, Vector, Kvaser) reported as unsupported
//! - Scriptable mock for tests
//!
//! Discovery runs every backend concurrently under a per-backend time
//! budget; a failing or hung backend only loses its own descriptors.
//!
//! # Example
//!
//! ```ignore
//! use canmux_transport::{BackendTransportProvider, HardwareCatalog, DiscoverySettings};
//!
//! let catalog = HardwareCatalog::from_settings(&DiscoverySettings::default());
//! let hardware = catalog.refresh().await;
//! let provider = BackendTransportProvider::new(Default::default());
//! let transport = provider.open(&hardware[0], &options, sink).await?;
//! ```

pub mod discovery;
pub mod mock;
mod provider;
pub mod settings;
pub mod vendor;
pub mod virtual_bus;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan;

pub use discovery::{DiscoveryBackend, DiscoveryReport, HardwareCatalog, SysfsSocketCanBackend};
pub use mock::MockTransportProvider;
pub use provider::{check_frame, BackendTransportProvider};
pub use settings::{DiscoverySettings, VirtualBusSettings};
pub use virtual_bus::{SimulatedMessageStatus, VirtualChannel, VirtualTransport};
