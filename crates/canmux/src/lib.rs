//! canmux - Multi-network CAN bus manager
//!
//! Manages several logical CAN networks, each bound to at most one hardware
//! channel, and guarantees that a hardware channel backs at most one live
//! connection at a time.
//!
//! - Connection state machine with automatic reconnect
//! - Periodic transmission per network
//! - Hardware discovery with a background refresh
//! - JSON profile persistence and startup auto-reconnect
//! - Optional signal decoding per network
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use canmux::{ManagerRuntime, ManagerSettings, NetworkManager};
//! use canmux_core::NetworkConfig;
//! use canmux_signals::FileDecoderLoader;
//! use canmux_transport::{BackendTransportProvider, DiscoverySettings, HardwareCatalog};
//!
//! let manager = NetworkManager::new(
//!     ManagerSettings::default(),
//!     Arc::new(HardwareCatalog::from_settings(&DiscoverySettings::default())),
//!     Arc::new(BackendTransportProvider::new(Default::default())),
//!     Arc::new(FileDecoderLoader),
//! );
//! let (handle, task) = ManagerRuntime::spawn(manager);
//!
//! let id = handle.create_network(NetworkConfig::named("Powertrain")).await?;
//! handle.connect_network(&id, "virtual:virtual0").await?;
//! ```

pub mod connection;
pub mod events;
pub mod manager;
pub mod network;
pub mod persistence;
pub mod runtime;
pub mod scheduler;
pub mod settings;

pub use connection::{Connection, LinkContext};
pub use events::{EventBus, ManagerEvent};
pub use manager::{HardwareSnapshot, NetworkManager};
pub use network::{Network, NetworkSummary};
pub use persistence::ProfileStore;
pub use runtime::{ManagerHandle, ManagerRuntime};
pub use scheduler::{PeriodicScheduler, PeriodicTask};
pub use settings::ManagerSettings;

pub use canmux_core::{NetworkError, NetworkResult};
