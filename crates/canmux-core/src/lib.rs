//! canmux-core - Core types and capability traits for multi-network CAN management
//!
//! This crate provides the data model shared by every layer (hardware
//! descriptors, network configuration, frames, connection state), the error
//! taxonomy, and the capability traits that transport backends and signal
//! decoders implement.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    NetworkManager (canmux)               │
//! │   networks ── Network ── Connection ── CanTransport      │
//! │                 │                          │             │
//! │           SignalDecoder                FrameSink         │
//! │                                            │             │
//! │        inbound mpsc  <─────────────────────┘             │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod decoder;
pub mod error;
pub mod models;
pub mod transport;

pub use decoder::{DecodedSignals, DecoderLoader, NoopDecoderLoader, SignalDecoder, SignalValue};
pub use error::{DecoderError, DiscoveryError, NetworkError, NetworkResult, TransportError};
pub use models::*;
pub use transport::{
    CanTransport, FrameSink, InboundMessage, LinkEvent, LinkId, OpenOptions, TransportProvider,
};

/// Network id used for diagnostics that are not scoped to a single network
pub const SYSTEM_SCOPE: &str = "system";
