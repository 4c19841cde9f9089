//! canmux-signals - Signal definitions and frame decoding
//!
//! Decodes raw CAN payloads into named physical values. Definitions are
//! loaded from YAML or JSON files and attached to a network through its
//! symbol file path.
//!
//! # Definition Files
//!
//! ```yaml
//! meta:
//!   name: Powertrain
//!   version: "1.0"
//!
//! messages:
//!   - id: 0x100
//!     name: Engine_RPM
//!     signals:
//!       - name: EngineSpeed
//!         start_bit: 7
//!         length: 16
//!         byte_order: big_endian
//!         unit: rpm
//!       - name: CoolantTemp
//!         start_bit: 24
//!         length: 8
//!         offset: -40
//!         unit: °C
//! ```
//!
//! Physical value = raw * factor + offset. Little-endian signals count
//! `start_bit` from the least significant bit; big-endian signals use the
//! Motorola (sawtooth) numbering where `start_bit` names the MSB.

pub mod database;
pub mod decode;
pub mod definition;
pub mod error;
pub mod loader;

pub use database::{DatabaseMeta, SignalDatabase};
pub use definition::{ByteOrder, MessageDefinition, SignalDefinition};
pub use error::{SignalError, SignalResult};
pub use loader::FileDecoderLoader;
