//! Transport capability traits and the inbound hand-off channel types

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::TransportError;
use crate::models::{CanFrame, HardwareDescriptor, NetworkConfig, Protocol};

/// Options a transport is opened with, taken from the network configuration
#[derive(Debug, Clone, PartialEq)]
pub struct OpenOptions {
    pub bitrate: u32,
    pub sample_point: f64,
    pub protocol: Protocol,
    pub listen_only: bool,
    pub error_frames: bool,
    pub bus_number: i32,
}

impl From<&NetworkConfig> for OpenOptions {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            bitrate: config.bitrate,
            sample_point: config.sample_point,
            protocol: config.protocol,
            listen_only: config.listen_only,
            error_frames: config.enable_error_frames,
            bus_number: config.bus_number,
        }
    }
}

/// An open binding to one adapter channel
///
/// Inbound frames are not returned from here; the transport pushes them into
/// the [`FrameSink`] it was opened with.
#[async_trait]
pub trait CanTransport: Send + Sync {
    /// Put a frame on the bus
    async fn send(&self, frame: &CanFrame) -> Result<(), TransportError>;

    /// Stop delivery and release the channel
    ///
    /// Must be safe to call more than once.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens transports for hardware descriptors
#[async_trait]
pub trait TransportProvider: Send + Sync {
    async fn open(
        &self,
        hardware: &HardwareDescriptor,
        options: &OpenOptions,
        sink: FrameSink,
    ) -> Result<Box<dyn CanTransport>, TransportError>;
}

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one transport open
///
/// Every open gets a fresh id, so messages from a transport that has since
/// been torn down can be told apart from those of its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(u64);

impl LinkId {
    pub fn next() -> Self {
        LinkId(NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// What a transport hands off
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A frame arrived from the bus
    Frame(CanFrame),
    /// The transport failed while open (bus-off, read error, ...)
    Fault(String),
}

/// One message on the inbound channel
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub network_id: String,
    pub link: LinkId,
    pub received_at: DateTime<Utc>,
    pub event: LinkEvent,
}

/// Sending half of the inbound channel, bound to one network and one link
///
/// Transports call this from their own delivery context (a spawned task or
/// an OS thread). Nothing is mutated here; messages are only queued for the
/// coordinating context.
#[derive(Debug, Clone)]
pub struct FrameSink {
    network_id: String,
    link: LinkId,
    tx: mpsc::Sender<InboundMessage>,
}

impl FrameSink {
    pub fn new(network_id: impl Into<String>, link: LinkId, tx: mpsc::Sender<InboundMessage>) -> Self {
        Self {
            network_id: network_id.into(),
            link,
            tx,
        }
    }

    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    pub fn link(&self) -> LinkId {
        self.link
    }

    /// The coordinating side has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn message(&self, event: LinkEvent) -> InboundMessage {
        InboundMessage {
            network_id: self.network_id.clone(),
            link: self.link,
            received_at: Utc::now(),
            event,
        }
    }

    /// Queue a frame, waiting for capacity; `false` once the receiver is gone
    pub async fn deliver(&self, frame: CanFrame) -> bool {
        self.tx.send(self.message(LinkEvent::Frame(frame))).await.is_ok()
    }

    /// Queue a frame from a non-async thread, waiting for capacity
    ///
    /// Must not be called from within an async context.
    pub fn blocking_deliver(&self, frame: CanFrame) -> bool {
        self.tx
            .blocking_send(self.message(LinkEvent::Frame(frame)))
            .is_ok()
    }

    /// Queue a frame without waiting; the frame is dropped when the queue is full
    pub fn try_deliver(&self, frame: CanFrame) -> bool {
        self.try_push(LinkEvent::Frame(frame))
    }

    pub async fn report_fault(&self, reason: impl Into<String>) -> bool {
        self.tx
            .send(self.message(LinkEvent::Fault(reason.into())))
            .await
            .is_ok()
    }

    pub fn try_report_fault(&self, reason: impl Into<String>) -> bool {
        self.try_push(LinkEvent::Fault(reason.into()))
    }

    fn try_push(&self, event: LinkEvent) -> bool {
        match self.tx.try_send(self.message(event)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    network_id = %self.network_id,
                    link = %self.link,
                    "Inbound queue full, dropping message"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}
