//! One logical CAN network
//!
//! A [`Network`] holds its configuration, the hardware it is bound to, an
//! optional [`Connection`], its periodic tasks and a lazily loaded signal
//! decoder.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;

use canmux_core::{
    CanFrame, ConnectionState, ConnectionStatistics, DecodedSignals, DecoderLoader,
    HardwareDescriptor, InboundMessage, LinkEvent, NetworkConfig, NetworkError, NetworkResult,
    SignalDecoder,
};

use crate::connection::{Connection, LinkContext};
use crate::events::EventBus;
use crate::scheduler::{PeriodicScheduler, PeriodicTask};

enum DecoderSlot {
    Unloaded,
    Loaded(Arc<dyn SignalDecoder>),
    Failed,
}

/// Point-in-time view of a network
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkSummary {
    pub config: NetworkConfig,
    pub state: ConnectionState,
    pub hardware_key: Option<String>,
    pub statistics: ConnectionStatistics,
    pub periodic_tasks: Vec<PeriodicTask>,
    pub decoder_loaded: bool,
}

pub struct Network {
    config: NetworkConfig,
    hardware: Option<HardwareDescriptor>,
    connection: Option<Connection>,
    scheduler: PeriodicScheduler,
    decoder: DecoderSlot,
}

impl Network {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            hardware: None,
            connection: None,
            scheduler: PeriodicScheduler::new(),
            decoder: DecoderSlot::Unloaded,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub(crate) fn config_mut(&mut self) -> &mut NetworkConfig {
        &mut self.config
    }

    /// Replace the configuration, keeping the id
    pub(crate) fn update_config(&mut self, mut config: NetworkConfig) {
        config.id = self.config.id.clone();
        if config.symbol_file_path != self.config.symbol_file_path {
            self.decoder = DecoderSlot::Unloaded;
        }
        self.config = config;
    }

    pub fn state(&self) -> ConnectionState {
        self.connection
            .as_ref()
            .map_or(ConnectionState::Disconnected, Connection::state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn hardware(&self) -> Option<&HardwareDescriptor> {
        self.hardware.as_ref()
    }

    /// Key of the hardware this network holds or is acquiring
    pub fn live_hardware_key(&self) -> Option<String> {
        self.connection
            .as_ref()
            .filter(|conn| conn.is_live())
            .map(Connection::hardware_key)
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn statistics(&self) -> ConnectionStatistics {
        self.connection
            .as_ref()
            .map(|conn| conn.stats().clone())
            .unwrap_or_default()
    }

    pub fn periodic_tasks(&self) -> &[PeriodicTask] {
        self.scheduler.tasks()
    }

    pub fn summary(&self) -> NetworkSummary {
        NetworkSummary {
            config: self.config.clone(),
            state: self.state(),
            hardware_key: self.hardware.as_ref().map(HardwareDescriptor::key),
            statistics: self.statistics(),
            periodic_tasks: self.scheduler.tasks().to_vec(),
            decoder_loaded: matches!(self.decoder, DecoderSlot::Loaded(_)),
        }
    }

    /// Bind to hardware; a connection on other hardware is shut down first
    pub async fn bind(&mut self, hardware: HardwareDescriptor, events: &EventBus) {
        if let Some(conn) = self.connection.as_mut() {
            if conn.hardware_key() != hardware.key() {
                self.scheduler.stop();
                conn.shutdown(events).await;
                self.connection = None;
            }
        }
        self.hardware = Some(hardware);
    }

    /// Open the bound hardware; a no-op when already connected or connecting
    pub async fn connect(&mut self, ctx: &LinkContext, now: Instant) -> NetworkResult<()> {
        let hardware = self.hardware.clone().ok_or(NetworkError::NoHardwareAssigned)?;
        if self
            .connection
            .as_ref()
            .is_some_and(|conn| conn.is_live() && conn.hardware_key() == hardware.key())
        {
            return Ok(());
        }

        let conn = self
            .connection
            .get_or_insert_with(|| Connection::new(self.config.id.clone(), hardware));
        conn.open(&self.config, ctx, now).await?;
        self.scheduler.start();
        Ok(())
    }

    pub async fn disconnect(&mut self, events: &EventBus) {
        self.scheduler.stop();
        if let Some(mut conn) = self.connection.take() {
            conn.shutdown(events).await;
            tracing::info!(network_id = %self.config.id, "Disconnected");
        }
    }

    pub fn reconnect_due(&self, now: Instant) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|conn| conn.reconnect_due(now))
    }

    /// Hardware key of the pending retry
    pub fn reconnect_key(&self) -> Option<String> {
        self.connection.as_ref().map(Connection::hardware_key)
    }

    /// Run a due retry
    pub async fn retry(&mut self, ctx: &LinkContext, now: Instant) -> NetworkResult<()> {
        let Some(conn) = self.connection.as_mut() else {
            return Err(NetworkError::NoHardwareAssigned);
        };
        tracing::info!(
            network_id = %self.config.id,
            hardware_key = %conn.hardware_key(),
            "Attempting reconnect"
        );
        conn.open(&self.config, ctx, now).await?;
        self.scheduler.start();
        Ok(())
    }

    pub fn defer_retry(&mut self, message: String, now: Instant, events: &EventBus) {
        if let Some(conn) = self.connection.as_mut() {
            conn.defer_reconnect(&self.config, message, now, events);
        }
    }

    pub async fn send(
        &mut self,
        frame: CanFrame,
        now: Instant,
        events: &EventBus,
    ) -> NetworkResult<()> {
        match self.connection.as_mut() {
            Some(conn) => conn.send(frame, &self.config, now, events).await,
            None => Err(NetworkError::NotConnected),
        }
    }

    /// Send whatever periodic frames are due
    pub async fn run_periodic(&mut self, now: Instant, events: &EventBus) {
        if self.config.listen_only || !self.is_connected() {
            return;
        }
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        for frame in self.scheduler.take_due(now) {
            let frame_id = frame.id;
            if let Err(e) = conn.send(frame, &self.config, now, events).await {
                tracing::debug!(
                    network_id = %self.config.id,
                    frame_id = format_args!("0x{:X}", frame_id),
                    error = %e,
                    "Periodic send failed"
                );
                if !conn.is_live() {
                    break;
                }
            }
        }
    }

    /// Apply one inbound message from the transport
    pub async fn handle_inbound(&mut self, msg: InboundMessage, now: Instant, events: &EventBus) {
        let Some(conn) = self
            .connection
            .as_mut()
            .filter(|conn| conn.link() == Some(msg.link))
        else {
            tracing::trace!(network_id = %self.config.id, link = %msg.link, "Dropping stale inbound message");
            return;
        };

        match msg.event {
            LinkEvent::Frame(frame) => {
                if frame.error && !self.config.enable_error_frames {
                    return;
                }
                conn.record_rx(frame, msg.received_at, &self.config, events);
            }
            LinkEvent::Fault(reason) => {
                tracing::error!(network_id = %self.config.id, reason = %reason, "Transport fault");
                conn.fail(&self.config, format!("Transport fault: {}", reason), now, events)
                    .await;
            }
        }
    }

    pub fn add_periodic(&mut self, task: PeriodicTask) {
        self.scheduler.add(task);
    }

    pub fn remove_periodic(&mut self, frame_id: u32) -> bool {
        self.scheduler.remove(frame_id)
    }

    pub fn set_periodic_enabled(&mut self, frame_id: u32, enabled: bool) -> bool {
        self.scheduler.set_enabled(frame_id, enabled)
    }

    /// Set the definition file and load it now; `false` when loading failed
    pub fn set_symbol_file(&mut self, path: impl Into<String>, loader: &dyn DecoderLoader) -> bool {
        self.config.symbol_file_path = path.into();
        self.decoder = DecoderSlot::Unloaded;
        self.decoder(loader).is_some()
    }

    fn decoder(&mut self, loader: &dyn DecoderLoader) -> Option<Arc<dyn SignalDecoder>> {
        if let DecoderSlot::Unloaded = self.decoder {
            if !self.config.has_symbol_file() {
                return None;
            }
            self.decoder = match loader.load(Path::new(&self.config.symbol_file_path)) {
                Ok(decoder) => DecoderSlot::Loaded(decoder),
                Err(e) => {
                    tracing::warn!(network_id = %self.config.id, error = %e, "Signal definitions not loaded");
                    DecoderSlot::Failed
                }
            };
        }
        match &self.decoder {
            DecoderSlot::Loaded(decoder) => Some(decoder.clone()),
            _ => None,
        }
    }

    /// Decode a payload; empty when no decoder is available
    pub fn decode(&mut self, frame_id: u32, payload: &[u8], loader: &dyn DecoderLoader) -> DecodedSignals {
        self.decoder(loader)
            .map(|decoder| decoder.decode(frame_id, payload))
            .unwrap_or_default()
    }
}
