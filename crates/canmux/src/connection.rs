//! Connection state machine for one network
//!
//! A [`Connection`] owns at most one open transport. Every open gets a fresh
//! [`LinkId`]; inbound messages tagged with any other link are stale and are
//! dropped by the caller before they reach here.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;

use canmux_core::{
    CanFrame, CanTransport, ConnectionState, ConnectionStatistics, Direction, FrameRecord,
    FrameSink, HardwareDescriptor, InboundMessage, LinkId, NetworkConfig, NetworkError,
    NetworkResult, OpenOptions, TransportError, TransportProvider,
};

use crate::events::{EventBus, ManagerEvent};

/// What a connection needs from its manager to open a transport
#[derive(Clone)]
pub struct LinkContext {
    pub provider: Arc<dyn TransportProvider>,
    pub inbound: mpsc::Sender<InboundMessage>,
    pub events: EventBus,
}

pub struct Connection {
    network_id: String,
    hardware: HardwareDescriptor,
    state: ConnectionState,
    transport: Option<Box<dyn CanTransport>>,
    link: Option<LinkId>,
    reconnect_at: Option<Instant>,
    stats: ConnectionStatistics,
}

impl Connection {
    pub fn new(network_id: impl Into<String>, hardware: HardwareDescriptor) -> Self {
        Self {
            network_id: network_id.into(),
            hardware,
            state: ConnectionState::Disconnected,
            transport: None,
            link: None,
            reconnect_at: None,
            stats: ConnectionStatistics::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn hardware(&self) -> &HardwareDescriptor {
        &self.hardware
    }

    pub fn hardware_key(&self) -> String {
        self.hardware.key()
    }

    /// Link of the open transport
    pub fn link(&self) -> Option<LinkId> {
        self.link
    }

    /// When the pending retry fires
    pub fn reconnect_at(&self) -> Option<Instant> {
        self.reconnect_at
    }

    pub fn stats(&self) -> &ConnectionStatistics {
        &self.stats
    }

    /// Holds or is acquiring its hardware
    pub fn is_live(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Connecting
        )
    }

    fn set_state(&mut self, state: ConnectionState, events: &EventBus) {
        if self.state != state {
            self.state = state;
            events.state_changed(&self.network_id, state);
        }
    }

    /// Open a transport on the bound hardware
    ///
    /// On failure the connection ends in `Error`, or in `Reconnecting` with
    /// a retry armed when auto-reconnect is on.
    pub async fn open(
        &mut self,
        config: &NetworkConfig,
        ctx: &LinkContext,
        now: Instant,
    ) -> NetworkResult<()> {
        self.reconnect_at = None;
        if self.stats.started_at.is_none() {
            self.stats.started_at = Some(Utc::now());
        }
        self.set_state(ConnectionState::Connecting, &ctx.events);

        let link = LinkId::next();
        let sink = FrameSink::new(self.network_id.clone(), link, ctx.inbound.clone());
        let options = OpenOptions::from(config);

        match ctx.provider.open(&self.hardware, &options, sink).await {
            Ok(transport) => {
                self.transport = Some(transport);
                self.link = Some(link);
                self.stats.reset_counters();
                self.stats.connected_at = Some(Utc::now());
                tracing::info!(
                    network_id = %self.network_id,
                    hardware_key = %self.hardware.key(),
                    link = %link,
                    bitrate = config.bitrate,
                    "Connected"
                );
                self.set_state(ConnectionState::Connected, &ctx.events);
                Ok(())
            }
            Err(e) => {
                let message = format!("Failed to connect to {}: {}", self.hardware.key(), e);
                self.enter_error(config, message, now, &ctx.events);
                Err(NetworkError::TransportOpenFailed(e.to_string()))
            }
        }
    }

    fn enter_error(
        &mut self,
        config: &NetworkConfig,
        message: String,
        now: Instant,
        events: &EventBus,
    ) {
        events.error(&self.network_id, message);
        self.set_state(ConnectionState::Error, events);
        if config.auto_reconnect {
            let delay = config.reconnect_delay();
            self.reconnect_at = Some(now + delay);
            tracing::info!(
                network_id = %self.network_id,
                delay_secs = delay.as_secs(),
                "Reconnect scheduled"
            );
            self.set_state(ConnectionState::Reconnecting, events);
        }
    }

    /// The armed retry has come due
    pub fn reconnect_due(&self, now: Instant) -> bool {
        self.state == ConnectionState::Reconnecting
            && self.reconnect_at.is_some_and(|at| now >= at)
    }

    /// Skip a due retry and arm the next one
    pub fn defer_reconnect(
        &mut self,
        config: &NetworkConfig,
        message: String,
        now: Instant,
        events: &EventBus,
    ) {
        self.reconnect_at = None;
        self.enter_error(config, message, now, events);
    }

    async fn release(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                tracing::debug!(network_id = %self.network_id, error = %e, "Transport close failed");
            }
        }
        self.link = None;
    }

    /// Tear down after a transport failure
    pub async fn fail(
        &mut self,
        config: &NetworkConfig,
        message: String,
        now: Instant,
        events: &EventBus,
    ) {
        self.release().await;
        self.stats.error_count += 1;
        self.enter_error(config, message, now, events);
    }

    pub async fn send(
        &mut self,
        frame: CanFrame,
        config: &NetworkConfig,
        now: Instant,
        events: &EventBus,
    ) -> NetworkResult<()> {
        let Some(transport) = self
            .transport
            .as_ref()
            .filter(|_| self.state == ConnectionState::Connected)
        else {
            return Err(NetworkError::NotConnected);
        };
        if config.listen_only {
            return Err(NetworkError::ListenOnlyViolation);
        }
        frame.validate().map_err(NetworkError::InvalidFrame)?;

        let result = transport.send(&frame).await;
        match result {
            Ok(()) => {
                let timestamp = Utc::now();
                self.stats.tx_count += 1;
                self.stats.message_count += 1;
                self.stats.last_message_at = Some(timestamp);
                events.emit(ManagerEvent::FrameTransmitted(record(
                    config,
                    Direction::Tx,
                    frame,
                    timestamp,
                )));
                Ok(())
            }
            Err(TransportError::InvalidFrame(reason)) => Err(NetworkError::InvalidFrame(reason)),
            Err(e) => {
                self.fail(config, format!("Failed to send message: {}", e), now, events)
                    .await;
                Err(NetworkError::TransportSendFailed(e.to_string()))
            }
        }
    }

    /// Count and publish a received frame
    pub fn record_rx(
        &mut self,
        frame: CanFrame,
        received_at: DateTime<Utc>,
        config: &NetworkConfig,
        events: &EventBus,
    ) {
        self.stats.rx_count += 1;
        self.stats.message_count += 1;
        if frame.error {
            self.stats.error_count += 1;
        }
        self.stats.last_message_at = Some(received_at);
        events.emit(ManagerEvent::FrameReceived(record(
            config,
            Direction::Rx,
            frame,
            received_at,
        )));
    }

    /// Cancel any retry, close the transport and settle in `Disconnected`
    pub async fn shutdown(&mut self, events: &EventBus) {
        self.reconnect_at = None;
        self.release().await;
        self.set_state(ConnectionState::Disconnected, events);
    }
}

fn record(
    config: &NetworkConfig,
    direction: Direction,
    frame: CanFrame,
    timestamp: DateTime<Utc>,
) -> FrameRecord {
    FrameRecord {
        timestamp,
        network_id: config.id.clone(),
        bus_number: config.bus_number,
        direction,
        frame,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canmux_transport::MockTransportProvider;
    use std::time::Duration;

    fn setup() -> (MockTransportProvider, LinkContext, mpsc::Receiver<InboundMessage>) {
        let mock = MockTransportProvider::new();
        let (tx, rx) = mpsc::channel(16);
        let ctx = LinkContext {
            provider: Arc::new(mock.clone()),
            inbound: tx,
            events: EventBus::new(64),
        };
        (mock, ctx, rx)
    }

    fn states(rx: &mut tokio::sync::broadcast::Receiver<ManagerEvent>) -> Vec<ConnectionState> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ManagerEvent::ConnectionStateChanged { state, .. } = event {
                out.push(state);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_open_and_send() {
        let (mock, ctx, _rx) = setup();
        let config = NetworkConfig::default();
        let mut conn = Connection::new(&config.id, HardwareDescriptor::virtual_channel(0));

        conn.open(&config, &ctx, Instant::now()).await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert!(conn.link().is_some());

        conn.send(CanFrame::standard(0x123, vec![1, 2]), &config, Instant::now(), &ctx.events)
            .await
            .unwrap();
        assert_eq!(conn.stats().tx_count, 1);
        assert_eq!(conn.stats().message_count, 1);
        assert_eq!(mock.sent("virtual:virtual0").len(), 1);
    }

    #[tokio::test]
    async fn test_failed_open_arms_retry() {
        let (mock, ctx, _rx) = setup();
        mock.fail_opens(1, "no adapter");
        let mut events = ctx.events.subscribe();
        let config = NetworkConfig {
            reconnect_delay_seconds: 3,
            ..Default::default()
        };
        let mut conn = Connection::new(&config.id, HardwareDescriptor::virtual_channel(0));
        let now = Instant::now();

        let result = conn.open(&config, &ctx, now).await;
        assert!(matches!(result, Err(NetworkError::TransportOpenFailed(_))));
        assert_eq!(
            states(&mut events),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Error,
                ConnectionState::Reconnecting
            ]
        );
        assert!(!conn.reconnect_due(now + Duration::from_millis(2999)));
        assert!(conn.reconnect_due(now + Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn test_failed_open_without_auto_reconnect() {
        let (mock, ctx, _rx) = setup();
        mock.fail_opens(1, "no adapter");
        let config = NetworkConfig {
            auto_reconnect: false,
            ..Default::default()
        };
        let mut conn = Connection::new(&config.id, HardwareDescriptor::virtual_channel(0));
        let _ = conn.open(&config, &ctx, Instant::now()).await;
        assert_eq!(conn.state(), ConnectionState::Error);
        assert!(conn.reconnect_at().is_none());
    }

    #[tokio::test]
    async fn test_send_guards() {
        let (_mock, ctx, _rx) = setup();
        let mut config = NetworkConfig::default();
        let mut conn = Connection::new(&config.id, HardwareDescriptor::virtual_channel(0));

        let result = conn
            .send(CanFrame::standard(0x1, vec![]), &config, Instant::now(), &ctx.events)
            .await;
        assert!(matches!(result, Err(NetworkError::NotConnected)));

        conn.open(&config, &ctx, Instant::now()).await.unwrap();
        let result = conn
            .send(CanFrame::standard(0x800, vec![]), &config, Instant::now(), &ctx.events)
            .await;
        assert!(matches!(result, Err(NetworkError::InvalidFrame(_))));
        assert_eq!(conn.state(), ConnectionState::Connected);

        config.listen_only = true;
        let result = conn
            .send(CanFrame::standard(0x1, vec![]), &config, Instant::now(), &ctx.events)
            .await;
        assert!(matches!(result, Err(NetworkError::ListenOnlyViolation)));
        assert_eq!(conn.stats().tx_count, 0);
    }

    #[tokio::test]
    async fn test_send_failure_routes_to_error() {
        let (mock, ctx, _rx) = setup();
        let config = NetworkConfig::default();
        let mut conn = Connection::new(&config.id, HardwareDescriptor::virtual_channel(0));
        conn.open(&config, &ctx, Instant::now()).await.unwrap();

        mock.fail_next_send(TransportError::SendFailed("bus-off".to_string()));
        let result = conn
            .send(CanFrame::standard(0x1, vec![]), &config, Instant::now(), &ctx.events)
            .await;
        assert!(matches!(result, Err(NetworkError::TransportSendFailed(_))));
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
        assert_eq!(conn.stats().error_count, 1);
        assert!(conn.link().is_none());
        assert!(!mock.is_open("virtual:virtual0"));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_retry() {
        let (mock, ctx, _rx) = setup();
        mock.fail_opens(1, "no adapter");
        let config = NetworkConfig::default();
        let mut conn = Connection::new(&config.id, HardwareDescriptor::virtual_channel(0));
        let now = Instant::now();
        let _ = conn.open(&config, &ctx, now).await;

        conn.shutdown(&ctx.events).await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.reconnect_due(now + Duration::from_secs(60)));
    }
}
