//! Network manager
//!
//! Owns every [`Network`], the hardware snapshot and the profile store, and
//! enforces that one hardware key backs at most one live connection.
//!
//! All mutation happens through `&mut self`; the manager is driven by one
//! coordinating task (see [`crate::runtime`]). Transports never touch it
//! directly, they queue [`InboundMessage`]s that [`NetworkManager::tick`]
//! drains.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use canmux_core::{
    CanFrame, ConnectionState, ConnectionStatistics, DecodedSignals, DecoderLoader, GlobalStatistics,
    HardwareDescriptor, HardwareKind, InboundMessage, NetworkConfig, NetworkError, NetworkResult,
    TransportProvider,
};
use canmux_transport::HardwareCatalog;

use crate::connection::LinkContext;
use crate::events::{EventBus, ManagerEvent};
use crate::network::{Network, NetworkSummary};
use crate::persistence::{self, ProfileStore};
use crate::scheduler::PeriodicTask;
use crate::settings::ManagerSettings;

/// Hardware known at one point in time, keyed by `kind:channel`
#[derive(Debug, Clone, Default)]
pub struct HardwareSnapshot {
    hardware: BTreeMap<String, HardwareDescriptor>,
    order: Vec<String>,
}

impl HardwareSnapshot {
    pub fn new(list: Vec<HardwareDescriptor>) -> Self {
        let mut snapshot = Self::default();
        for hw in list {
            let key = hw.key();
            if !snapshot.hardware.contains_key(&key) {
                snapshot.order.push(key.clone());
                snapshot.hardware.insert(key, hw);
            }
        }
        snapshot
    }

    pub fn get(&self, key: &str) -> Option<&HardwareDescriptor> {
        self.hardware.get(key)
    }

    /// Descriptors in discovery order
    pub fn iter(&self) -> impl Iterator<Item = &HardwareDescriptor> {
        self.order.iter().filter_map(|key| self.hardware.get(key))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Stock networks created on first start
const DEFAULT_NETWORKS: [(&str, &str, u32); 3] = [
    ("Bus 1 - Virtual CAN", "Virtual CAN bus for testing and development", 500_000),
    ("Bus 2 - High-Speed CAN", "High-speed CAN bus (500 kbps)", 500_000),
    ("Bus 3 - Low-Speed CAN", "Low-speed CAN bus (125 kbps)", 125_000),
];

pub struct NetworkManager {
    settings: ManagerSettings,
    networks: Vec<Network>,
    hardware: Arc<HardwareSnapshot>,
    catalog: Arc<HardwareCatalog>,
    provider: Arc<dyn TransportProvider>,
    loader: Arc<dyn DecoderLoader>,
    store: ProfileStore,
    events: EventBus,
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: mpsc::Receiver<InboundMessage>,
    started: Instant,
    sweep_at: Option<Instant>,
}

impl NetworkManager {
    /// Manager with no networks; virtual channels are known immediately
    pub fn new(
        settings: ManagerSettings,
        catalog: Arc<HardwareCatalog>,
        provider: Arc<dyn TransportProvider>,
        loader: Arc<dyn DecoderLoader>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(settings.inbound_queue_capacity.max(1));
        let started = Instant::now();
        Self {
            hardware: Arc::new(HardwareSnapshot::new(catalog.virtual_hardware())),
            store: ProfileStore::new(settings.profiles_path.clone()),
            events: EventBus::new(settings.event_capacity),
            sweep_at: Some(started + settings.startup_sweep_delay()),
            settings,
            networks: Vec::new(),
            catalog,
            provider,
            loader,
            inbound_tx,
            inbound_rx,
            started,
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn catalog(&self) -> Arc<HardwareCatalog> {
        self.catalog.clone()
    }

    fn link_context(&self) -> LinkContext {
        LinkContext {
            provider: self.provider.clone(),
            inbound: self.inbound_tx.clone(),
            events: self.events.clone(),
        }
    }

    fn index_of(&self, network_id: &str) -> Option<usize> {
        self.networks.iter().position(|n| n.id() == network_id)
    }

    pub fn network(&self, network_id: &str) -> Option<&Network> {
        self.networks.iter().find(|n| n.id() == network_id)
    }

    pub fn networks(&self) -> impl Iterator<Item = &Network> {
        self.networks.iter()
    }

    pub fn summaries(&self) -> Vec<NetworkSummary> {
        self.networks.iter().map(Network::summary).collect()
    }

    pub fn network_by_bus_number(&self, bus_number: i32) -> Option<&Network> {
        self.networks.iter().find(|n| n.config().bus_number == bus_number)
    }

    pub fn bus_numbers(&self) -> Vec<i32> {
        let mut numbers: Vec<i32> = self.networks.iter().map(|n| n.config().bus_number).collect();
        numbers.sort_unstable();
        numbers
    }

    fn bus_number_taken(&self, bus_number: i32, except: Option<&str>) -> bool {
        self.networks
            .iter()
            .any(|n| n.config().bus_number == bus_number && Some(n.id()) != except)
    }

    fn next_bus_number(&self) -> i32 {
        let used: BTreeSet<i32> = self.networks.iter().map(|n| n.config().bus_number).collect();
        (1..).find(|n| !used.contains(n)).unwrap_or(1)
    }

    /// Network currently holding `hardware_key`, other than `except`
    fn holder_of(&self, hardware_key: &str, except: Option<&str>) -> Option<String> {
        self.networks
            .iter()
            .filter(|n| Some(n.id()) != except)
            .find(|n| n.live_hardware_key().as_deref() == Some(hardware_key))
            .map(|n| n.id().to_string())
    }

    fn autosave(&self) {
        if self.settings.auto_save {
            // Failure is already published as a diagnostic
            let _ = self.save_configuration(None);
        }
    }

    /// Publish a caller-facing failure; transport failures were published where they happened
    fn report(&self, network_id: &str, error: &NetworkError) {
        match error {
            NetworkError::TransportOpenFailed(_) | NetworkError::TransportSendFailed(_) => {}
            other => self.events.error(network_id, other.to_string()),
        }
    }

    // =========================================================================
    // Network lifecycle
    // =========================================================================

    /// Add a network; returns its id
    ///
    /// A missing or duplicate id gets a fresh one. A bus number that is not
    /// positive or already taken is replaced with the smallest free one.
    pub fn create_network(&mut self, mut config: NetworkConfig) -> String {
        if config.id.trim().is_empty() || self.index_of(&config.id).is_some() {
            config.id = uuid::Uuid::new_v4().to_string();
        }
        if config.bus_number <= 0 || self.bus_number_taken(config.bus_number, None) {
            config.bus_number = self.next_bus_number();
        }

        let id = config.id.clone();
        tracing::info!(
            network_id = %id,
            name = %config.name,
            bus_number = config.bus_number,
            "Network created"
        );
        self.networks.push(Network::new(config));
        self.events.emit(ManagerEvent::NetworkAdded {
            network_id: id.clone(),
        });
        self.autosave();
        id
    }

    /// Replace a network's configuration
    ///
    /// Takes effect on the next connect. A conflicting bus number is
    /// reassigned.
    pub fn update_network(&mut self, network_id: &str, mut config: NetworkConfig) -> NetworkResult<()> {
        let Some(index) = self.index_of(network_id) else {
            let error = NetworkError::NetworkNotFound(network_id.to_string());
            self.report(network_id, &error);
            return Err(error);
        };
        if config.bus_number <= 0 || self.bus_number_taken(config.bus_number, Some(network_id)) {
            let current = self.networks[index].config().bus_number;
            config.bus_number = if self.bus_number_taken(current, Some(network_id)) {
                self.next_bus_number()
            } else {
                current
            };
        }
        self.networks[index].update_config(config);
        tracing::info!(network_id = %network_id, "Network updated");
        self.autosave();
        Ok(())
    }

    pub async fn remove_network(&mut self, network_id: &str) -> bool {
        if self.index_of(network_id).is_none() {
            return false;
        }
        self.drain_inbound(Instant::now()).await;
        let Some(index) = self.index_of(network_id) else {
            return false;
        };
        let mut network = self.networks.remove(index);
        network.disconnect(&self.events).await;

        tracing::info!(network_id = %network_id, "Network removed");
        self.events.emit(ManagerEvent::NetworkRemoved {
            network_id: network_id.to_string(),
        });
        self.autosave();
        true
    }

    /// Stock networks, unbound
    pub fn create_default_networks(&mut self) -> Vec<String> {
        DEFAULT_NETWORKS
            .iter()
            .map(|(name, description, bitrate)| {
                self.create_network(
                    NetworkConfig::named(*name)
                        .with_description(*description)
                        .with_bitrate(*bitrate),
                )
            })
            .collect()
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Bind a network to hardware and connect it
    pub async fn connect_network(&mut self, network_id: &str, hardware_key: &str) -> NetworkResult<()> {
        let result = self.try_connect(network_id, hardware_key).await;
        if let Err(e) = &result {
            self.report(network_id, e);
        }
        result
    }

    async fn try_connect(&mut self, network_id: &str, hardware_key: &str) -> NetworkResult<()> {
        let index = self
            .index_of(network_id)
            .ok_or_else(|| NetworkError::NetworkNotFound(network_id.to_string()))?;
        let hardware = match self.hardware.get(hardware_key) {
            Some(hw) if hw.available => hw.clone(),
            Some(_) => {
                return Err(NetworkError::HardwareNotFound(format!(
                    "{} is not available",
                    hardware_key
                )))
            }
            None => return Err(NetworkError::HardwareNotFound(hardware_key.to_string())),
        };

        if let Some(bound) = self.networks[index].live_hardware_key() {
            if bound == hardware_key {
                return Ok(());
            }
            return Err(NetworkError::HardwareLocked(bound));
        }
        if let Some(holder) = self.holder_of(hardware_key, Some(network_id)) {
            return Err(NetworkError::HardwareInUse(format!(
                "{} is in use by network {}",
                hardware_key, holder
            )));
        }

        let ctx = self.link_context();
        let network = &mut self.networks[index];
        network.bind(hardware, &ctx.events).await;
        network.connect(&ctx, Instant::now()).await?;
        network.config_mut().last_hardware_key = hardware_key.to_string();
        self.autosave();
        Ok(())
    }

    /// Disconnect a network; queued inbound traffic is applied first
    pub async fn disconnect_network(&mut self, network_id: &str) -> NetworkResult<()> {
        if self.index_of(network_id).is_none() {
            let error = NetworkError::NetworkNotFound(network_id.to_string());
            self.report(network_id, &error);
            return Err(error);
        }
        self.drain_inbound(Instant::now()).await;
        if let Some(index) = self.index_of(network_id) {
            self.networks[index].disconnect(&self.events).await;
        }
        Ok(())
    }

    pub async fn disconnect_all(&mut self) {
        self.drain_inbound(Instant::now()).await;
        for network in &mut self.networks {
            network.disconnect(&self.events).await;
        }
    }

    /// Connect every network that has a remembered hardware key; returns how many connected
    pub async fn connect_all(&mut self) -> usize {
        let targets: Vec<(String, String)> = self
            .networks
            .iter()
            .filter(|n| !n.is_connected() && !n.config().last_hardware_key.is_empty())
            .map(|n| (n.id().to_string(), n.config().last_hardware_key.clone()))
            .collect();

        let mut connected = 0;
        for (id, key) in targets {
            if self.connect_network(&id, &key).await.is_ok() {
                connected += 1;
            }
        }
        connected
    }

    /// Reconnect disconnected networks to their last hardware where it is free
    pub async fn auto_reconnect_sweep(&mut self) -> usize {
        let candidates: Vec<(String, String)> = self
            .networks
            .iter()
            .filter(|n| {
                n.state() == ConnectionState::Disconnected
                    && !n.config().last_hardware_key.is_empty()
            })
            .map(|n| (n.id().to_string(), n.config().last_hardware_key.clone()))
            .collect();

        let mut connected = 0;
        for (id, key) in candidates {
            if !self.hardware.get(&key).is_some_and(|hw| hw.available) {
                tracing::debug!(network_id = %id, hardware_key = %key, "Last hardware not present");
                continue;
            }
            if self.holder_of(&key, Some(&id)).is_some() {
                tracing::debug!(network_id = %id, hardware_key = %key, "Last hardware in use");
                continue;
            }
            match self.connect_network(&id, &key).await {
                Ok(()) => connected += 1,
                Err(e) => tracing::debug!(network_id = %id, error = %e, "Auto-reconnect failed"),
            }
        }
        if connected > 0 {
            tracing::info!(connected, "Auto-reconnect sweep complete");
        }
        connected
    }

    // =========================================================================
    // Hardware
    // =========================================================================

    /// Enumerate hardware and apply the result
    pub async fn refresh_hardware(&mut self) -> Vec<HardwareDescriptor> {
        let hardware = self.catalog.refresh().await;
        self.apply_hardware(hardware.clone()).await;
        hardware
    }

    /// Replace the hardware snapshot
    ///
    /// Live connections keep their transports even when their hardware has
    /// disappeared from the list.
    pub async fn apply_hardware(&mut self, hardware: Vec<HardwareDescriptor>) {
        self.hardware = Arc::new(HardwareSnapshot::new(hardware.clone()));
        self.events.emit(ManagerEvent::HardwareDiscovered { hardware });
        if self.settings.sweep_after_refresh && self.sweep_at.is_none() {
            self.auto_reconnect_sweep().await;
        }
    }

    pub fn hardware_snapshot(&self) -> Arc<HardwareSnapshot> {
        self.hardware.clone()
    }

    pub fn available_hardware(&self) -> Vec<HardwareDescriptor> {
        self.hardware.iter().filter(|hw| hw.available).cloned().collect()
    }

    pub fn hardware_for_kind(&self, kind: HardwareKind) -> Vec<HardwareDescriptor> {
        self.hardware
            .iter()
            .filter(|hw| hw.kind == kind && hw.available)
            .cloned()
            .collect()
    }

    // =========================================================================
    // Traffic
    // =========================================================================

    pub async fn send_message(&mut self, network_id: &str, frame: CanFrame) -> NetworkResult<()> {
        let result = match self.networks.iter_mut().find(|n| n.id() == network_id) {
            Some(network) => network.send(frame, Instant::now(), &self.events).await,
            None => Err(NetworkError::NetworkNotFound(network_id.to_string())),
        };
        if let Err(e) = &result {
            self.report(network_id, e);
        }
        result
    }

    /// Send to every connected, transmitting network; returns how many accepted it
    pub async fn broadcast_message(&mut self, frame: CanFrame, exclude: &[String]) -> usize {
        let mut sent = 0;
        let now = Instant::now();
        for network in &mut self.networks {
            if !network.is_connected()
                || network.config().listen_only
                || exclude.iter().any(|id| id == network.id())
            {
                continue;
            }
            match network.send(frame.clone(), now, &self.events).await {
                Ok(()) => sent += 1,
                Err(e) => tracing::debug!(network_id = %network.id(), error = %e, "Broadcast send failed"),
            }
        }
        sent
    }

    pub fn add_periodic_message(&mut self, network_id: &str, task: PeriodicTask) -> NetworkResult<()> {
        self.with_network(network_id, |network| network.add_periodic(task))
    }

    pub fn remove_periodic_message(&mut self, network_id: &str, frame_id: u32) -> NetworkResult<bool> {
        self.with_network(network_id, |network| network.remove_periodic(frame_id))
    }

    pub fn set_periodic_enabled(
        &mut self,
        network_id: &str,
        frame_id: u32,
        enabled: bool,
    ) -> NetworkResult<bool> {
        self.with_network(network_id, |network| network.set_periodic_enabled(frame_id, enabled))
    }

    fn with_network<T>(
        &mut self,
        network_id: &str,
        f: impl FnOnce(&mut Network) -> T,
    ) -> NetworkResult<T> {
        match self.networks.iter_mut().find(|n| n.id() == network_id) {
            Some(network) => Ok(f(network)),
            None => {
                let error = NetworkError::NetworkNotFound(network_id.to_string());
                self.report(network_id, &error);
                Err(error)
            }
        }
    }

    // =========================================================================
    // Signals
    // =========================================================================

    /// Set and load a network's signal definitions; `Ok(false)` when loading failed
    pub fn set_symbol_file(&mut self, network_id: &str, path: &str) -> NetworkResult<bool> {
        let loader = self.loader.clone();
        let loaded = self.with_network(network_id, |network| {
            network.set_symbol_file(path, loader.as_ref())
        })?;
        self.autosave();
        Ok(loaded)
    }

    pub fn decode(&mut self, network_id: &str, frame_id: u32, payload: &[u8]) -> NetworkResult<DecodedSignals> {
        let loader = self.loader.clone();
        self.with_network(network_id, |network| {
            network.decode(frame_id, payload, loader.as_ref())
        })
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    pub fn network_statistics(&self, network_id: &str) -> NetworkResult<ConnectionStatistics> {
        self.network(network_id)
            .map(Network::statistics)
            .ok_or_else(|| NetworkError::NetworkNotFound(network_id.to_string()))
    }

    pub fn global_statistics(&self) -> GlobalStatistics {
        let mut stats = GlobalStatistics {
            total_networks: self.networks.len(),
            active_connections: self.networks.iter().filter(|n| n.is_connected()).count(),
            uptime_secs: self.started.elapsed().as_secs_f64(),
            ..Default::default()
        };
        for network in &self.networks {
            stats.accumulate(&network.statistics());
        }
        stats
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    pub fn save_configuration(&self, path: Option<&Path>) -> NetworkResult<()> {
        let configs: Vec<NetworkConfig> = self.networks.iter().map(|n| n.config().clone()).collect();
        let result = match path {
            Some(path) => persistence::save_to(path, &configs),
            None => self.store.save(&configs),
        };
        if let Err(e) = &result {
            self.events.system_error(e.to_string());
        }
        result
    }

    /// Replace all networks with the stored profiles; returns how many were loaded
    ///
    /// A missing file loads nothing and leaves the current networks alone.
    pub async fn load_configuration(&mut self, path: Option<&Path>) -> NetworkResult<usize> {
        let loaded = match path {
            Some(path) => persistence::load_from(path),
            None => self.store.load(),
        };
        let configs = match loaded {
            Ok(Some(configs)) => configs,
            Ok(None) => return Ok(0),
            Err(e) => {
                self.events.system_error(e.to_string());
                return Err(e);
            }
        };

        self.drain_inbound(Instant::now()).await;
        for mut network in std::mem::take(&mut self.networks) {
            network.disconnect(&self.events).await;
            self.events.emit(ManagerEvent::NetworkRemoved {
                network_id: network.id().to_string(),
            });
        }

        let count = configs.len();
        for mut config in configs {
            if self.index_of(&config.id).is_some() {
                config.id = uuid::Uuid::new_v4().to_string();
            }
            if config.bus_number <= 0 || self.bus_number_taken(config.bus_number, None) {
                let assigned = self.next_bus_number();
                tracing::warn!(
                    network_id = %config.id,
                    bus_number = config.bus_number,
                    assigned,
                    "Stored bus number invalid or duplicate, reassigned"
                );
                config.bus_number = assigned;
            }
            let id = config.id.clone();
            self.networks.push(Network::new(config));
            self.events.emit(ManagerEvent::NetworkAdded { network_id: id });
        }
        Ok(count)
    }

    /// Load stored profiles, or create the stock networks when configured and none exist
    pub async fn restore(&mut self) -> NetworkResult<usize> {
        let loaded = self.load_configuration(None).await?;
        if loaded == 0 && self.networks.is_empty() && self.settings.create_default_networks {
            return Ok(self.create_default_networks().len());
        }
        Ok(loaded)
    }

    // =========================================================================
    // Coordination
    // =========================================================================

    /// Apply queued inbound messages
    async fn drain_inbound(&mut self, now: Instant) {
        let budget = self.settings.inbound_queue_capacity.max(1);
        for _ in 0..budget {
            let Ok(msg) = self.inbound_rx.try_recv() else {
                break;
            };
            match self.networks.iter_mut().find(|n| n.id() == msg.network_id) {
                Some(network) => network.handle_inbound(msg, now, &self.events).await,
                None => tracing::trace!(network_id = %msg.network_id, "Inbound message for removed network"),
            }
        }
    }

    async fn run_reconnects(&mut self, now: Instant) {
        let due: Vec<String> = self
            .networks
            .iter()
            .filter(|n| n.reconnect_due(now))
            .map(|n| n.id().to_string())
            .collect();

        for id in due {
            let Some(index) = self.index_of(&id) else {
                continue;
            };
            let Some(key) = self.networks[index].reconnect_key() else {
                continue;
            };
            if let Some(holder) = self.holder_of(&key, Some(&id)) {
                let message = NetworkError::HardwareInUse(format!(
                    "{} is in use by network {}",
                    key, holder
                ))
                .to_string();
                self.networks[index].defer_retry(message, now, &self.events);
                continue;
            }

            let ctx = self.link_context();
            let network = &mut self.networks[index];
            if network.retry(&ctx, now).await.is_ok() {
                network.config_mut().last_hardware_key = key;
                self.autosave();
            }
        }
    }

    /// One coordination step: inbound traffic, due retries, periodic sends, startup sweep
    pub async fn tick(&mut self, now: Instant) {
        self.drain_inbound(now).await;
        self.run_reconnects(now).await;
        for network in &mut self.networks {
            network.run_periodic(now, &self.events).await;
        }
        if self.sweep_at.is_some_and(|at| now >= at) {
            self.sweep_at = None;
            self.auto_reconnect_sweep().await;
        }
    }

    /// Disconnect everything and save
    pub async fn shutdown(&mut self) {
        tracing::info!(networks = self.networks.len(), "Shutting down network manager");
        self.disconnect_all().await;
        self.autosave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canmux_core::{NoopDecoderLoader, Protocol};
    use canmux_transport::MockTransportProvider;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    const V0: &str = "virtual:virtual0";
    const V1: &str = "virtual:virtual1";

    fn manager(dir: &TempDir) -> (NetworkManager, MockTransportProvider) {
        let mock = MockTransportProvider::new();
        let catalog = Arc::new(HardwareCatalog::new(2, Duration::from_secs(1)));
        let manager = NetworkManager::new(
            ManagerSettings::ephemeral(dir.path().join("profiles.json")),
            catalog,
            Arc::new(mock.clone()),
            Arc::new(NoopDecoderLoader),
        );
        (manager, mock)
    }

    fn state_changes(rx: &mut broadcast::Receiver<ManagerEvent>, id: &str) -> Vec<ConnectionState> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ManagerEvent::ConnectionStateChanged { network_id, state } = event {
                if network_id == id {
                    out.push(state);
                }
            }
        }
        out
    }

    #[tokio::test]
    async fn test_bus_numbers_fill_gaps() {
        let dir = TempDir::new().unwrap();
        let (mut mgr, _mock) = manager(&dir);
        let a = mgr.create_network(NetworkConfig::named("A"));
        let _b = mgr.create_network(NetworkConfig::named("B"));
        let _c = mgr.create_network(NetworkConfig::named("C"));
        assert_eq!(mgr.bus_numbers(), vec![1, 2, 3]);

        assert!(mgr.remove_network(&a).await);
        let d = mgr.create_network(NetworkConfig::named("D").with_bus_number(2));
        assert_eq!(mgr.network(&d).unwrap().config().bus_number, 1);
        assert_eq!(mgr.bus_numbers(), vec![1, 2, 3]);
        assert_eq!(mgr.network_by_bus_number(1).unwrap().id(), d);
    }

    #[tokio::test]
    async fn test_duplicate_id_gets_fresh_one() {
        let dir = TempDir::new().unwrap();
        let (mut mgr, _mock) = manager(&dir);
        let config = NetworkConfig::named("A");
        let first = mgr.create_network(config.clone());
        let second = mgr.create_network(config);
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_hardware_exclusivity() {
        let dir = TempDir::new().unwrap();
        let (mut mgr, _mock) = manager(&dir);
        let a = mgr.create_network(NetworkConfig::named("A"));
        let b = mgr.create_network(NetworkConfig::named("B"));

        mgr.connect_network(&a, V0).await.unwrap();
        let result = mgr.connect_network(&b, V0).await;
        assert!(matches!(result, Err(NetworkError::HardwareInUse(_))));
        assert_eq!(mgr.network(&b).unwrap().state(), ConnectionState::Disconnected);

        // Same hardware again is a no-op, other hardware is refused while live
        mgr.connect_network(&a, V0).await.unwrap();
        let result = mgr.connect_network(&a, V1).await;
        assert!(matches!(result, Err(NetworkError::HardwareLocked(_))));

        mgr.disconnect_network(&a).await.unwrap();
        mgr.connect_network(&b, V0).await.unwrap();
        assert!(mgr.network(&b).unwrap().is_connected());
        assert_eq!(mgr.network(&b).unwrap().config().last_hardware_key, V0);
    }

    #[tokio::test]
    async fn test_connect_errors_emit_events() {
        let dir = TempDir::new().unwrap();
        let (mut mgr, _mock) = manager(&dir);
        let mut rx = mgr.subscribe();
        let a = mgr.create_network(NetworkConfig::named("A"));

        let result = mgr.connect_network(&a, "socketcan:can9").await;
        assert!(matches!(result, Err(NetworkError::HardwareNotFound(_))));
        let result = mgr.connect_network("nope", V0).await;
        assert!(matches!(result, Err(NetworkError::NetworkNotFound(_))));

        let errors: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|event| match event {
                ManagerEvent::Error { network_id, .. } => Some(network_id),
                _ => None,
            })
            .collect();
        assert_eq!(errors, vec![a, "nope".to_string()]);
    }

    #[tokio::test]
    async fn test_disconnect_idempotent() {
        let dir = TempDir::new().unwrap();
        let (mut mgr, mock) = manager(&dir);
        let a = mgr.create_network(NetworkConfig::named("A"));
        mgr.connect_network(&a, V0).await.unwrap();
        mgr.disconnect_network(&a).await.unwrap();
        mgr.disconnect_network(&a).await.unwrap();
        assert_eq!(mock.close_count(), 1);
        assert!(matches!(
            mgr.disconnect_network("nope").await,
            Err(NetworkError::NetworkNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_sequence() {
        let dir = TempDir::new().unwrap();
        let (mut mgr, mock) = manager(&dir);
        let mut rx = mgr.subscribe();
        let mut config = NetworkConfig::named("A");
        config.reconnect_delay_seconds = 1;
        let a = mgr.create_network(config);

        mock.fail_opens(1, "adapter busy");
        let t0 = Instant::now();
        let result = mgr.connect_network(&a, V0).await;
        assert!(matches!(result, Err(NetworkError::TransportOpenFailed(_))));

        mgr.tick(t0 + Duration::from_millis(999)).await;
        assert_eq!(mgr.network(&a).unwrap().state(), ConnectionState::Reconnecting);

        mgr.tick(t0 + Duration::from_secs(1)).await;
        assert_eq!(
            state_changes(&mut rx, &a),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Error,
                ConnectionState::Reconnecting,
                ConnectionState::Connecting,
                ConnectionState::Connected,
            ]
        );
        assert_eq!(mgr.network(&a).unwrap().config().last_hardware_key, V0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_deferred_while_hardware_held() {
        let dir = TempDir::new().unwrap();
        let (mut mgr, mock) = manager(&dir);
        let a = mgr.create_network(NetworkConfig::named("A"));
        let b = mgr.create_network(NetworkConfig::named("B"));

        mock.fail_opens(1, "adapter busy");
        let t0 = Instant::now();
        let _ = mgr.connect_network(&a, V0).await;
        // A is retrying, so B may take the hardware
        mgr.connect_network(&b, V0).await.unwrap();

        mgr.tick(t0 + Duration::from_secs(5)).await;
        assert_eq!(mgr.network(&a).unwrap().state(), ConnectionState::Reconnecting);
        assert!(mgr.network(&b).unwrap().is_connected());
        assert_eq!(mock.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_retry() {
        let dir = TempDir::new().unwrap();
        let (mut mgr, mock) = manager(&dir);
        let a = mgr.create_network(NetworkConfig::named("A"));
        mock.fail_opens(1, "adapter busy");
        let t0 = Instant::now();
        let _ = mgr.connect_network(&a, V0).await;
        mgr.disconnect_network(&a).await.unwrap();

        mgr.tick(t0 + Duration::from_secs(60)).await;
        assert_eq!(mgr.network(&a).unwrap().state(), ConnectionState::Disconnected);
        assert_eq!(mock.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sends() {
        let dir = TempDir::new().unwrap();
        let (mut mgr, mock) = manager(&dir);
        let a = mgr.create_network(NetworkConfig::named("A"));
        mgr.add_periodic_message(&a, PeriodicTask::new(0x321, vec![0xAA], 100, false))
            .unwrap();
        mgr.connect_network(&a, V0).await.unwrap();

        let t0 = Instant::now();
        for step in 0..=25 {
            mgr.tick(t0 + Duration::from_millis(step * 10)).await;
        }
        let sent = mock.sent(V0);
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|f| f.id == 0x321 && f.data == vec![0xAA]));
        assert_eq!(mgr.network_statistics(&a).unwrap().tx_count, 3);
    }

    #[tokio::test]
    async fn test_listen_only_rejects_send() {
        let dir = TempDir::new().unwrap();
        let (mut mgr, mock) = manager(&dir);
        let mut config = NetworkConfig::named("A");
        config.listen_only = true;
        let a = mgr.create_network(config);
        mgr.connect_network(&a, V0).await.unwrap();

        let result = mgr.send_message(&a, CanFrame::standard(0x100, vec![1])).await;
        assert!(matches!(result, Err(NetworkError::ListenOnlyViolation)));
        assert_eq!(mock.sent_count(), 0);
        assert_eq!(mgr.network_statistics(&a).unwrap().tx_count, 0);
    }

    #[tokio::test]
    async fn test_inbound_drained_before_disconnect() {
        let dir = TempDir::new().unwrap();
        let (mut mgr, mock) = manager(&dir);
        let a = mgr.create_network(NetworkConfig::named("A"));
        mgr.connect_network(&a, V0).await.unwrap();
        let mut rx = mgr.subscribe();

        assert!(mock.inject(V0, CanFrame::standard(0x10, vec![1])));
        mgr.disconnect_network(&a).await.unwrap();

        let received = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|event| matches!(event, ManagerEvent::FrameReceived(_)))
            .count();
        assert_eq!(received, 1);
    }

    #[tokio::test]
    async fn test_broadcast_skips_excluded_and_listen_only() {
        let dir = TempDir::new().unwrap();
        let (mut mgr, mock) = manager(&dir);
        let a = mgr.create_network(NetworkConfig::named("A"));
        let b = mgr.create_network(NetworkConfig::named("B"));
        let mut quiet = NetworkConfig::named("C");
        quiet.listen_only = true;
        let c = mgr.create_network(quiet);
        let _idle = mgr.create_network(NetworkConfig::named("D"));

        mgr.refresh_hardware().await;
        mgr.connect_network(&a, V0).await.unwrap();
        mgr.connect_network(&b, V1).await.unwrap();
        mgr.apply_hardware(vec![
            HardwareDescriptor::virtual_channel(0),
            HardwareDescriptor::virtual_channel(1),
            HardwareDescriptor::virtual_channel(2),
        ])
        .await;
        mgr.connect_network(&c, "virtual:virtual2").await.unwrap();

        let sent = mgr
            .broadcast_message(CanFrame::standard(0x7DF, vec![2, 1, 0]), &[b.clone()])
            .await;
        assert_eq!(sent, 1);
        assert_eq!(mock.sent(V0).len(), 1);
        assert!(mock.sent(V1).is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let (mut mgr, _mock) = manager(&dir);

        let powertrain = NetworkConfig {
            description: "Engine and gearbox".to_string(),
            bitrate: 250_000,
            sample_point: 0.875,
            protocol: Protocol::Can20A,
            reconnect_delay_seconds: 2,
            symbol_file_path: "/opt/dbc/powertrain.yaml".to_string(),
            ..NetworkConfig::named("Powertrain")
        };
        let body = NetworkConfig {
            description: "Doors and lights".to_string(),
            bitrate: 125_000,
            sample_point: 0.6,
            listen_only: true,
            enable_error_frames: false,
            auto_reconnect: false,
            message_filters: vec![serde_json::json!({"id": 0x200, "mask": 0x7F0})],
            last_hardware_key: "socketcan:can1".to_string(),
            ..NetworkConfig::named("Body").with_bus_number(7)
        };
        let chassis = NetworkConfig {
            bitrate: 1_000_000,
            protocol: Protocol::CanFd,
            reconnect_delay_seconds: 30,
            ..NetworkConfig::named("Chassis")
        };
        let ids = [
            mgr.create_network(powertrain),
            mgr.create_network(body),
            mgr.create_network(chassis),
        ];
        mgr.connect_network(&ids[0], V0).await.unwrap();
        mgr.save_configuration(None).unwrap();
        let originals: Vec<NetworkConfig> =
            ids.iter().map(|id| mgr.network(id).unwrap().config().clone()).collect();
        assert_eq!(originals[0].last_hardware_key, V0);
        assert_eq!(originals[1].bus_number, 7);

        let (mut fresh, _mock) = manager(&dir);
        assert_eq!(fresh.load_configuration(None).await.unwrap(), 3);
        for original in &originals {
            assert_eq!(fresh.network(&original.id).unwrap().config(), original);
        }
        assert_eq!(fresh.bus_numbers(), vec![1, 2, 7]);
        assert!(fresh.networks().all(|n| n.state() == ConnectionState::Disconnected));
    }

    #[tokio::test]
    async fn test_load_reassigns_duplicate_bus_numbers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dupes.json");
        std::fs::write(
            &path,
            r#"{"x": {"name": "X", "busNumber": 2}, "y": {"name": "Y", "busNumber": 2}}"#,
        )
        .unwrap();

        let (mut mgr, _mock) = manager(&dir);
        assert_eq!(mgr.load_configuration(Some(&path)).await.unwrap(), 2);
        assert_eq!(mgr.bus_numbers(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_missing_profile_file_keeps_networks() {
        let dir = TempDir::new().unwrap();
        let (mut mgr, _mock) = manager(&dir);
        mgr.create_network(NetworkConfig::named("A"));
        assert_eq!(mgr.load_configuration(None).await.unwrap(), 0);
        assert_eq!(mgr.networks().count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_sweep_reconnects_last_hardware() {
        let dir = TempDir::new().unwrap();
        let (mut mgr, mock) = manager(&dir);
        let mut config = NetworkConfig::named("A");
        config.last_hardware_key = V1.to_string();
        let a = mgr.create_network(config);
        let mut gone = NetworkConfig::named("B");
        gone.last_hardware_key = "socketcan:can0".to_string();
        let b = mgr.create_network(gone);

        let t0 = Instant::now();
        mgr.tick(t0 + Duration::from_millis(1999)).await;
        assert_eq!(mock.open_count(), 0);
        mgr.tick(t0 + Duration::from_secs(2)).await;
        assert!(mgr.network(&a).unwrap().is_connected());
        assert_eq!(mgr.network(&b).unwrap().state(), ConnectionState::Disconnected);
        assert_eq!(mock.open_count(), 1);
    }

    #[tokio::test]
    async fn test_global_statistics() {
        let dir = TempDir::new().unwrap();
        let (mut mgr, mock) = manager(&dir);
        let a = mgr.create_network(NetworkConfig::named("A"));
        mgr.create_network(NetworkConfig::named("B"));
        mgr.connect_network(&a, V0).await.unwrap();
        mgr.send_message(&a, CanFrame::standard(0x1, vec![])).await.unwrap();
        mock.inject(V0, CanFrame::standard(0x2, vec![]));
        mgr.tick(Instant::now()).await;

        let stats = mgr.global_statistics();
        assert_eq!(stats.total_networks, 2);
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.total_tx, 1);
        assert_eq!(stats.total_rx, 1);
        assert_eq!(stats.total_messages, 2);
    }

    #[tokio::test]
    async fn test_default_networks() {
        let dir = TempDir::new().unwrap();
        let (mut mgr, _mock) = manager(&dir);
        let ids = mgr.create_default_networks();
        assert_eq!(ids.len(), 3);
        assert_eq!(mgr.network_by_bus_number(3).unwrap().config().bitrate, 125_000);
    }
}
