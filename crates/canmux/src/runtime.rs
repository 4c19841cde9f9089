//! Coordinating task
//!
//! [`ManagerRuntime::spawn`] moves a [`NetworkManager`] onto its own task.
//! That task is the only place the manager is mutated: it serves commands
//! from [`ManagerHandle`]s, ticks the manager on a fixed interval and
//! refreshes hardware in the background.
//!
//! ```ignore
//! let (handle, task) = ManagerRuntime::spawn(manager);
//! let id = handle.create_network(NetworkConfig::named("Powertrain")).await?;
//! handle.connect_network(&id, "virtual:virtual0").await?;
//! handle.shutdown().await?;
//! task.await?;
//! ```

use futures::future::BoxFuture;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use canmux_core::{
    CanFrame, ConnectionStatistics, DecodedSignals, GlobalStatistics, HardwareDescriptor,
    HardwareKind, NetworkConfig, NetworkError, NetworkResult,
};

use crate::events::{EventBus, ManagerEvent};
use crate::manager::NetworkManager;
use crate::network::NetworkSummary;
use crate::scheduler::PeriodicTask;

const COMMAND_CAPACITY: usize = 64;

type Job = Box<dyn for<'a> FnOnce(&'a mut NetworkManager) -> BoxFuture<'a, ()> + Send>;

enum Command {
    Run(Job),
    RefreshHardware(oneshot::Sender<Vec<HardwareDescriptor>>),
    Shutdown(oneshot::Sender<()>),
}

fn job<F>(f: F) -> Job
where
    F: for<'a> FnOnce(&'a mut NetworkManager) -> BoxFuture<'a, ()> + Send + 'static,
{
    Box::new(f)
}

pub struct ManagerRuntime;

impl ManagerRuntime {
    /// Start the coordinating task
    ///
    /// The task ends after [`ManagerHandle::shutdown`] or once every handle
    /// is dropped; either way the manager disconnects all networks first.
    pub fn spawn(manager: NetworkManager) -> (ManagerHandle, JoinHandle<()>) {
        let (commands, rx) = mpsc::channel(COMMAND_CAPACITY);
        let handle = ManagerHandle {
            commands,
            events: manager.events().clone(),
        };
        let task = tokio::spawn(run(manager, rx));
        (handle, task)
    }
}

fn spawn_refresh(manager: &NetworkManager) -> JoinHandle<Vec<HardwareDescriptor>> {
    let catalog = manager.catalog();
    tokio::spawn(async move { catalog.refresh().await })
}

async fn wait_refresh(
    task: &mut Option<JoinHandle<Vec<HardwareDescriptor>>>,
) -> Result<Vec<HardwareDescriptor>, tokio::task::JoinError> {
    match task {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}

async fn run(mut manager: NetworkManager, mut commands: mpsc::Receiver<Command>) {
    let mut tick = tokio::time::interval(manager.settings().tick_interval());
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut refresh = tokio::time::interval(manager.settings().hardware_refresh_interval());
    refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut pending_refresh: Option<JoinHandle<Vec<HardwareDescriptor>>> = None;
    let mut refresh_waiters: Vec<oneshot::Sender<Vec<HardwareDescriptor>>> = Vec::new();
    let mut shutdown_reply = None;

    tracing::info!("Network manager runtime started");

    loop {
        tokio::select! {
            _ = tick.tick() => {
                manager.tick(Instant::now()).await;
            }
            _ = refresh.tick(), if pending_refresh.is_none() => {
                pending_refresh = Some(spawn_refresh(&manager));
            }
            result = wait_refresh(&mut pending_refresh) => {
                pending_refresh = None;
                let hardware = match result {
                    Ok(hardware) => {
                        manager.apply_hardware(hardware.clone()).await;
                        hardware
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Hardware refresh task failed");
                        manager.hardware_snapshot().iter().cloned().collect()
                    }
                };
                for waiter in refresh_waiters.drain(..) {
                    let _ = waiter.send(hardware.clone());
                }
            }
            command = commands.recv() => match command {
                Some(Command::Run(job)) => job(&mut manager).await,
                Some(Command::RefreshHardware(reply)) => {
                    refresh_waiters.push(reply);
                    if pending_refresh.is_none() {
                        pending_refresh = Some(spawn_refresh(&manager));
                    }
                }
                Some(Command::Shutdown(reply)) => {
                    shutdown_reply = Some(reply);
                    break;
                }
                None => break,
            },
        }
    }

    if let Some(task) = pending_refresh.take() {
        task.abort();
    }
    manager.shutdown().await;
    if let Some(reply) = shutdown_reply {
        let _ = reply.send(());
    }
    tracing::info!("Network manager runtime stopped");
}

/// Cloneable handle to a running manager
///
/// Every call is served in order by the coordinating task. Once that task
/// has stopped, calls fail with [`NetworkError::RuntimeStopped`].
#[derive(Clone)]
pub struct ManagerHandle {
    commands: mpsc::Sender<Command>,
    events: EventBus,
}

impl ManagerHandle {
    async fn call<R, F>(&self, f: F) -> NetworkResult<R>
    where
        R: Send + 'static,
        F: for<'a> FnOnce(&'a mut NetworkManager) -> BoxFuture<'a, R> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = job(move |manager| {
            Box::pin(async move {
                let _ = reply_tx.send(f(manager).await);
            })
        });
        self.commands
            .send(Command::Run(job))
            .await
            .map_err(|_| NetworkError::RuntimeStopped)?;
        reply_rx.await.map_err(|_| NetworkError::RuntimeStopped)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    pub async fn create_network(&self, config: NetworkConfig) -> NetworkResult<String> {
        self.call(move |m| Box::pin(async move { m.create_network(config) }))
            .await
    }

    pub async fn update_network(&self, network_id: &str, config: NetworkConfig) -> NetworkResult<()> {
        let id = network_id.to_string();
        self.call(move |m| Box::pin(async move { m.update_network(&id, config) }))
            .await?
    }

    pub async fn remove_network(&self, network_id: &str) -> NetworkResult<bool> {
        let id = network_id.to_string();
        self.call(move |m| Box::pin(async move { m.remove_network(&id).await }))
            .await
    }

    pub async fn create_default_networks(&self) -> NetworkResult<Vec<String>> {
        self.call(|m| Box::pin(async move { m.create_default_networks() }))
            .await
    }

    pub async fn network(&self, network_id: &str) -> NetworkResult<Option<NetworkSummary>> {
        let id = network_id.to_string();
        self.call(move |m| Box::pin(async move { m.network(&id).map(|n| n.summary()) }))
            .await
    }

    pub async fn networks(&self) -> NetworkResult<Vec<NetworkSummary>> {
        self.call(|m| Box::pin(async move { m.summaries() })).await
    }

    pub async fn network_by_bus_number(&self, bus_number: i32) -> NetworkResult<Option<NetworkSummary>> {
        self.call(move |m| {
            Box::pin(async move { m.network_by_bus_number(bus_number).map(|n| n.summary()) })
        })
        .await
    }

    pub async fn bus_numbers(&self) -> NetworkResult<Vec<i32>> {
        self.call(|m| Box::pin(async move { m.bus_numbers() })).await
    }

    pub async fn connect_network(&self, network_id: &str, hardware_key: &str) -> NetworkResult<()> {
        let (id, key) = (network_id.to_string(), hardware_key.to_string());
        self.call(move |m| Box::pin(async move { m.connect_network(&id, &key).await }))
            .await?
    }

    pub async fn disconnect_network(&self, network_id: &str) -> NetworkResult<()> {
        let id = network_id.to_string();
        self.call(move |m| Box::pin(async move { m.disconnect_network(&id).await }))
            .await?
    }

    pub async fn connect_all(&self) -> NetworkResult<usize> {
        self.call(|m| Box::pin(async move { m.connect_all().await }))
            .await
    }

    pub async fn disconnect_all(&self) -> NetworkResult<()> {
        self.call(|m| Box::pin(async move { m.disconnect_all().await }))
            .await
    }

    pub async fn auto_reconnect_sweep(&self) -> NetworkResult<usize> {
        self.call(|m| Box::pin(async move { m.auto_reconnect_sweep().await }))
            .await
    }

    /// Enumerate hardware now; joins a refresh already in progress
    pub async fn refresh_hardware(&self) -> NetworkResult<Vec<HardwareDescriptor>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::RefreshHardware(reply_tx))
            .await
            .map_err(|_| NetworkError::RuntimeStopped)?;
        reply_rx.await.map_err(|_| NetworkError::RuntimeStopped)
    }

    pub async fn available_hardware(&self) -> NetworkResult<Vec<HardwareDescriptor>> {
        self.call(|m| Box::pin(async move { m.available_hardware() }))
            .await
    }

    pub async fn hardware_for_kind(&self, kind: HardwareKind) -> NetworkResult<Vec<HardwareDescriptor>> {
        self.call(move |m| Box::pin(async move { m.hardware_for_kind(kind) }))
            .await
    }

    pub async fn send_message(&self, network_id: &str, frame: CanFrame) -> NetworkResult<()> {
        let id = network_id.to_string();
        self.call(move |m| Box::pin(async move { m.send_message(&id, frame).await }))
            .await?
    }

    pub async fn broadcast_message(&self, frame: CanFrame, exclude: Vec<String>) -> NetworkResult<usize> {
        self.call(move |m| Box::pin(async move { m.broadcast_message(frame, &exclude).await }))
            .await
    }

    pub async fn add_periodic_message(&self, network_id: &str, task: PeriodicTask) -> NetworkResult<()> {
        let id = network_id.to_string();
        self.call(move |m| Box::pin(async move { m.add_periodic_message(&id, task) }))
            .await?
    }

    pub async fn remove_periodic_message(&self, network_id: &str, frame_id: u32) -> NetworkResult<bool> {
        let id = network_id.to_string();
        self.call(move |m| Box::pin(async move { m.remove_periodic_message(&id, frame_id) }))
            .await?
    }

    pub async fn set_periodic_enabled(
        &self,
        network_id: &str,
        frame_id: u32,
        enabled: bool,
    ) -> NetworkResult<bool> {
        let id = network_id.to_string();
        self.call(move |m| {
            Box::pin(async move { m.set_periodic_enabled(&id, frame_id, enabled) })
        })
        .await?
    }

    pub async fn set_symbol_file(&self, network_id: &str, path: &str) -> NetworkResult<bool> {
        let (id, path) = (network_id.to_string(), path.to_string());
        self.call(move |m| Box::pin(async move { m.set_symbol_file(&id, &path) }))
            .await?
    }

    pub async fn decode(&self, network_id: &str, frame_id: u32, payload: Vec<u8>) -> NetworkResult<DecodedSignals> {
        let id = network_id.to_string();
        self.call(move |m| Box::pin(async move { m.decode(&id, frame_id, &payload) }))
            .await?
    }

    pub async fn network_statistics(&self, network_id: &str) -> NetworkResult<ConnectionStatistics> {
        let id = network_id.to_string();
        self.call(move |m| Box::pin(async move { m.network_statistics(&id) }))
            .await?
    }

    pub async fn global_statistics(&self) -> NetworkResult<GlobalStatistics> {
        self.call(|m| Box::pin(async move { m.global_statistics() }))
            .await
    }

    pub async fn save_configuration(&self, path: Option<std::path::PathBuf>) -> NetworkResult<()> {
        self.call(move |m| Box::pin(async move { m.save_configuration(path.as_deref()) }))
            .await?
    }

    pub async fn load_configuration(&self, path: Option<std::path::PathBuf>) -> NetworkResult<usize> {
        self.call(move |m| Box::pin(async move { m.load_configuration(path.as_deref()).await }))
            .await?
    }

    /// Stop the coordinating task after disconnecting everything
    pub async fn shutdown(&self) -> NetworkResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Shutdown(reply_tx))
            .await
            .map_err(|_| NetworkError::RuntimeStopped)?;
        reply_rx.await.map_err(|_| NetworkError::RuntimeStopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ManagerSettings;
    use canmux_core::{ConnectionState, NoopDecoderLoader};
    use canmux_transport::{HardwareCatalog, MockTransportProvider};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn spawn(dir: &TempDir) -> (ManagerHandle, JoinHandle<()>, MockTransportProvider) {
        let mock = MockTransportProvider::new();
        let manager = NetworkManager::new(
            ManagerSettings::ephemeral(dir.path().join("profiles.json")),
            Arc::new(HardwareCatalog::new(2, Duration::from_secs(1))),
            Arc::new(mock.clone()),
            Arc::new(NoopDecoderLoader),
        );
        let (handle, task) = ManagerRuntime::spawn(manager);
        (handle, task, mock)
    }

    #[tokio::test]
    async fn test_commands_round_trip() {
        let dir = TempDir::new().unwrap();
        let (handle, task, mock) = spawn(&dir);

        let id = handle.create_network(NetworkConfig::named("A")).await.unwrap();
        handle.connect_network(&id, "virtual:virtual0").await.unwrap();
        handle
            .send_message(&id, CanFrame::standard(0x123, vec![1, 2, 3]))
            .await
            .unwrap();

        let summary = handle.network(&id).await.unwrap().unwrap();
        assert_eq!(summary.state, ConnectionState::Connected);
        assert_eq!(summary.statistics.tx_count, 1);
        assert_eq!(mock.sent("virtual:virtual0").len(), 1);
        assert_eq!(handle.bus_numbers().await.unwrap(), vec![1]);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(!mock.is_open("virtual:virtual0"));
    }

    #[tokio::test]
    async fn test_stopped_runtime_reports_error() {
        let dir = TempDir::new().unwrap();
        let (handle, task, _mock) = spawn(&dir);
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert!(!handle.is_running());
        assert!(matches!(
            handle.create_network(NetworkConfig::named("A")).await,
            Err(NetworkError::RuntimeStopped)
        ));
    }

    #[tokio::test]
    async fn test_refresh_and_events() {
        let dir = TempDir::new().unwrap();
        let (handle, task, _mock) = spawn(&dir);
        let mut events = handle.subscribe();

        let hardware = handle.refresh_hardware().await.unwrap();
        assert_eq!(hardware.len(), 2);
        assert_eq!(handle.available_hardware().await.unwrap().len(), 2);

        let discovered = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(ManagerEvent::HardwareDiscovered { hardware }) = events.recv().await {
                    return hardware;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(discovered.len(), 2);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_inbound_frames_applied_by_tick() {
        let dir = TempDir::new().unwrap();
        let (handle, task, mock) = spawn(&dir);
        let id = handle.create_network(NetworkConfig::named("A")).await.unwrap();
        handle.connect_network(&id, "virtual:virtual1").await.unwrap();

        assert!(mock.inject("virtual:virtual1", CanFrame::standard(0x42, vec![9])));
        tokio::time::sleep(Duration::from_millis(300)).await;

        let stats = handle.network_statistics(&id).await.unwrap();
        assert_eq!(stats.rx_count, 1);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }
}
