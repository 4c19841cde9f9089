//! canmuxd - CAN network manager daemon
//!
//! Runs a [`NetworkManager`] with the real transport backends, restores the
//! stored network profiles and keeps them connected until Ctrl-C.
//!
//! Usage:
//!   canmuxd [OPTIONS] [config.toml]
//!
//! With no config file, defaults are used: four virtual channels, SocketCAN
//! discovery through sysfs and profiles in `network_profiles.json`.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use canmux::{ManagerEvent, ManagerHandle, ManagerRuntime, NetworkManager};
use canmux_signals::FileDecoderLoader;
use canmux_transport::{BackendTransportProvider, HardwareCatalog};

use crate::config::DaemonConfig;

#[derive(Parser)]
#[command(name = "canmuxd")]
#[command(author, version, about = "Multi-network CAN bus manager daemon")]
struct Args {
    /// Daemon config file (TOML)
    #[arg(default_value = "canmuxd.toml")]
    config: PathBuf,

    /// Network profile file, overrides `manager.profiles_path`
    #[arg(short, long, env = "CANMUX_PROFILES")]
    profiles: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Create the stock networks when no profile file exists
    #[arg(long)]
    default_networks: bool,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "canmuxd=info,canmux=info,canmux_transport=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_json);

    tracing::info!("Starting canmuxd (CAN network manager)");

    let mut config = DaemonConfig::load(&args.config)?;
    if let Some(profiles) = args.profiles {
        config.manager.profiles_path = profiles;
    }
    if args.default_networks {
        config.manager.create_default_networks = true;
    }

    let catalog = Arc::new(HardwareCatalog::from_settings(&config.discovery));
    tracing::info!(
        backends = ?catalog.backend_names(),
        virtual_channels = config.discovery.virtual_channels,
        "Hardware discovery configured"
    );
    let provider = Arc::new(BackendTransportProvider::new(config.virtual_bus.clone()));

    let mut manager = NetworkManager::new(
        config.manager.clone(),
        catalog,
        provider,
        Arc::new(FileDecoderLoader),
    );
    let restored = manager
        .restore()
        .await
        .with_context(|| format!("Failed to load {}", config.manager.profiles_path.display()))?;
    tracing::info!(
        networks = restored,
        profiles = %config.manager.profiles_path.display(),
        "Network profiles restored"
    );

    let (handle, task) = ManagerRuntime::spawn(manager);
    let logger = tokio::spawn(log_events(handle.subscribe()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested");

    report_statistics(&handle).await;
    handle.shutdown().await?;
    task.await?;
    logger.abort();

    tracing::info!("canmuxd stopped");
    Ok(())
}

async fn report_statistics(handle: &ManagerHandle) {
    match handle.global_statistics().await {
        Ok(stats) => tracing::info!(
            networks = stats.total_networks,
            active = stats.active_connections,
            messages = stats.total_messages,
            tx = stats.total_tx,
            rx = stats.total_rx,
            errors = stats.total_errors,
            uptime_secs = stats.uptime_secs,
            "Final statistics"
        ),
        Err(e) => tracing::warn!(error = %e, "Statistics unavailable"),
    }
}

/// Mirror manager events into the log
async fn log_events(mut events: broadcast::Receiver<ManagerEvent>) {
    loop {
        match events.recv().await {
            Ok(ManagerEvent::NetworkAdded { network_id }) => {
                tracing::info!(network_id = %network_id, "Network added");
            }
            Ok(ManagerEvent::NetworkRemoved { network_id }) => {
                tracing::info!(network_id = %network_id, "Network removed");
            }
            Ok(ManagerEvent::ConnectionStateChanged { network_id, state }) => {
                tracing::info!(network_id = %network_id, state = %state, "Connection state");
            }
            Ok(ManagerEvent::FrameReceived(record)) | Ok(ManagerEvent::FrameTransmitted(record)) => {
                tracing::trace!(
                    network_id = %record.network_id,
                    bus = record.bus_number,
                    direction = ?record.direction,
                    frame_id = format_args!("0x{:X}", record.frame.id),
                    data = %hex::encode(&record.frame.data),
                    "Frame"
                );
            }
            Ok(ManagerEvent::Error { network_id, message }) => {
                // Already logged at warn where it was raised
                tracing::debug!(network_id = %network_id, message = %message, "Error event");
            }
            Ok(ManagerEvent::HardwareDiscovered { hardware }) => {
                tracing::debug!(
                    total = hardware.len(),
                    available = hardware.iter().filter(|hw| hw.available).count(),
                    "Hardware snapshot updated"
                );
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Event logger lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
