//! Hardware discovery
//!
//! [`HardwareCatalog::refresh`] synthesizes the virtual channels, then runs
//! every registered [`DiscoveryBackend`] concurrently. Each backend runs on
//! its own OS thread and is raced against the configured budget; a backend
//! that fails, panics or never returns contributes nothing and the refresh
//! still completes.
//!
//! A backend has at most one enumeration thread. When the previous one is
//! still running, the next refresh waits on it within the budget instead of
//! starting another.

mod sysfs;

pub use sysfs::SysfsSocketCanBackend;

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::oneshot;

use canmux_core::{DiscoveryError, HardwareDescriptor, HardwareKind};

use crate::settings::DiscoverySettings;
use crate::vendor::VendorSdkBackend;

/// One family of adapters that can be enumerated
///
/// `enumerate` may block; it is always called off the async runtime.
pub trait DiscoveryBackend: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn enumerate(&self) -> Result<Vec<HardwareDescriptor>, DiscoveryError>;
}

/// Summary of the latest refresh
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiscoveryReport {
    pub total: usize,
    pub available: usize,
    pub by_kind: BTreeMap<String, usize>,
    /// Backends that produced no results, with the reason
    pub failures: Vec<String>,
    pub hardware: Vec<HardwareDescriptor>,
}

/// Enumerates available hardware
pub struct HardwareCatalog {
    virtual_channels: usize,
    backend_timeout: Duration,
    backends: Vec<BackendSlot>,
    last: RwLock<Vec<HardwareDescriptor>>,
    last_failures: RwLock<Vec<String>>,
}

impl HardwareCatalog {
    /// Catalog with only virtual channels
    pub fn new(virtual_channels: usize, backend_timeout: Duration) -> Self {
        Self {
            virtual_channels,
            backend_timeout,
            backends: Vec::new(),
            last: RwLock::new(Vec::new()),
            last_failures: RwLock::new(Vec::new()),
        }
    }

    /// Catalog with the backends enabled in `settings`
    pub fn from_settings(settings: &DiscoverySettings) -> Self {
        let mut catalog = Self::new(settings.virtual_channels, settings.backend_timeout());
        if settings.enable_socketcan {
            catalog = catalog.with_backend(SysfsSocketCanBackend::new(&settings.sysfs_net_root));
        }
        if settings.enable_vendor_sdks {
            for backend in VendorSdkBackend::all() {
                catalog = catalog.with_backend(backend);
            }
        }
        catalog
    }

    pub fn with_backend(mut self, backend: impl DiscoveryBackend) -> Self {
        self.backends.push(BackendSlot::new(Arc::new(backend)));
        self
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.backend.name().to_string()).collect()
    }

    /// Enumerate all hardware
    ///
    /// Virtual channels come first. Duplicate keys are dropped, first seen
    /// wins. Never fails; backend errors are logged and swallowed.
    pub async fn refresh(&self) -> Vec<HardwareDescriptor> {
        let mut hardware = self.virtual_hardware();

        let runs = self
            .backends
            .iter()
            .map(|slot| slot.run(self.backend_timeout));
        let results = futures::future::join_all(runs).await;

        let mut failures = Vec::new();
        let mut seen: HashSet<String> = hardware.iter().map(|hw| hw.key()).collect();
        for (slot, result) in self.backends.iter().zip(results) {
            let backend = &slot.backend;
            match result {
                Ok(found) => {
                    tracing::debug!(backend = backend.name(), count = found.len(), "Backend enumerated");
                    for hw in found {
                        if seen.insert(hw.key()) {
                            hardware.push(hw);
                        } else {
                            tracing::debug!(hardware_key = %hw.key(), "Duplicate hardware key ignored");
                        }
                    }
                }
                Err(e @ DiscoveryError::Unavailable { .. }) => {
                    tracing::debug!(backend = backend.name(), error = %e, "Backend unavailable");
                    failures.push(e.to_string());
                }
                Err(e) => {
                    tracing::warn!(backend = backend.name(), error = %e, "Hardware discovery backend failed");
                    failures.push(e.to_string());
                }
            }
        }

        tracing::info!(
            total = hardware.len(),
            available = hardware.iter().filter(|hw| hw.available).count(),
            "Hardware discovery complete"
        );

        *self.last.write() = hardware.clone();
        *self.last_failures.write() = failures;
        hardware
    }

    /// The synthesized virtual channels; needs no enumeration
    pub fn virtual_hardware(&self) -> Vec<HardwareDescriptor> {
        (0..self.virtual_channels)
            .map(HardwareDescriptor::virtual_channel)
            .collect()
    }

    /// Hardware from the latest refresh
    pub fn hardware(&self) -> Vec<HardwareDescriptor> {
        self.last.read().clone()
    }

    pub fn by_kind(&self, kind: HardwareKind) -> Vec<HardwareDescriptor> {
        self.last
            .read()
            .iter()
            .filter(|hw| hw.kind == kind)
            .cloned()
            .collect()
    }

    pub fn available(&self) -> Vec<HardwareDescriptor> {
        self.last
            .read()
            .iter()
            .filter(|hw| hw.available)
            .cloned()
            .collect()
    }

    /// First virtual channel plus the first available channel of each physical kind
    pub fn recommended(&self) -> Vec<HardwareDescriptor> {
        let last = self.last.read();
        HardwareKind::ALL
            .iter()
            .filter_map(|kind| {
                last.iter()
                    .find(|hw| hw.kind == *kind && hw.available)
                    .cloned()
            })
            .collect()
    }

    pub fn report(&self) -> DiscoveryReport {
        let hardware = self.hardware();
        let mut by_kind = BTreeMap::new();
        for hw in &hardware {
            *by_kind.entry(hw.kind.to_string()).or_insert(0) += 1;
        }
        DiscoveryReport {
            total: hardware.len(),
            available: hardware.iter().filter(|hw| hw.available).count(),
            by_kind,
            failures: self.last_failures.read().clone(),
            hardware,
        }
    }
}

type Enumeration = Result<Vec<HardwareDescriptor>, DiscoveryError>;

/// A registered backend and its enumeration thread, if one is running
struct BackendSlot {
    backend: Arc<dyn DiscoveryBackend>,
    /// Set while an enumeration thread is alive, cleared by the thread
    running: Arc<AtomicBool>,
    /// Result channel of an enumeration that outlived its budget
    pending: Mutex<Option<oneshot::Receiver<Enumeration>>>,
}

/// Clears the running flag when the enumeration thread ends, panics included
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl BackendSlot {
    fn new(backend: Arc<dyn DiscoveryBackend>) -> Self {
        Self {
            backend,
            running: Arc::new(AtomicBool::new(false)),
            pending: Mutex::new(None),
        }
    }

    /// Enumerate, bounded by `budget`
    ///
    /// The thread is never joined. If it outlives the budget its receiver is
    /// kept, and the next call waits on it rather than spawning again.
    async fn run(&self, budget: Duration) -> Enumeration {
        let name = self.backend.name().to_string();
        let pending = self.pending.lock().take();
        let mut rx = match pending {
            Some(rx) => {
                tracing::debug!(backend = %name, "Previous enumeration still running, waiting on it");
                rx
            }
            // Another refresh is waiting on the running thread
            None if self.running.load(Ordering::Acquire) => {
                return Err(DiscoveryError::Backend {
                    backend: name,
                    reason: "previous enumeration still running".to_string(),
                });
            }
            None => self.start(&name)?,
        };

        match tokio::time::timeout(budget, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DiscoveryError::Backend {
                backend: name,
                reason: "discovery thread exited without a result".to_string(),
            }),
            Err(_) => {
                *self.pending.lock() = Some(rx);
                Err(DiscoveryError::Timeout {
                    backend: name,
                    budget_ms: budget.as_millis() as u64,
                })
            }
        }
    }

    fn start(&self, name: &str) -> Result<oneshot::Receiver<Enumeration>, DiscoveryError> {
        let (tx, rx) = oneshot::channel();
        let backend = self.backend.clone();
        self.running.store(true, Ordering::Release);
        let guard = RunningGuard(self.running.clone());
        std::thread::Builder::new()
            .name(format!("discovery-{}", name.to_lowercase()))
            .spawn(move || {
                // Slot is free again before the result is visible
                let result = {
                    let _guard = guard;
                    backend.enumerate()
                };
                let _ = tx.send(result);
            })
            .map_err(|e| DiscoveryError::Backend {
                backend: name.to_string(),
                reason: format!("failed to start discovery thread: {}", e),
            })?;
        Ok(rx)
    }
}
