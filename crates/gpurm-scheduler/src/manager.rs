//! GPU resource manager
//!
//! Combines the stateless telemetry and scoring aspects with the stateful
//! reservation ledger. Allocation runs "read telemetry, subtract pledges,
//! score, reserve" as one serialized step so concurrent callers never pledge
//! the same free memory twice.

use gpurm_core::{
    AllocatorConfig, CleanupReport, DeviceSnapshot, GpurmError, GpurmResult, HostUsage,
    SystemMemoryUsage,
};
use gpurm_runtime::{ComputeBackend, HostMonitor, TelemetryBackend};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::registry::DeviceRegistry;
use crate::reservation::{Reservation, ReservationLedger};
use crate::scorer::{AllocationScorer, ScoringWeights};
use crate::telemetry::DeviceTelemetryProvider;

type SharedLedger = Arc<Mutex<ReservationLedger>>;

fn lock_ledger(ledger: &Mutex<ReservationLedger>) -> MutexGuard<'_, ReservationLedger> {
    // Ledger updates are single operations, so a poisoned lock is still consistent
    ledger.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Allocation outcomes since startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AllocationCounters {
    pub granted: u64,
    pub rejected: u64,
}

/// Orchestrates device selection, reservations and cleanup
pub struct GpuResourceManager {
    registry: DeviceRegistry,
    telemetry: DeviceTelemetryProvider,
    compute: Arc<dyn ComputeBackend>,
    host: Arc<dyn HostMonitor>,
    scorer: AllocationScorer,
    default_request_mb: u64,
    ledger: SharedLedger,
    /// Serializes the read-score-reserve sequence
    allocation_lock: tokio::sync::Mutex<()>,
    granted: AtomicU64,
    rejected: AtomicU64,
}

impl GpuResourceManager {
    /// Create a manager over an already discovered registry
    pub fn new(
        registry: DeviceRegistry,
        telemetry: DeviceTelemetryProvider,
        compute: Arc<dyn ComputeBackend>,
        host: Arc<dyn HostMonitor>,
        config: &AllocatorConfig,
    ) -> Self {
        info!(
            devices = registry.device_count(),
            utilization_weight = config.utilization_weight,
            memory_weight = config.memory_weight,
            "GPU resource manager initialized"
        );

        Self {
            registry,
            telemetry,
            compute,
            host,
            scorer: AllocationScorer::new(ScoringWeights::from(config)),
            default_request_mb: config.min_memory_available_mb,
            ledger: Arc::new(Mutex::new(ReservationLedger::new())),
            allocation_lock: tokio::sync::Mutex::new(()),
            granted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Discover devices through `telemetry` and build a manager
    ///
    /// Fails with `NoDeviceFound` when no accelerator is present.
    pub async fn start(
        telemetry: Arc<dyn TelemetryBackend>,
        compute: Arc<dyn ComputeBackend>,
        host: Arc<dyn HostMonitor>,
        config: &AllocatorConfig,
    ) -> GpurmResult<Self> {
        let registry = DeviceRegistry::discover(telemetry.as_ref()).await?;
        Ok(Self::new(
            registry,
            DeviceTelemetryProvider::new(telemetry),
            compute,
            host,
            config,
        ))
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn telemetry(&self) -> &DeviceTelemetryProvider {
        &self.telemetry
    }

    pub fn compute(&self) -> &Arc<dyn ComputeBackend> {
        &self.compute
    }

    /// Request size used by `allocate_default`
    pub fn default_request_mb(&self) -> u64 {
        self.default_request_mb
    }

    /// Current telemetry for every device, or for one
    ///
    /// An unknown `device_id` yields `DeviceNotFound`; a backend enumerating no
    /// devices yields an empty map.
    pub async fn get_stats(
        &self,
        device_id: Option<u32>,
    ) -> GpurmResult<BTreeMap<u32, DeviceSnapshot>> {
        match device_id {
            Some(id) => {
                let snapshot = self.telemetry.snapshot_one(id).await?;
                Ok(BTreeMap::from([(id, snapshot)]))
            }
            None => Ok(self
                .telemetry
                .snapshot_all()
                .await?
                .into_iter()
                .map(|s| (s.id, s))
                .collect()),
        }
    }

    /// Reserve `required_memory_mb` on the best-scoring device
    ///
    /// The returned guard holds the reservation until it is released or
    /// dropped, including when the owning task is cancelled or panics.
    pub async fn allocate(&self, required_memory_mb: u64) -> GpurmResult<AllocationGuard> {
        let _serialized = self.allocation_lock.lock().await;

        let snapshots = self.telemetry.snapshot_all().await.map_err(|e| {
            warn!(error = %e, "Telemetry read failed, aborting allocation");
            e
        })?;

        let pledges = lock_ledger(&self.ledger).pledges();
        let candidates = snapshots
            .iter()
            .filter(|s| self.registry.contains(s.id))
            .filter_map(|s| {
                let pledged = pledges.get(&s.id).copied().unwrap_or(0);
                let score = self
                    .scorer
                    .score_with_pledge(s, required_memory_mb, pledged);
                debug!(device_id = s.id, pledged_mb = pledged, score = ?score, "Scored device");
                score.map(|score| (s.id, score))
            });

        let Some((device_id, score)) = AllocationScorer::select_best(candidates) else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(required_memory_mb, "No GPU can satisfy allocation");
            return Err(GpurmError::InsufficientGpuMemory {
                requested_mb: required_memory_mb,
            });
        };

        let reservation = lock_ledger(&self.ledger).reserve(device_id, required_memory_mb);
        self.granted.fetch_add(1, Ordering::Relaxed);

        info!(
            reservation_id = %reservation.id,
            device_id,
            required_memory_mb,
            score,
            "Allocated GPU"
        );

        Ok(AllocationGuard {
            ledger: Arc::clone(&self.ledger),
            reservation,
            released: false,
        })
    }

    /// Allocate using the configured default request size
    pub async fn allocate_default(&self) -> GpurmResult<AllocationGuard> {
        self.allocate(self.default_request_mb).await
    }

    /// Release a reservation by id; returns false if it was not active
    pub fn release(&self, reservation_id: &Uuid) -> bool {
        lock_ledger(&self.ledger).release(reservation_id).is_some()
    }

    /// Active reservations, oldest first
    pub fn reservations(&self) -> Vec<Reservation> {
        lock_ledger(&self.ledger).list()
    }

    /// Memory pledged on a device by active reservations
    pub fn pledged_mb(&self, device_id: u32) -> u64 {
        lock_ledger(&self.ledger).pledged_mb(device_id)
    }

    /// Number of active reservations on a device
    pub fn active_reservations(&self, device_id: u32) -> usize {
        lock_ledger(&self.ledger).active_count(device_id)
    }

    pub fn allocation_counters(&self) -> AllocationCounters {
        AllocationCounters {
            granted: self.granted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    /// Ask the compute runtime to release cached memory
    ///
    /// Per-device failures are logged and reported, never raised.
    pub async fn cleanup(&self, device_id: Option<u32>) -> GpurmResult<CleanupReport> {
        let targets: Vec<u32> = match device_id {
            Some(id) if !self.registry.contains(id) => {
                return Err(GpurmError::DeviceNotFound(id));
            }
            Some(id) => vec![id],
            None => self.registry.list_ids().iter().copied().collect(),
        };

        let mut report = CleanupReport::default();
        for id in targets {
            match self.compute.clear_cache(id).await {
                Ok(()) => report.cleaned.push(id),
                Err(e) => {
                    warn!(device_id = id, error = %e, "Failed to clear GPU cache");
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        info!(
            cleaned = ?report.cleaned,
            failed = report.failed.len(),
            "GPU memory cleaned up"
        );

        Ok(report)
    }

    /// Host memory usage
    pub fn system_memory_usage(&self) -> GpurmResult<SystemMemoryUsage> {
        self.host.memory_usage()
    }

    /// Host CPU, memory and disk usage
    pub fn host_usage(&self, storage_path: &Path) -> GpurmResult<HostUsage> {
        self.host.usage(storage_path)
    }
}

/// A held reservation on one device
///
/// Dropping the guard releases the reservation. Release is idempotent.
#[derive(Debug)]
pub struct AllocationGuard {
    ledger: SharedLedger,
    reservation: Reservation,
    released: bool,
}

impl AllocationGuard {
    /// The allocated device
    pub fn device_id(&self) -> u32 {
        self.reservation.device_id
    }

    pub fn reservation_id(&self) -> Uuid {
        self.reservation.id
    }

    pub fn memory_mb(&self) -> u64 {
        self.reservation.memory_mb
    }

    pub fn reservation(&self) -> &Reservation {
        &self.reservation
    }

    /// Release now instead of at drop
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        lock_ledger(&self.ledger).release(&self.reservation.id);
    }
}

impl Drop for AllocationGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}
