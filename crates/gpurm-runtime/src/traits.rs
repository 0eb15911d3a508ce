//! Backend trait definitions

use async_trait::async_trait;
use gpurm_core::{GpurmResult, HostUsage, RawDeviceReading, SystemMemoryUsage};
use std::path::Path;

/// Source of instantaneous per-device hardware telemetry
#[async_trait]
pub trait TelemetryBackend: Send + Sync {
    /// Number of enumerable devices
    async fn device_count(&self) -> GpurmResult<u32>;

    /// Read every device, in any order
    ///
    /// Fails with `BackendUnavailable` when the driver cannot be reached.
    async fn read_devices(&self) -> GpurmResult<Vec<RawDeviceReading>>;

    /// Get the backend name
    fn name(&self) -> &'static str;
}

/// Runtime that owns device contexts: cache reclaim and latency probes
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Number of devices the runtime can address
    async fn device_count(&self) -> GpurmResult<u32>;

    /// Release cached allocations held on one device
    async fn clear_cache(&self, device_id: u32) -> GpurmResult<()>;

    /// Multiply two `size` x `size` matrices on the device, returning elapsed milliseconds
    async fn run_probe_matmul(&self, device_id: u32, size: usize) -> GpurmResult<f64>;

    /// Whether `run_probe_matmul` is implemented
    fn supports_probe(&self) -> bool {
        true
    }
}

/// Host resource usage
pub trait HostMonitor: Send + Sync {
    /// Host memory usage
    fn memory_usage(&self) -> GpurmResult<SystemMemoryUsage>;

    /// CPU, memory and disk usage, including the volume holding `storage_path`
    fn usage(&self, storage_path: &Path) -> GpurmResult<HostUsage>;
}
