//! Normalized device telemetry

use gpurm_core::{DeviceSnapshot, GpurmError, GpurmResult, RawDeviceReading};
use gpurm_runtime::TelemetryBackend;
use std::sync::Arc;

/// Adapts raw backend readings into `DeviceSnapshot`s
///
/// Holds no state besides the backend handle; every call is a fresh read.
#[derive(Clone)]
pub struct DeviceTelemetryProvider {
    backend: Arc<dyn TelemetryBackend>,
}

impl DeviceTelemetryProvider {
    pub fn new(backend: Arc<dyn TelemetryBackend>) -> Self {
        Self { backend }
    }

    /// The underlying backend
    pub fn backend(&self) -> &Arc<dyn TelemetryBackend> {
        &self.backend
    }

    /// Snapshot every device, ordered by ascending id
    pub async fn snapshot_all(&self) -> GpurmResult<Vec<DeviceSnapshot>> {
        let mut snapshots: Vec<DeviceSnapshot> = self
            .backend
            .read_devices()
            .await?
            .into_iter()
            .map(normalize)
            .collect();
        snapshots.sort_by_key(|s| s.id);
        Ok(snapshots)
    }

    /// Snapshot a single device
    pub async fn snapshot_one(&self, device_id: u32) -> GpurmResult<DeviceSnapshot> {
        self.backend
            .read_devices()
            .await?
            .into_iter()
            .find(|r| r.id == device_id)
            .map(normalize)
            .ok_or(GpurmError::DeviceNotFound(device_id))
    }
}

/// Convert a backend reading: utilization to percent, missing power to zero
pub fn normalize(reading: RawDeviceReading) -> DeviceSnapshot {
    let utilization_pct = if reading.utilization_fraction.is_finite() {
        (reading.utilization_fraction * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    DeviceSnapshot {
        id: reading.id,
        name: reading.name,
        utilization_pct,
        memory_total_mb: reading.memory_total_mb,
        memory_used_mb: reading.memory_used_mb,
        memory_free_mb: reading.memory_free_mb,
        temperature_c: reading.temperature_c,
        power_draw_w: reading.power_draw_w.unwrap_or(0.0).max(0.0),
    }
}
