//! NVML-backed telemetry
//!
//! Reads utilization, memory, temperature and power for NVIDIA devices through
//! the NVIDIA Management Library. NVML is a query interface only: it cannot
//! launch kernels, so the matmul probe is reported as unsupported and cache
//! clearing has nothing to reclaim in this process.

use async_trait::async_trait;
use gpurm_core::{GpurmError, GpurmResult, RawDeviceReading};
use nvml_wrapper::enum_wrappers::device::TemperatureSensor;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::Nvml;
use std::sync::Arc;
use tracing::{debug, info};

use crate::traits::{ComputeBackend, TelemetryBackend};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Telemetry and compute backend for NVIDIA GPUs
#[derive(Clone)]
pub struct NvmlBackend {
    nvml: Arc<Nvml>,
}

impl NvmlBackend {
    /// Initialize NVML
    ///
    /// Fails with `BackendUnavailable` when the driver library is missing.
    pub fn init() -> GpurmResult<Self> {
        let nvml = Nvml::init().map_err(unavailable)?;
        let driver = nvml
            .sys_driver_version()
            .unwrap_or_else(|_| "unknown".to_string());
        info!(driver = %driver, "NVML initialized");
        Ok(Self {
            nvml: Arc::new(nvml),
        })
    }

    fn read_blocking(nvml: &Nvml) -> GpurmResult<Vec<RawDeviceReading>> {
        let count = nvml.device_count().map_err(unavailable)?;
        let mut readings = Vec::with_capacity(count as usize);

        for index in 0..count {
            let device = nvml.device_by_index(index).map_err(unavailable)?;
            let utilization = device.utilization_rates().map_err(unavailable)?;
            let memory = device.memory_info().map_err(unavailable)?;
            let temperature = device
                .temperature(TemperatureSensor::Gpu)
                .map_err(unavailable)?;

            // Power readings are optional on consumer boards
            let power_draw_w = match device.power_usage() {
                Ok(milliwatts) => Some(milliwatts as f64 / 1000.0),
                Err(NvmlError::NotSupported) => None,
                Err(e) => return Err(unavailable(e)),
            };

            readings.push(RawDeviceReading {
                id: index,
                utilization_fraction: utilization.gpu as f64 / 100.0,
                memory_total_mb: memory.total / BYTES_PER_MB,
                memory_used_mb: memory.used / BYTES_PER_MB,
                memory_free_mb: memory.free / BYTES_PER_MB,
                temperature_c: temperature as f64,
                power_draw_w,
                name: device.name().ok(),
            });
        }

        Ok(readings)
    }

    async fn count(&self) -> GpurmResult<u32> {
        let nvml = Arc::clone(&self.nvml);
        tokio::task::spawn_blocking(move || nvml.device_count().map_err(unavailable))
            .await
            .map_err(|e| GpurmError::Internal(format!("NVML query task failed: {}", e)))?
    }
}

fn unavailable(err: NvmlError) -> GpurmError {
    GpurmError::BackendUnavailable(format!("NVML: {}", err))
}

#[async_trait]
impl TelemetryBackend for NvmlBackend {
    async fn device_count(&self) -> GpurmResult<u32> {
        self.count().await
    }

    async fn read_devices(&self) -> GpurmResult<Vec<RawDeviceReading>> {
        let nvml = Arc::clone(&self.nvml);
        tokio::task::spawn_blocking(move || Self::read_blocking(&nvml))
            .await
            .map_err(|e| GpurmError::Internal(format!("NVML query task failed: {}", e)))?
    }

    fn name(&self) -> &'static str {
        "nvml"
    }
}

#[async_trait]
impl ComputeBackend for NvmlBackend {
    async fn device_count(&self) -> GpurmResult<u32> {
        self.count().await
    }

    async fn clear_cache(&self, device_id: u32) -> GpurmResult<()> {
        let count = self.count().await?;
        if device_id >= count {
            return Err(GpurmError::DeviceNotFound(device_id));
        }
        debug!(device_id, "No cached allocations held by this process");
        Ok(())
    }

    async fn run_probe_matmul(&self, _device_id: u32, _size: usize) -> GpurmResult<f64> {
        Err(GpurmError::Unsupported(
            "NVML cannot launch compute kernels".to_string(),
        ))
    }

    fn supports_probe(&self) -> bool {
        false
    }
}
