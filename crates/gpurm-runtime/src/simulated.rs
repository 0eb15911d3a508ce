//! Simulated devices
//!
//! An in-memory backend whose devices are described by configuration. Used by
//! the daemon when no driver is present and by tests, which can script usage
//! changes and backend failures.

use async_trait::async_trait;
use gpurm_core::{GpurmError, GpurmResult, RawDeviceReading, SimulatedDeviceConfig};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::debug;

use crate::traits::{ComputeBackend, TelemetryBackend};

#[derive(Debug, Default)]
struct SimState {
    devices: Vec<SimulatedDeviceConfig>,
    /// Number of upcoming reads that fail
    failing_reads: u32,
    /// Every read fails while set
    unavailable: bool,
    failing_clears: HashSet<u32>,
    cache_clears: HashMap<u32, u32>,
}

/// In-memory telemetry and compute backend
#[derive(Debug, Default)]
pub struct SimulatedBackend {
    state: Mutex<SimState>,
}

/// Describe a simulated device
pub fn simulated_device(
    memory_total_mb: u64,
    memory_used_mb: u64,
    utilization_pct: f64,
) -> SimulatedDeviceConfig {
    SimulatedDeviceConfig {
        name: None,
        memory_total_mb,
        memory_used_mb,
        utilization_pct,
        temperature_c: 40.0,
        power_draw_w: None,
    }
}

impl SimulatedBackend {
    /// Create a backend exposing `devices`, indexed in order
    pub fn new(devices: Vec<SimulatedDeviceConfig>) -> Self {
        Self {
            state: Mutex::new(SimState {
                devices,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change the reported usage of one device
    pub fn set_usage(&self, device_id: u32, memory_used_mb: u64, utilization_pct: f64) {
        let mut state = self.state();
        if let Some(device) = state.devices.get_mut(device_id as usize) {
            device.memory_used_mb = memory_used_mb.min(device.memory_total_mb);
            device.utilization_pct = utilization_pct;
        }
    }

    /// Make the next `count` reads fail with `BackendUnavailable`
    pub fn fail_next_reads(&self, count: u32) {
        self.state().failing_reads = count;
    }

    /// Toggle a persistent outage
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Make cache clears on `device_id` fail
    pub fn fail_clear_cache(&self, device_id: u32) {
        self.state().failing_clears.insert(device_id);
    }

    /// Number of successful cache clears on `device_id`
    pub fn cache_clears(&self, device_id: u32) -> u32 {
        self.state()
            .cache_clears
            .get(&device_id)
            .copied()
            .unwrap_or(0)
    }

    /// Drop every device, as if the driver enumerated none
    pub fn remove_all_devices(&self) {
        self.state().devices.clear();
    }

    fn check_available(state: &mut SimState) -> GpurmResult<()> {
        if state.unavailable {
            return Err(GpurmError::BackendUnavailable(
                "simulated backend offline".to_string(),
            ));
        }
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(GpurmError::BackendUnavailable(
                "simulated read failure".to_string(),
            ));
        }
        Ok(())
    }
}

fn reading(id: u32, device: &SimulatedDeviceConfig) -> RawDeviceReading {
    RawDeviceReading {
        id,
        utilization_fraction: device.utilization_pct / 100.0,
        memory_total_mb: device.memory_total_mb,
        memory_used_mb: device.memory_used_mb,
        memory_free_mb: device.memory_total_mb - device.memory_used_mb,
        temperature_c: device.temperature_c,
        power_draw_w: device.power_draw_w,
        name: device.name.clone(),
    }
}

/// Naive host-side matrix product, timed
fn host_matmul(size: usize) -> f64 {
    let a: Vec<f32> = (0..size * size).map(|i| (i % 7) as f32 * 0.5).collect();
    let b: Vec<f32> = (0..size * size).map(|i| (i % 5) as f32 * 0.25).collect();
    let mut c = vec![0.0f32; size * size];

    let start = Instant::now();
    for row in 0..size {
        for k in 0..size {
            let lhs = a[row * size + k];
            for col in 0..size {
                c[row * size + col] += lhs * b[k * size + col];
            }
        }
    }
    let elapsed = start.elapsed().as_secs_f64() * 1000.0;
    std::hint::black_box(&c);
    elapsed
}

#[async_trait]
impl TelemetryBackend for SimulatedBackend {
    async fn device_count(&self) -> GpurmResult<u32> {
        let mut state = self.state();
        Self::check_available(&mut state)?;
        Ok(state.devices.len() as u32)
    }

    async fn read_devices(&self) -> GpurmResult<Vec<RawDeviceReading>> {
        let mut state = self.state();
        Self::check_available(&mut state)?;
        Ok(state
            .devices
            .iter()
            .enumerate()
            .map(|(i, d)| reading(i as u32, d))
            .collect())
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

#[async_trait]
impl ComputeBackend for SimulatedBackend {
    async fn device_count(&self) -> GpurmResult<u32> {
        Ok(self.state().devices.len() as u32)
    }

    async fn clear_cache(&self, device_id: u32) -> GpurmResult<()> {
        let mut state = self.state();
        if device_id as usize >= state.devices.len() {
            return Err(GpurmError::DeviceNotFound(device_id));
        }
        if state.failing_clears.contains(&device_id) {
            return Err(GpurmError::BackendUnavailable(format!(
                "cache clear failed on device {}",
                device_id
            )));
        }
        *state.cache_clears.entry(device_id).or_insert(0) += 1;
        debug!(device_id, "Simulated cache cleared");
        Ok(())
    }

    async fn run_probe_matmul(&self, device_id: u32, size: usize) -> GpurmResult<f64> {
        {
            let mut state = self.state();
            if device_id as usize >= state.devices.len() {
                return Err(GpurmError::DeviceNotFound(device_id));
            }
            Self::check_available(&mut state)?;
        }
        tokio::task::spawn_blocking(move || host_matmul(size))
            .await
            .map_err(|e| GpurmError::Internal(format!("probe task failed: {}", e)))
    }
}
