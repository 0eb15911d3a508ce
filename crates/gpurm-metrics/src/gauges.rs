//! Metric definitions
//!
//! Metric names are a contract with the scrape target and must not change.

use gpurm_core::{DeviceSnapshot, GpurmError, GpurmResult, HostUsage};
use gpurm_scheduler::AllocationCounters;
use prometheus::core::Collector;
use prometheus::{
    Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, IntCounter, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;

use crate::task::TaskTimer;

const DEVICE_LABEL: &str = "device";

const TASK_DURATION_BUCKETS: [f64; 9] = [0.1, 0.5, 1.0, 2.5, 5.0, 7.5, 10.0, 15.0, 30.0];
const INFERENCE_BUCKETS: [f64; 7] = [0.01, 0.05, 0.1, 0.25, 0.5, 0.75, 1.0];

fn metrics_error(err: prometheus::Error) -> GpurmError {
    GpurmError::Metrics(err.to_string())
}

/// The full gpurm metric set, registered in its own registry
#[derive(Clone)]
pub struct GpuMetrics {
    registry: Registry,

    pub gpu_utilization: GaugeVec,
    pub gpu_memory_used: IntGaugeVec,
    pub gpu_memory_total: IntGaugeVec,
    pub gpu_memory_free: IntGaugeVec,
    pub gpu_temperature: GaugeVec,
    pub gpu_power_draw: GaugeVec,
    pub gpu_probe_latency: GaugeVec,
    pub gpu_reserved_memory: IntGaugeVec,
    pub gpu_active_reservations: IntGaugeVec,

    pub system_cpu_usage: Gauge,
    pub system_memory_used: IntGauge,
    pub system_memory_percent: Gauge,
    pub system_disk_usage: Gauge,
    pub system_storage_used: IntGauge,
    pub system_storage_free: IntGauge,

    pub active_tasks: IntGauge,
    pub task_duration: Histogram,
    pub inference_time: Histogram,
    pub allocations_granted: IntGauge,
    pub allocations_rejected: IntGauge,
    pub collection_errors: IntCounter,
}

impl GpuMetrics {
    pub fn new() -> GpurmResult<Self> {
        let device_gauge = |name: &str, help: &str| {
            GaugeVec::new(Opts::new(name, help), &[DEVICE_LABEL]).map_err(metrics_error)
        };
        let device_int_gauge = |name: &str, help: &str| {
            IntGaugeVec::new(Opts::new(name, help), &[DEVICE_LABEL]).map_err(metrics_error)
        };

        let metrics = Self {
            registry: Registry::new(),

            gpu_utilization: device_gauge("gpu_utilization_percent", "GPU utilization in %")?,
            gpu_memory_used: device_int_gauge("gpu_memory_used_mb", "GPU memory used in MB")?,
            gpu_memory_total: device_int_gauge("gpu_memory_total_mb", "GPU total memory in MB")?,
            gpu_memory_free: device_int_gauge("gpu_memory_free_mb", "GPU free memory in MB")?,
            gpu_temperature: device_gauge(
                "gpu_temperature_celsius",
                "GPU temperature in Celsius",
            )?,
            gpu_power_draw: device_gauge("gpu_power_draw_watts", "GPU power usage in Watts")?,
            gpu_probe_latency: device_gauge(
                "gpu_probe_latency_ms",
                "Round-trip time of the synthetic matmul probe in ms",
            )?,
            gpu_reserved_memory: device_int_gauge(
                "gpu_reserved_memory_mb",
                "GPU memory pledged to active reservations in MB",
            )?,
            gpu_active_reservations: device_int_gauge(
                "gpu_active_reservations",
                "Number of active reservations per GPU",
            )?,

            system_cpu_usage: Gauge::new("system_cpu_usage_percent", "CPU usage in %")
                .map_err(metrics_error)?,
            system_memory_used: IntGauge::new("system_memory_used_mb", "System memory used in MB")
                .map_err(metrics_error)?,
            system_memory_percent: Gauge::new(
                "system_memory_percent",
                "System memory used in %",
            )
            .map_err(metrics_error)?,
            system_disk_usage: Gauge::new("system_disk_usage_percent", "Root disk usage in %")
                .map_err(metrics_error)?,
            system_storage_used: IntGauge::new(
                "system_storage_used_mb",
                "Storage volume used in MB",
            )
            .map_err(metrics_error)?,
            system_storage_free: IntGauge::new(
                "system_storage_free_mb",
                "Storage volume free in MB",
            )
            .map_err(metrics_error)?,

            active_tasks: IntGauge::new("ai_active_tasks", "Currently running AI tasks")
                .map_err(metrics_error)?,
            task_duration: Histogram::with_opts(
                HistogramOpts::new("ai_task_duration_seconds", "Task processing time")
                    .buckets(TASK_DURATION_BUCKETS.to_vec()),
            )
            .map_err(metrics_error)?,
            inference_time: Histogram::with_opts(
                HistogramOpts::new("ai_inference_seconds", "Model inference time")
                    .buckets(INFERENCE_BUCKETS.to_vec()),
            )
            .map_err(metrics_error)?,
            allocations_granted: IntGauge::new(
                "ai_allocations_granted",
                "GPU allocations granted since startup",
            )
            .map_err(metrics_error)?,
            allocations_rejected: IntGauge::new(
                "ai_allocations_rejected",
                "GPU allocations rejected since startup",
            )
            .map_err(metrics_error)?,
            collection_errors: IntCounter::new(
                "ai_metrics_collection_errors_total",
                "Failed metrics collection ticks",
            )
            .map_err(metrics_error)?,
        };

        metrics.register_all()?;
        Ok(metrics)
    }

    fn register_all(&self) -> GpurmResult<()> {
        let collectors: Vec<Box<dyn Collector>> = vec![
            Box::new(self.gpu_utilization.clone()),
            Box::new(self.gpu_memory_used.clone()),
            Box::new(self.gpu_memory_total.clone()),
            Box::new(self.gpu_memory_free.clone()),
            Box::new(self.gpu_temperature.clone()),
            Box::new(self.gpu_power_draw.clone()),
            Box::new(self.gpu_probe_latency.clone()),
            Box::new(self.gpu_reserved_memory.clone()),
            Box::new(self.gpu_active_reservations.clone()),
            Box::new(self.system_cpu_usage.clone()),
            Box::new(self.system_memory_used.clone()),
            Box::new(self.system_memory_percent.clone()),
            Box::new(self.system_disk_usage.clone()),
            Box::new(self.system_storage_used.clone()),
            Box::new(self.system_storage_free.clone()),
            Box::new(self.active_tasks.clone()),
            Box::new(self.task_duration.clone()),
            Box::new(self.inference_time.clone()),
            Box::new(self.allocations_granted.clone()),
            Box::new(self.allocations_rejected.clone()),
            Box::new(self.collection_errors.clone()),
        ];

        for collector in collectors {
            self.registry.register(collector).map_err(metrics_error)?;
        }
        Ok(())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Publish one device snapshot and its reservation state
    pub fn record_device(&self, snapshot: &DeviceSnapshot, pledged_mb: u64, reservations: usize) {
        let label = snapshot.id.to_string();
        let labels = [label.as_str()];

        self.gpu_utilization
            .with_label_values(&labels)
            .set(snapshot.utilization_pct);
        self.gpu_memory_used
            .with_label_values(&labels)
            .set(clamp_i64(snapshot.memory_used_mb));
        self.gpu_memory_total
            .with_label_values(&labels)
            .set(clamp_i64(snapshot.memory_total_mb));
        self.gpu_memory_free
            .with_label_values(&labels)
            .set(clamp_i64(snapshot.memory_free_mb));
        self.gpu_temperature
            .with_label_values(&labels)
            .set(snapshot.temperature_c);
        self.gpu_power_draw
            .with_label_values(&labels)
            .set(snapshot.power_draw_w);
        self.gpu_reserved_memory
            .with_label_values(&labels)
            .set(clamp_i64(pledged_mb));
        self.gpu_active_reservations
            .with_label_values(&labels)
            .set(reservations as i64);
    }

    pub fn record_probe(&self, device_id: u32, elapsed_ms: f64) {
        self.gpu_probe_latency
            .with_label_values(&[device_id.to_string().as_str()])
            .set(elapsed_ms);
    }

    pub fn record_host(&self, usage: &HostUsage) {
        self.system_cpu_usage.set(usage.cpu_percent);
        self.system_memory_used.set(clamp_i64(usage.memory.used_mb));
        self.system_memory_percent.set(usage.memory.percent);
        self.system_disk_usage.set(usage.root_disk_percent);
        if let Some(storage) = usage.storage {
            self.system_storage_used.set(clamp_i64(storage.used_mb));
            self.system_storage_free.set(clamp_i64(storage.free_mb));
        }
    }

    pub fn record_allocations(&self, counters: AllocationCounters) {
        self.allocations_granted.set(clamp_i64(counters.granted));
        self.allocations_rejected.set(clamp_i64(counters.rejected));
    }

    /// Start timing a task; see [`TaskTimer`]
    pub fn track_task(&self) -> TaskTimer {
        TaskTimer::start(self.active_tasks.clone(), self.task_duration.clone())
    }

    pub fn observe_inference(&self, elapsed: Duration) {
        self.inference_time.observe(elapsed.as_secs_f64());
    }

    /// Prometheus text exposition of every metric
    pub fn render(&self) -> GpurmResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| GpurmError::Metrics(e.to_string()))
    }
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
