//! Background metrics collection

use gpurm_core::{DeviceSnapshot, GpurmResult, MetricsConfig};
use gpurm_scheduler::GpuResourceManager;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::gauges::GpuMetrics;

/// Samples devices, host and reservations on a fixed tick
pub struct MetricsCollector {
    manager: Arc<GpuResourceManager>,
    metrics: GpuMetrics,
    interval: Duration,
    probe_interval: Option<Duration>,
    probe_size: usize,
    storage_path: PathBuf,
    last_probe: Mutex<Option<Instant>>,
}

impl MetricsCollector {
    pub fn new(
        manager: Arc<GpuResourceManager>,
        metrics: GpuMetrics,
        config: &MetricsConfig,
    ) -> Self {
        let probe_enabled = config.probe_interval_secs > 0 && manager.compute().supports_probe();
        let probe_interval = probe_enabled.then(|| Duration::from_secs(config.probe_interval_secs));

        Self {
            manager,
            metrics,
            interval: Duration::from_millis(config.interval_ms),
            probe_interval,
            probe_size: config.probe_matrix_size,
            storage_path: config.storage_path.clone(),
            last_probe: Mutex::new(None),
        }
    }

    pub fn metrics(&self) -> &GpuMetrics {
        &self.metrics
    }

    /// Run one collection tick
    pub async fn collect_once(&self) -> GpurmResult<()> {
        let snapshots = self.manager.telemetry().snapshot_all().await?;
        for snapshot in &snapshots {
            self.metrics.record_device(
                snapshot,
                self.manager.pledged_mb(snapshot.id),
                self.manager.active_reservations(snapshot.id),
            );
        }

        let host = self.manager.host_usage(&self.storage_path)?;
        self.metrics.record_host(&host);
        self.metrics
            .record_allocations(self.manager.allocation_counters());

        if self.probe_due() {
            self.run_probes(&snapshots).await;
        }

        debug!(devices = snapshots.len(), "Metrics collected");
        Ok(())
    }

    fn probe_due(&self) -> bool {
        let Some(interval) = self.probe_interval else {
            return false;
        };
        let mut last = self.last_probe.lock().unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(at) if at.elapsed() < interval => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }

    async fn run_probes(&self, snapshots: &[DeviceSnapshot]) {
        for snapshot in snapshots {
            match self
                .manager
                .compute()
                .run_probe_matmul(snapshot.id, self.probe_size)
                .await
            {
                Ok(elapsed_ms) => self.metrics.record_probe(snapshot.id, elapsed_ms),
                Err(e) => {
                    warn!(device_id = snapshot.id, error = %e, "Latency probe failed");
                    self.metrics.collection_errors.inc();
                }
            }
        }
    }

    /// Collect until `shutdown` turns true or its sender is dropped
    ///
    /// Tick failures are logged and counted; they never end the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_ms = self.interval.as_millis() as u64,
            probe = self.probe_interval.is_some(),
            "Metrics collector started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.collect_once().await {
                        error!(error = %e, "Error collecting metrics");
                        self.metrics.collection_errors.inc();
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Metrics collector stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpurm_core::{AllocatorConfig, SimulatedDeviceConfig};
    use gpurm_runtime::simulated::simulated_device;
    use gpurm_runtime::{SimulatedBackend, SysinfoHost};

    async fn collector_with(
        devices: Vec<SimulatedDeviceConfig>,
        config: MetricsConfig,
    ) -> (Arc<MetricsCollector>, Arc<GpuResourceManager>, Arc<SimulatedBackend>) {
        let backend = Arc::new(SimulatedBackend::new(devices));
        let manager = Arc::new(
            GpuResourceManager::start(
                backend.clone(),
                backend.clone(),
                Arc::new(SysinfoHost::new()),
                &AllocatorConfig::default(),
            )
            .await
            .unwrap(),
        );
        let collector = Arc::new(MetricsCollector::new(
            Arc::clone(&manager),
            GpuMetrics::new().unwrap(),
            &config,
        ));
        (collector, manager, backend)
    }

    fn no_probe() -> MetricsConfig {
        MetricsConfig {
            probe_interval_secs: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_collect_once_publishes_devices_and_reservations() {
        let (collector, manager, _) = collector_with(
            vec![simulated_device(8000, 2000, 30.0), simulated_device(16000, 0, 0.0)],
            no_probe(),
        )
        .await;

        let _guard = manager.allocate(12000).await.unwrap();
        collector.collect_once().await.unwrap();

        let metrics = collector.metrics();
        assert_eq!(metrics.gpu_memory_used.with_label_values(&["0"]).get(), 2000);
        assert_eq!(metrics.gpu_memory_total.with_label_values(&["1"]).get(), 16000);
        assert_eq!(metrics.gpu_reserved_memory.with_label_values(&["1"]).get(), 12000);
        assert_eq!(metrics.gpu_active_reservations.with_label_values(&["1"]).get(), 1);
        assert_eq!(metrics.allocations_granted.get(), 1);
        assert!(metrics.system_memory_used.get() > 0);
    }

    #[tokio::test]
    async fn test_failed_tick_does_not_block_next() {
        let (collector, _, backend) =
            collector_with(vec![simulated_device(8000, 1000, 50.0)], no_probe()).await;

        backend.fail_next_reads(1);
        assert!(collector.collect_once().await.is_err());
        assert!(collector.collect_once().await.is_ok());
        assert_eq!(
            collector.metrics().gpu_memory_used.with_label_values(&["0"]).get(),
            1000
        );
    }

    #[tokio::test]
    async fn test_probe_runs_on_sub_interval() {
        let config = MetricsConfig {
            probe_interval_secs: 3600,
            probe_matrix_size: 8,
            ..Default::default()
        };
        let (collector, _, _) =
            collector_with(vec![simulated_device(8000, 0, 0.0)], config).await;

        assert!(collector.probe_due());
        assert!(!collector.probe_due());
    }

    #[tokio::test]
    async fn test_probe_publishes_latency() {
        let config = MetricsConfig {
            probe_interval_secs: 1,
            probe_matrix_size: 8,
            ..Default::default()
        };
        let (collector, _, _) =
            collector_with(vec![simulated_device(8000, 0, 0.0)], config).await;

        collector.collect_once().await.unwrap();
        let text = collector.metrics().render().unwrap();
        assert!(text.contains("gpu_probe_latency_ms{device=\"0\"}"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_survives_failures() {
        let (collector, _, backend) =
            collector_with(vec![simulated_device(8000, 3000, 20.0)], no_probe()).await;
        backend.fail_next_reads(1);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = {
            let collector = Arc::clone(&collector);
            tokio::spawn(async move { collector.run(shutdown_rx).await })
        };

        tokio::time::sleep(Duration::from_millis(2500)).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        let metrics = collector.metrics();
        assert_eq!(metrics.collection_errors.get(), 1);
        assert_eq!(metrics.gpu_memory_used.with_label_values(&["0"]).get(), 3000);
    }
}
