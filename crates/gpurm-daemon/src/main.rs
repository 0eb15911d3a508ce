//! gpurm daemon
//!
//! Discovers GPUs, publishes their telemetry for scraping and serves the
//! allocation API.

use anyhow::Context;
use clap::Parser;
use gpurm_api::{create_router, metrics_router};
use gpurm_core::{BackendKind, DaemonConfig, LoggingConfig};
use gpurm_metrics::{GpuMetrics, MetricsCollector};
use gpurm_runtime::simulated::simulated_device;
use gpurm_runtime::{
    ComputeBackend, NvmlBackend, SimulatedBackend, SysinfoHost, TelemetryBackend,
};
use gpurm_scheduler::GpuResourceManager;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// gpurm daemon - GPU resource manager
#[derive(Parser, Debug)]
#[command(name = "gpurmd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind the API and metrics servers
    #[arg(long)]
    address: Option<String>,

    /// Port for the REST API server
    #[arg(long)]
    port: Option<u16>,

    /// Port for the Prometheus scrape endpoint
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Log level or filter directive
    #[arg(long)]
    log_level: Option<String>,

    /// Use simulated devices instead of NVML
    #[arg(long)]
    simulate: bool,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => DaemonConfig::default(),
        };

        if let Some(address) = &self.address {
            config.api.address = address.clone();
            config.metrics.address = address.clone();
        }
        if let Some(port) = self.port {
            config.api.port = port;
        }
        if let Some(port) = self.metrics_port {
            config.metrics.port = port;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.simulate {
            config.backend.kind = BackendKind::Simulated;
        }

        Ok(config)
    }
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let result = if config.format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        eprintln!("Failed to set subscriber: {}", e);
    }
}

type Backends = (Arc<dyn TelemetryBackend>, Arc<dyn ComputeBackend>);

fn create_backends(config: &DaemonConfig) -> anyhow::Result<Backends> {
    match config.backend.kind {
        BackendKind::Nvml => {
            let backend = Arc::new(NvmlBackend::init().context("initializing NVML")?);
            Ok((backend.clone(), backend))
        }
        BackendKind::Simulated => {
            let mut devices = config.backend.simulated_devices.clone();
            if devices.is_empty() {
                warn!("No simulated devices configured, using one 16GB device");
                devices.push(simulated_device(16384, 0, 0.0));
            }
            let backend = Arc::new(SimulatedBackend::new(devices));
            Ok((backend.clone(), backend))
        }
    }
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.load_config()?;

    init_logging(&config.logging);

    info!("Starting gpurm daemon v{}", env!("CARGO_PKG_VERSION"));

    let (telemetry, compute) = create_backends(&config)?;
    info!(backend = telemetry.name(), "Device backend ready");

    let manager = Arc::new(
        GpuResourceManager::start(
            telemetry,
            compute,
            Arc::new(SysinfoHost::new()),
            &config.allocator,
        )
        .await
        .context("discovering GPUs")?,
    );
    info!(
        devices = manager.registry().device_count(),
        "GPU resource manager started"
    );

    let metrics = GpuMetrics::new()?;
    let collector = Arc::new(MetricsCollector::new(
        Arc::clone(&manager),
        metrics.clone(),
        &config.metrics,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let collector_task = {
        let collector = Arc::clone(&collector);
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { collector.run(rx).await })
    };

    let metrics_addr: SocketAddr = format!("{}:{}", config.metrics.address, config.metrics.port)
        .parse()
        .context("invalid metrics address")?;
    let api_addr: SocketAddr = format!("{}:{}", config.api.address, config.api.port)
        .parse()
        .context("invalid API address")?;

    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr)
        .await
        .with_context(|| format!("binding {}", metrics_addr))?;
    let api_listener = tokio::net::TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("binding {}", api_addr))?;

    info!("Metrics server listening on {}", metrics_addr);
    info!("API server listening on {}", api_addr);

    let metrics_server = axum::serve(metrics_listener, metrics_router(metrics))
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));
    let api_server = axum::serve(api_listener, create_router(manager, &config.api))
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx));

    let metrics_task = tokio::spawn(async move { metrics_server.await });
    let api_task = tokio::spawn(async move { api_server.await });

    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    info!("Shutting down");
    let _ = shutdown_tx.send(true);

    api_task.await?.context("API server error")?;
    metrics_task.await?.context("metrics server error")?;
    collector_task.await?;

    info!("gpurm daemon stopped");
    Ok(())
}
