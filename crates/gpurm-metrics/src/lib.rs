//! gpurm-metrics: Metrics collection
//!
//! This crate republishes device, host and allocation state as Prometheus
//! metrics:
//! - A metric set with stable names for the scrape target
//! - A background collector sampling on a fixed tick
//! - Scoped task timers

pub mod collector;
pub mod gauges;
pub mod task;

pub use collector::MetricsCollector;
pub use gauges::GpuMetrics;
pub use task::TaskTimer;
