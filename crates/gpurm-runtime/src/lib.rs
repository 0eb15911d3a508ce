//! gpurm-runtime: Device and host backends
//!
//! This crate provides the hardware-facing boundary of gpurm:
//! - NVML-backed telemetry for NVIDIA devices
//! - A simulated backend for development and tests
//! - Host memory, CPU and disk usage via sysinfo

pub mod host;
pub mod nvml;
pub mod simulated;
pub mod traits;

pub use host::SysinfoHost;
pub use nvml::NvmlBackend;
pub use simulated::SimulatedBackend;
pub use traits::{ComputeBackend, HostMonitor, TelemetryBackend};
