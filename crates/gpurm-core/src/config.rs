//! Configuration types for gpurm

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{GpurmError, GpurmResult};

/// Main daemon configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// API server configuration
    pub api: ApiConfig,
    /// Allocation policy
    pub allocator: AllocatorConfig,
    /// Metrics collection configuration
    pub metrics: MetricsConfig,
    /// Device backend configuration
    pub backend: BackendConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl DaemonConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> GpurmResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GpurmError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> GpurmResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| GpurmError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the daemon cannot run with
    pub fn validate(&self) -> GpurmResult<()> {
        let weights = [
            ("allocator.utilization_weight", self.allocator.utilization_weight),
            ("allocator.memory_weight", self.allocator.memory_weight),
        ];
        for (name, value) in weights {
            if !value.is_finite() || value < 0.0 {
                return Err(GpurmError::Config(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }

        if self.metrics.interval_ms == 0 {
            return Err(GpurmError::Config(
                "metrics.interval_ms must be greater than zero".to_string(),
            ));
        }

        for (index, device) in self.backend.simulated_devices.iter().enumerate() {
            if device.memory_total_mb == 0 {
                return Err(GpurmError::Config(format!(
                    "backend.simulated_devices[{}].memory_total_mb must be greater than zero",
                    index
                )));
            }
            if device.memory_used_mb > device.memory_total_mb {
                return Err(GpurmError::Config(format!(
                    "backend.simulated_devices[{}] uses more memory than it has",
                    index
                )));
            }
        }

        Ok(())
    }
}

/// API server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to bind the REST API server
    pub address: String,
    /// Port for the REST API server
    pub port: u16,
    /// Enable CORS
    pub cors_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 9090,
            cors_enabled: true,
        }
    }
}

/// Allocation scoring policy
///
/// Score = utilization% * utilization_weight + memory-used% * memory_weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    pub utilization_weight: f64,
    pub memory_weight: f64,
    /// Request size used when a caller does not state one
    pub min_memory_available_mb: u64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            utilization_weight: 0.7,
            memory_weight: 0.3,
            min_memory_available_mb: 4000,
        }
    }
}

/// Metrics collection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Address for the scrape endpoint
    pub address: String,
    /// Port for the scrape endpoint
    pub port: u16,
    /// Collection tick in milliseconds
    pub interval_ms: u64,
    /// Seconds between latency probes (0 disables probing)
    pub probe_interval_secs: u64,
    /// Side length of the square probe matrix
    pub probe_matrix_size: usize,
    /// Storage volume reported as system_storage_*
    pub storage_path: PathBuf,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8001,
            interval_ms: 1000,
            probe_interval_secs: 60,
            probe_matrix_size: 256,
            storage_path: PathBuf::from("/data"),
        }
    }
}

/// Device backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// NVIDIA devices through NVML
    Nvml,
    /// In-memory devices described in the config
    Simulated,
}

/// Device backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Devices for the simulated backend
    pub simulated_devices: Vec<SimulatedDeviceConfig>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Nvml,
            simulated_devices: Vec::new(),
        }
    }
}

/// One simulated accelerator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedDeviceConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub memory_total_mb: u64,
    #[serde(default)]
    pub memory_used_mb: u64,
    #[serde(default)]
    pub utilization_pct: f64,
    #[serde(default = "default_temperature")]
    pub temperature_c: f64,
    #[serde(default)]
    pub power_draw_w: Option<f64>,
}

fn default_temperature() -> f64 {
    40.0
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive
    pub level: String,
    /// Log format (json or text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_daemon_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.api.port, 9090);
        assert_eq!(config.metrics.port, 8001);
        assert_eq!(config.metrics.interval_ms, 1000);
        assert_eq!(config.allocator.min_memory_available_mb, 4000);
        assert_eq!(config.backend.kind, BackendKind::Nvml);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let toml_str = r#"
[allocator]
utilization_weight = 0.5

[backend]
kind = "simulated"

[[backend.simulated_devices]]
memory_total_mb = 8000
memory_used_mb = 2000
utilization_pct = 10.0

[[backend.simulated_devices]]
name = "sim-1"
memory_total_mb = 16000
power_draw_w = 120.0
"#;
        let config = DaemonConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.allocator.utilization_weight, 0.5);
        assert_eq!(config.allocator.memory_weight, 0.3);
        assert_eq!(config.api.port, 9090);
        assert_eq!(config.backend.kind, BackendKind::Simulated);
        assert_eq!(config.backend.simulated_devices.len(), 2);
        assert_eq!(config.backend.simulated_devices[0].temperature_c, 40.0);
        assert_eq!(
            config.backend.simulated_devices[1].name.as_deref(),
            Some("sim-1")
        );
    }

    #[test]
    fn test_round_trip() {
        let config = DaemonConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed = DaemonConfig::from_toml(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_rejects_negative_weight() {
        let result = DaemonConfig::from_toml("[allocator]\nmemory_weight = -1.0\n");
        assert!(matches!(result, Err(GpurmError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_interval() {
        let result = DaemonConfig::from_toml("[metrics]\ninterval_ms = 0\n");
        assert!(matches!(result, Err(GpurmError::Config(_))));
    }

    #[test]
    fn test_rejects_overcommitted_simulated_device() {
        let toml_str = r#"
[[backend.simulated_devices]]
memory_total_mb = 1000
memory_used_mb = 2000
"#;
        assert!(DaemonConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = DaemonConfig::from_file(std::path::Path::new("/nonexistent/gpurm.toml"));
        assert!(matches!(result, Err(GpurmError::Config(_))));
    }
}
