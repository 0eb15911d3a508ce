//! Host (non-GPU) resource usage

use serde::{Deserialize, Serialize};

/// Host memory usage, in MB
///
/// `free_mb` is memory available to new allocations, not strictly unused pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMemoryUsage {
    pub total_mb: u64,
    pub used_mb: u64,
    pub free_mb: u64,
    pub percent: f64,
}

impl SystemMemoryUsage {
    /// Build from byte counts
    pub fn from_bytes(total: u64, used: u64, available: u64) -> Self {
        const MB: u64 = 1024 * 1024;
        let percent = if total == 0 {
            0.0
        } else {
            used as f64 / total as f64 * 100.0
        };
        Self {
            total_mb: total / MB,
            used_mb: used / MB,
            free_mb: available / MB,
            percent,
        }
    }
}

/// Disk usage of the model/data storage volume, in MB
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageUsage {
    pub used_mb: u64,
    pub free_mb: u64,
}

/// Host resource usage sampled by the metrics collector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostUsage {
    /// Average CPU usage across cores (0-100)
    pub cpu_percent: f64,
    /// Memory usage
    pub memory: SystemMemoryUsage,
    /// Usage of the root filesystem (0-100)
    pub root_disk_percent: f64,
    /// Storage volume usage, when the configured path exists
    pub storage: Option<StorageUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_usage_from_bytes() {
        let gib = 1024 * 1024 * 1024;
        let usage = SystemMemoryUsage::from_bytes(16 * gib, 4 * gib, 10 * gib);
        assert_eq!(usage.total_mb, 16384);
        assert_eq!(usage.used_mb, 4096);
        assert_eq!(usage.free_mb, 10240);
        assert!((usage.percent - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_memory_usage_zero_total() {
        let usage = SystemMemoryUsage::from_bytes(0, 0, 0);
        assert_eq!(usage.percent, 0.0);
    }
}
