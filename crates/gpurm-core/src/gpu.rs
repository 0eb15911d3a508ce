//! GPU telemetry records

use serde::{Deserialize, Serialize};

/// One device reading as reported by a telemetry backend
///
/// Memory figures are in megabytes. Utilization is a fraction in `0..=1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDeviceReading {
    /// Device index
    pub id: u32,
    /// Utilization as a fraction (0.0 - 1.0)
    pub utilization_fraction: f64,
    /// Total memory in MB
    pub memory_total_mb: u64,
    /// Used memory in MB
    pub memory_used_mb: u64,
    /// Free memory in MB
    pub memory_free_mb: u64,
    /// Temperature in Celsius
    pub temperature_c: f64,
    /// Power draw in Watts, if the device reports it
    pub power_draw_w: Option<f64>,
    /// Product name, if known
    pub name: Option<String>,
}

/// Point-in-time status of one accelerator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    /// Device index
    pub id: u32,
    /// Product name, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Utilization percentage (0-100)
    pub utilization_pct: f64,
    /// Total memory in MB
    pub memory_total_mb: u64,
    /// Used memory in MB
    pub memory_used_mb: u64,
    /// Free memory in MB
    pub memory_free_mb: u64,
    /// Temperature in Celsius
    pub temperature_c: f64,
    /// Power draw in Watts (0 when not reported)
    pub power_draw_w: f64,
}

impl DeviceSnapshot {
    /// Fraction of device memory in use, or `None` for a zero-sized device
    pub fn memory_used_fraction(&self) -> Option<f64> {
        if self.memory_total_mb == 0 {
            return None;
        }
        Some(self.memory_used_mb as f64 / self.memory_total_mb as f64)
    }

    /// Whether used + free adds up to total
    pub fn is_consistent(&self) -> bool {
        self.memory_used_mb.checked_add(self.memory_free_mb) == Some(self.memory_total_mb)
    }
}

/// Outcome of a cache-clear pass over one or more devices
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Devices cleared successfully
    pub cleaned: Vec<u32>,
    /// Devices that failed, with the reason
    pub failed: Vec<(u32, String)>,
}

impl CleanupReport {
    /// True when every targeted device was cleared
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(total: u64, used: u64) -> DeviceSnapshot {
        DeviceSnapshot {
            id: 0,
            name: None,
            utilization_pct: 10.0,
            memory_total_mb: total,
            memory_used_mb: used,
            memory_free_mb: total.saturating_sub(used),
            temperature_c: 50.0,
            power_draw_w: 0.0,
        }
    }

    #[test]
    fn test_memory_used_fraction() {
        assert_eq!(snapshot(20000, 5000).memory_used_fraction(), Some(0.25));
        assert_eq!(snapshot(0, 0).memory_used_fraction(), None);
    }

    #[test]
    fn test_consistency() {
        assert!(snapshot(8000, 2000).is_consistent());

        let mut bad = snapshot(8000, 2000);
        bad.memory_free_mb = 7000;
        assert!(!bad.is_consistent());
    }

    #[test]
    fn test_snapshot_serialization_skips_missing_name() {
        let json = serde_json::to_value(snapshot(1024, 512)).unwrap();
        assert!(json.get("name").is_none());
        assert_eq!(json["memory_free_mb"], 512);
    }

    #[test]
    fn test_cleanup_report() {
        let mut report = CleanupReport::default();
        report.cleaned.push(0);
        assert!(report.is_complete());

        report.failed.push((1, "busy".to_string()));
        assert!(!report.is_complete());
    }
}
