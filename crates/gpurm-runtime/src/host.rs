//! Host resource usage via sysinfo

use gpurm_core::{GpurmResult, HostUsage, StorageUsage, SystemMemoryUsage};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use sysinfo::{Disks, System};

use crate::traits::HostMonitor;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Host monitor backed by sysinfo
///
/// The `System` handle is kept between samples so CPU usage is measured over
/// the interval since the previous call.
pub struct SysinfoHost {
    system: Mutex<System>,
}

impl SysinfoHost {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        system.refresh_cpu();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoHost {
    fn default() -> Self {
        Self::new()
    }
}

/// Disk whose mount point is the longest prefix of `path`
fn disk_for<'a>(disks: &'a Disks, path: &Path) -> Option<&'a sysinfo::Disk> {
    disks
        .list()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
}

fn used_percent(total: u64, available: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    total.saturating_sub(available) as f64 / total as f64 * 100.0
}

impl HostMonitor for SysinfoHost {
    fn memory_usage(&self) -> GpurmResult<SystemMemoryUsage> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_memory();
        Ok(SystemMemoryUsage::from_bytes(
            system.total_memory(),
            system.used_memory(),
            system.available_memory(),
        ))
    }

    fn usage(&self, storage_path: &Path) -> GpurmResult<HostUsage> {
        let (cpu_percent, memory) = {
            let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
            system.refresh_cpu();
            system.refresh_memory();
            (
                system.global_cpu_info().cpu_usage() as f64,
                SystemMemoryUsage::from_bytes(
                    system.total_memory(),
                    system.used_memory(),
                    system.available_memory(),
                ),
            )
        };

        let disks = Disks::new_with_refreshed_list();
        let root_disk_percent = disk_for(&disks, Path::new("/"))
            .map(|d| used_percent(d.total_space(), d.available_space()))
            .unwrap_or(0.0);

        let storage = if storage_path.exists() {
            disk_for(&disks, storage_path).map(|d| StorageUsage {
                used_mb: d.total_space().saturating_sub(d.available_space()) / BYTES_PER_MB,
                free_mb: d.available_space() / BYTES_PER_MB,
            })
        } else {
            None
        };

        Ok(HostUsage {
            cpu_percent,
            memory,
            root_disk_percent,
            storage,
        })
    }
}
