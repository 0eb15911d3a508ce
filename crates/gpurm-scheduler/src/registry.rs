//! Device discovery

use gpurm_core::{GpurmError, GpurmResult};
use gpurm_runtime::TelemetryBackend;
use std::collections::BTreeSet;
use tracing::info;

/// The set of accelerators known to this process
///
/// Populated once at startup; devices appearing later are not allocated.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    ids: BTreeSet<u32>,
}

impl DeviceRegistry {
    /// Enumerate devices through the telemetry backend
    ///
    /// Fails with `NoDeviceFound` when the backend reports zero devices, and
    /// with `BackendUnavailable` when it cannot be queried at all.
    pub async fn discover(backend: &dyn TelemetryBackend) -> GpurmResult<Self> {
        let readings = backend.read_devices().await?;
        let registry = Self::from_ids(readings.iter().map(|r| r.id))?;

        info!(
            backend = backend.name(),
            devices = registry.device_count(),
            "GPU devices discovered"
        );

        Ok(registry)
    }

    /// Build a registry from known device ids
    pub fn from_ids(ids: impl IntoIterator<Item = u32>) -> GpurmResult<Self> {
        let ids: BTreeSet<u32> = ids.into_iter().collect();
        if ids.is_empty() {
            return Err(GpurmError::NoDeviceFound);
        }
        Ok(Self { ids })
    }

    /// Number of devices
    pub fn device_count(&self) -> u32 {
        self.ids.len() as u32
    }

    /// Device ids, ascending
    pub fn list_ids(&self) -> &BTreeSet<u32> {
        &self.ids
    }

    pub fn contains(&self, device_id: u32) -> bool {
        self.ids.contains(&device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpurm_runtime::simulated::simulated_device;
    use gpurm_runtime::SimulatedBackend;

    #[tokio::test]
    async fn test_discover() {
        let backend = SimulatedBackend::new(vec![
            simulated_device(8000, 0, 0.0),
            simulated_device(8000, 0, 0.0),
            simulated_device(8000, 0, 0.0),
        ]);

        let registry = DeviceRegistry::discover(&backend).await.unwrap();
        assert_eq!(registry.device_count(), 3);
        assert_eq!(registry.list_ids().len(), 3);
        assert!(registry.contains(2));
        assert!(!registry.contains(3));
    }

    #[tokio::test]
    async fn test_no_devices() {
        let backend = SimulatedBackend::new(Vec::new());
        let result = DeviceRegistry::discover(&backend).await;
        assert!(matches!(result, Err(GpurmError::NoDeviceFound)));
    }

    #[tokio::test]
    async fn test_backend_unavailable() {
        let backend = SimulatedBackend::new(vec![simulated_device(8000, 0, 0.0)]);
        backend.set_unavailable(true);

        let result = DeviceRegistry::discover(&backend).await;
        assert!(matches!(result, Err(GpurmError::BackendUnavailable(_))));
    }

    #[test]
    fn test_from_ids_dedups() {
        let registry = DeviceRegistry::from_ids([1, 0, 1]).unwrap();
        assert_eq!(registry.device_count(), 2);
        assert_eq!(
            registry.list_ids().iter().copied().collect::<Vec<_>>(),
            vec![0, 1]
        );
    }
}
