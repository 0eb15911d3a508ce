//! Error types for gpurm

use thiserror::Error;
use uuid::Uuid;

/// Main error type for gpurm
#[derive(Error, Debug)]
pub enum GpurmError {
    /// Telemetry or compute backend could not be reached
    #[error("GPU backend unavailable: {0}")]
    BackendUnavailable(String),

    /// No accelerator was detected at startup
    #[error("No GPU device found")]
    NoDeviceFound,

    /// No device can currently satisfy the requested memory
    #[error("No GPU with required memory ({requested_mb}MB) available")]
    InsufficientGpuMemory { requested_mb: u64 },

    /// Query for a device index that does not exist
    #[error("GPU device not found: {0}")]
    DeviceNotFound(u32),

    /// Release of a reservation that is not active
    #[error("Reservation not found: {0}")]
    ReservationNotFound(Uuid),

    /// Operation the backend cannot perform
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// API error
    #[error("API error: {0}")]
    Api(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GpurmError {
    /// Whether a caller may reasonably retry the operation later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GpurmError::InsufficientGpuMemory { .. } | GpurmError::BackendUnavailable(_)
        )
    }
}

/// Result type for gpurm operations
pub type GpurmResult<T> = Result<T, GpurmError>;

impl From<serde_json::Error> for GpurmError {
    fn from(err: serde_json::Error) -> Self {
        GpurmError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for GpurmError {
    fn from(err: toml::de::Error) -> Self {
        GpurmError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GpurmError::InsufficientGpuMemory { requested_mb: 3000 };
        assert_eq!(
            err.to_string(),
            "No GPU with required memory (3000MB) available"
        );

        let err = GpurmError::DeviceNotFound(7);
        assert_eq!(err.to_string(), "GPU device not found: 7");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: GpurmError = io_err.into();
        assert!(matches!(err, GpurmError::Io(_)));
    }

    #[test]
    fn test_retryable() {
        assert!(GpurmError::InsufficientGpuMemory { requested_mb: 1 }.is_retryable());
        assert!(GpurmError::BackendUnavailable("driver".to_string()).is_retryable());
        assert!(!GpurmError::NoDeviceFound.is_retryable());
        assert!(!GpurmError::DeviceNotFound(0).is_retryable());
    }
}
