//! gpurm-scheduler: GPU selection and reservation tracking
//!
//! This crate provides the decision logic of gpurm:
//! - Normalized device telemetry
//! - Device discovery at startup
//! - Allocation scoring
//! - Scoped, concurrency-safe memory reservations

pub mod manager;
pub mod registry;
pub mod reservation;
pub mod scorer;
pub mod telemetry;

pub use manager::{AllocationCounters, AllocationGuard, GpuResourceManager};
pub use registry::DeviceRegistry;
pub use reservation::{Reservation, ReservationLedger};
pub use scorer::{AllocationScorer, ScoringWeights};
pub use telemetry::DeviceTelemetryProvider;
