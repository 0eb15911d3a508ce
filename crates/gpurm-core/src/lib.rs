//! gpurm-core: Core types for the gpurm GPU resource manager
//!
//! This crate provides the fundamental types shared by every gpurm crate:
//! - Device telemetry records and snapshots
//! - Host resource usage types
//! - Configuration types
//! - Error handling

pub mod config;
pub mod error;
pub mod gpu;
pub mod host;

pub use config::*;
pub use error::*;
pub use gpu::*;
pub use host::*;
