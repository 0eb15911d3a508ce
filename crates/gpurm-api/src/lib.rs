//! gpurm-api: HTTP surface for gpurm
//!
//! This crate provides:
//! - The REST API used by serving processes (stats, leases, cleanup)
//! - The Prometheus scrape endpoint

pub mod metrics;
pub mod rest;

pub use metrics::metrics_router;
pub use rest::create_router;
