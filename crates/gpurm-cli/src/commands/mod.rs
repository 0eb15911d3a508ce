//! CLI commands implementation

use anyhow::Result;
use chrono::{DateTime, Utc};
use gpurm_core::{CleanupReport, DeviceSnapshot, SystemMemoryUsage};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// API client for communicating with the daemon
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Allocation response from API
#[derive(Debug, Deserialize)]
pub struct LeaseResponse {
    pub id: Uuid,
    pub device_id: u32,
    pub memory_mb: u64,
}

/// Active reservation from API
#[derive(Debug, Deserialize)]
pub struct ReservationResponse {
    pub id: Uuid,
    pub device_id: u32,
    pub memory_mb: u64,
    pub created_at: DateTime<Utc>,
}

/// Show GPU telemetry
pub async fn gpus(client: &ApiClient, device: Option<u32>) -> Result<()> {
    let path = match device {
        Some(id) => format!("/api/v1/gpus/{}", id),
        None => "/api/v1/gpus".to_string(),
    };
    let response = client.client.get(client.url(&path)).send().await?;

    if response.status().is_success() {
        let devices: Vec<DeviceSnapshot> = match device {
            Some(_) => vec![response.json().await?],
            None => response.json().await?,
        };

        if devices.is_empty() {
            println!("No GPUs found");
            return Ok(());
        }

        println!(
            "{:<4} {:<24} {:>6} {:>18} {:>7} {:>8}",
            "ID", "NAME", "UTIL", "MEMORY (MB)", "TEMP", "POWER"
        );
        println!("{}", "-".repeat(72));
        for snapshot in &devices {
            println!("{}", format_device(snapshot));
        }
    } else {
        let error = response.text().await?;
        eprintln!("Failed to get GPU info: {}", error);
    }

    Ok(())
}

/// Show host memory usage
pub async fn memory(client: &ApiClient) -> Result<()> {
    let response = client
        .client
        .get(client.url("/api/v1/system/memory"))
        .send()
        .await?;

    if response.status().is_success() {
        let usage: SystemMemoryUsage = response.json().await?;
        println!("Host memory");
        println!("  Total: {} MB", usage.total_mb);
        println!("  Used:  {} MB ({:.1}%)", usage.used_mb, usage.percent);
        println!("  Free:  {} MB", usage.free_mb);
    } else {
        let error = response.text().await?;
        eprintln!("Failed to get memory usage: {}", error);
    }

    Ok(())
}

/// Clear cached GPU memory
pub async fn cleanup(client: &ApiClient, device: Option<u32>) -> Result<()> {
    let mut request = client.client.post(client.url("/api/v1/gpus/cleanup"));
    if let Some(id) = device {
        request = request.query(&[("device_id", id)]);
    }
    let response = request.send().await?;

    if response.status().is_success() {
        let report: CleanupReport = response.json().await?;
        for id in &report.cleaned {
            println!("GPU {} cleaned", id);
        }
        for (id, error) in &report.failed {
            eprintln!("GPU {} cleanup failed: {}", id, error);
        }
    } else {
        let error = response.text().await?;
        eprintln!("Failed to clean up GPU memory: {}", error);
    }

    Ok(())
}

/// Reserve the best GPU
pub async fn allocate(client: &ApiClient, memory: Option<u64>) -> Result<()> {
    #[derive(Serialize)]
    struct AllocateRequest {
        #[serde(skip_serializing_if = "Option::is_none")]
        required_memory_mb: Option<u64>,
    }

    let response = client
        .client
        .post(client.url("/api/v1/allocations"))
        .json(&AllocateRequest {
            required_memory_mb: memory,
        })
        .send()
        .await?;

    if response.status().is_success() {
        let lease: LeaseResponse = response.json().await?;
        debug!(id = %lease.id, "Allocation granted");
        println!("Allocated GPU {}", lease.device_id);
        println!("  ID: {}", lease.id);
        println!("  Reserved: {} MB", lease.memory_mb);
    } else {
        let error = response.text().await?;
        eprintln!("Failed to allocate GPU: {}", error);
    }

    Ok(())
}

/// Release an allocation
pub async fn release(client: &ApiClient, id: Uuid) -> Result<()> {
    let response = client
        .client
        .delete(client.url(&format!("/api/v1/allocations/{}", id)))
        .send()
        .await?;

    if response.status().is_success() {
        println!("Allocation {} released", id);
    } else {
        let error = response.text().await?;
        eprintln!("Failed to release allocation: {}", error);
    }

    Ok(())
}

/// List active allocations
pub async fn leases(client: &ApiClient) -> Result<()> {
    let response = client
        .client
        .get(client.url("/api/v1/allocations"))
        .send()
        .await?;

    if response.status().is_success() {
        let reservations: Vec<ReservationResponse> = response.json().await?;

        if reservations.is_empty() {
            println!("No active allocations");
        } else {
            println!(
                "{:<38} {:<6} {:>12} {:<20}",
                "ID", "GPU", "MEMORY (MB)", "CREATED"
            );
            println!("{}", "-".repeat(80));
            for r in reservations {
                println!(
                    "{:<38} {:<6} {:>12} {:<20}",
                    r.id,
                    r.device_id,
                    r.memory_mb,
                    r.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
    } else {
        let error = response.text().await?;
        eprintln!("Failed to list allocations: {}", error);
    }

    Ok(())
}

/// One table row for a device
fn format_device(snapshot: &DeviceSnapshot) -> String {
    let memory = format!("{}/{}", snapshot.memory_used_mb, snapshot.memory_total_mb);
    let power = if snapshot.power_draw_w > 0.0 {
        format!("{:.0}W", snapshot.power_draw_w)
    } else {
        "-".to_string()
    };
    format!(
        "{:<4} {:<24} {:>5.1}% {:>18} {:>6.0}C {:>8}",
        snapshot.id,
        snapshot.name.as_deref().unwrap_or("-"),
        snapshot.utilization_pct,
        memory,
        snapshot.temperature_c,
        power
    )
}
