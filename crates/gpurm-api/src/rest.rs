//! REST API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use gpurm_core::{ApiConfig, CleanupReport, DeviceSnapshot, GpurmError, SystemMemoryUsage};
use gpurm_scheduler::{AllocationGuard, GpuResourceManager, Reservation};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

/// Application state shared across handlers
pub struct AppState {
    pub manager: Arc<GpuResourceManager>,
    /// Allocations held on behalf of remote callers
    pub leases: Mutex<HashMap<Uuid, AllocationGuard>>,
}

type ApiError = (StatusCode, String);

fn error_response(err: GpurmError) -> ApiError {
    let status = match err {
        GpurmError::DeviceNotFound(_) | GpurmError::ReservationNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        GpurmError::InsufficientGpuMemory { .. } | GpurmError::BackendUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

/// Create the API router
pub fn create_router(manager: Arc<GpuResourceManager>, config: &ApiConfig) -> Router {
    let state = Arc::new(AppState {
        manager,
        leases: Mutex::new(HashMap::new()),
    });

    let router = Router::new()
        .route("/health", get(health))
        .route("/api/v1/gpus", get(list_gpus))
        .route("/api/v1/gpus/:id", get(get_gpu))
        .route("/api/v1/gpus/cleanup", post(cleanup))
        .route("/api/v1/system/memory", get(system_memory))
        .route("/api/v1/allocations", post(allocate))
        .route("/api/v1/allocations", get(list_allocations))
        .route("/api/v1/allocations/:id", delete(release_allocation))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.cors_enabled {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub gpu_count: u32,
    pub gpu_stats: BTreeMap<u32, DeviceSnapshot>,
}

/// Check server health and GPU status
async fn health(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, ApiError> {
    let gpu_stats = state.manager.get_stats(None).await.map_err(error_response)?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        gpu_count: state.manager.registry().device_count(),
        gpu_stats,
    }))
}

/// Get telemetry for every GPU
async fn list_gpus(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DeviceSnapshot>>, ApiError> {
    let stats = state.manager.get_stats(None).await.map_err(error_response)?;
    Ok(Json(stats.into_values().collect()))
}

/// Get telemetry for one GPU
async fn get_gpu(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u32>,
) -> Result<Json<DeviceSnapshot>, ApiError> {
    let mut stats = state
        .manager
        .get_stats(Some(id))
        .await
        .map_err(error_response)?;
    stats
        .remove(&id)
        .map(Json)
        .ok_or_else(|| error_response(GpurmError::DeviceNotFound(id)))
}

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    pub device_id: Option<u32>,
}

/// Clear cached GPU memory
async fn cleanup(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CleanupQuery>,
) -> Result<Json<CleanupReport>, ApiError> {
    info!(device_id = ?query.device_id, "Cleaning up GPU memory");

    let report = state
        .manager
        .cleanup(query.device_id)
        .await
        .map_err(error_response)?;
    Ok(Json(report))
}

/// Get host memory usage
async fn system_memory(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SystemMemoryUsage>, ApiError> {
    let usage = state
        .manager
        .system_memory_usage()
        .map_err(error_response)?;
    Ok(Json(usage))
}

/// Request to allocate a GPU
#[derive(Debug, Default, Deserialize)]
pub struct AllocateRequest {
    /// Minimum free memory in MB; the configured default when omitted
    #[serde(default)]
    pub required_memory_mb: Option<u64>,
}

/// Response for a held allocation
#[derive(Debug, Serialize)]
pub struct LeaseResponse {
    pub id: Uuid,
    pub device_id: u32,
    pub memory_mb: u64,
}

impl From<&Reservation> for LeaseResponse {
    fn from(reservation: &Reservation) -> Self {
        Self {
            id: reservation.id,
            device_id: reservation.device_id,
            memory_mb: reservation.memory_mb,
        }
    }
}

/// Allocate a GPU and hold it until released
async fn allocate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AllocateRequest>,
) -> Result<(StatusCode, Json<LeaseResponse>), ApiError> {
    let required = req
        .required_memory_mb
        .unwrap_or_else(|| state.manager.default_request_mb());

    let guard = state
        .manager
        .allocate(required)
        .await
        .map_err(error_response)?;
    let response = LeaseResponse::from(guard.reservation());

    state.leases.lock().await.insert(response.id, guard);
    Ok((StatusCode::CREATED, Json(response)))
}

/// List active allocations
async fn list_allocations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Reservation>>, ApiError> {
    Ok(Json(state.manager.reservations()))
}

/// Release an allocation
async fn release_allocation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let guard = state.leases.lock().await.remove(&id);

    match guard {
        Some(guard) => {
            info!(reservation_id = %id, device_id = guard.device_id(), "Releasing allocation");
            guard.release();
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(error_response(GpurmError::ReservationNotFound(id))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use gpurm_core::AllocatorConfig;
    use gpurm_runtime::simulated::simulated_device;
    use gpurm_runtime::{SimulatedBackend, SysinfoHost};
    use serde_json::Value;
    use tower::ServiceExt;

    async fn test_router() -> (Router, Arc<GpuResourceManager>) {
        let backend = Arc::new(SimulatedBackend::new(vec![
            simulated_device(10000, 8000, 10.0),
            simulated_device(10000, 2000, 10.0),
        ]));
        let manager = Arc::new(
            GpuResourceManager::start(
                backend.clone(),
                backend,
                Arc::new(SysinfoHost::new()),
                &AllocatorConfig::default(),
            )
            .await
            .unwrap(),
        );
        (
            create_router(Arc::clone(&manager), &ApiConfig::default()),
            manager,
        )
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, value)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (router, _) = test_router().await;
        let (status, body) = send(&router, get("/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["gpu_count"], 2);
        assert_eq!(body["gpu_stats"]["1"]["memory_free_mb"], 8000);
    }

    #[tokio::test]
    async fn test_gpu_endpoints() {
        let (router, _) = test_router().await;

        let (status, body) = send(&router, get("/api/v1/gpus")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().map(Vec::len), Some(2));

        let (status, body) = send(&router, get("/api/v1/gpus/0")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["memory_used_mb"], 8000);

        let (status, _) = send(&router, get("/api/v1/gpus/5")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_allocation_lifecycle() {
        let (router, manager) = test_router().await;

        let (status, lease) = send(
            &router,
            post_json("/api/v1/allocations", r#"{"required_memory_mb": 4000}"#),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(lease["device_id"], 1);
        assert_eq!(manager.pledged_mb(1), 4000);

        let (_, list) = send(&router, get("/api/v1/allocations")).await;
        assert_eq!(list.as_array().map(Vec::len), Some(1));

        let id = lease["id"].as_str().unwrap().to_string();
        let delete = || {
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/v1/allocations/{}", id))
                .body(Body::empty())
                .unwrap()
        };

        let (status, _) = send(&router, delete()).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(manager.pledged_mb(1), 0);

        let (status, _) = send(&router, delete()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_allocation_uses_default_size() {
        let (router, _) = test_router().await;

        let (status, lease) = send(&router, post_json("/api/v1/allocations", "{}")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(lease["memory_mb"], 4000);
    }

    #[tokio::test]
    async fn test_insufficient_memory_is_unavailable() {
        let (router, _) = test_router().await;

        let (status, _) = send(
            &router,
            post_json("/api/v1/allocations", r#"{"required_memory_mb": 9000}"#),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_cleanup() {
        let (router, _) = test_router().await;

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/gpus/cleanup")
            .body(Body::empty())
            .unwrap();
        let (status, report) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["cleaned"], serde_json::json!([0, 1]));

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/gpus/cleanup?device_id=7")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&router, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_system_memory() {
        let (router, _) = test_router().await;
        let (status, body) = send(&router, get("/api/v1/system/memory")).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["total_mb"].as_u64().unwrap() > 0);
    }
}
