//! REST API handlers.
//!
//! Handlers only touch desired state (workloads) and read everything else.
//! Pools, pods, ledgers and status belong to the controller and the
//! pod-group driver.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::info;

use gratefulset_state::{
    GratefulSet, HookConfig, PodTemplate, StructuralSpec, Substrate, epoch_secs,
};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Workloads ──────────────────────────────────────────────────

/// Body of `POST /api/v1/workloads`.
#[derive(Debug, Deserialize)]
pub struct WorkloadRequest {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    pub replicas: u32,
    pub template: PodTemplate,
    #[serde(default)]
    pub structure: StructuralSpec,
    #[serde(default)]
    pub hooks: HookConfig,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl WorkloadRequest {
    fn validate(&self) -> Result<(), String> {
        for (field, value) in [("namespace", &self.namespace), ("name", &self.name)] {
            if value.is_empty() {
                return Err(format!("{field} must not be empty"));
            }
            if value.contains('/') || value.contains(':') {
                return Err(format!("{field} must not contain '/' or ':'"));
            }
        }
        Ok(())
    }

    fn into_workload(self, existing: Option<&GratefulSet>) -> GratefulSet {
        let now = epoch_secs();
        let mut structure = self.structure;
        if structure.service_name.is_empty() {
            structure.service_name = self.name.clone();
        }
        GratefulSet {
            id: format!("{}/{}", self.namespace, self.name),
            namespace: self.namespace,
            name: self.name,
            replicas: self.replicas,
            template: self.template,
            structure,
            hooks: self.hooks,
            created_at: existing.map_or(now, |w| w.created_at),
            updated_at: now,
            resource_version: existing.map_or(0, |w| w.resource_version),
        }
    }
}

/// GET /api/v1/workloads
pub async fn list_workloads(State(state): State<ApiState>) -> impl IntoResponse {
    match state.substrate.list_workloads() {
        Ok(workloads) => ApiResponse::ok(workloads).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/workloads/{id}
pub async fn get_workload(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.substrate.get_workload(&id) {
        Ok(Some(workload)) => ApiResponse::ok(workload).into_response(),
        Ok(None) => error_response("workload not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// POST /api/v1/workloads
pub async fn put_workload(State(state): State<ApiState>, Json(req): Json<WorkloadRequest>) -> impl IntoResponse {
    if let Err(msg) = req.validate() {
        return error_response(&msg, StatusCode::BAD_REQUEST).into_response();
    }
    let id = format!("{}/{}", req.namespace, req.name);
    let existing = match state.substrate.get_workload(&id) {
        Ok(existing) => existing,
        Err(e) => return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    };

    let workload = req.into_workload(existing.as_ref());
    match state.substrate.put_workload(&workload) {
        Ok(stored) => {
            info!(workload = %stored.id, replicas = stored.replicas, "workload submitted");
            let status = if existing.is_some() {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            (status, ApiResponse::ok(stored)).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// DELETE /api/v1/workloads/{id}
pub async fn delete_workload(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.substrate.delete_workload(&id) {
        Ok(true) => {
            info!(workload = %id, "workload deleted");
            ApiResponse::ok("deleted").into_response()
        }
        Ok(false) => error_response("workload not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Scaling ────────────────────────────────────────────────────

/// Scale request body.
#[derive(Debug, Deserialize)]
pub struct ScaleRequest {
    pub replicas: u32,
}

/// POST /api/v1/workloads/{id}/scale
pub async fn scale_workload(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<ScaleRequest>,
) -> impl IntoResponse {
    let mut workload = match state.substrate.get_workload(&id) {
        Ok(Some(workload)) => workload,
        Ok(None) => return error_response("workload not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    };
    let from = workload.replicas;
    workload.replicas = req.replicas;
    workload.updated_at = epoch_secs();

    match state.substrate.put_workload(&workload) {
        Ok(stored) => {
            info!(workload = %id, from, to = stored.replicas, "scale requested");
            ApiResponse::ok(serde_json::json!({
                "workload": id,
                "from": from,
                "replicas": stored.replicas,
            }))
            .into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Observed state ─────────────────────────────────────────────

/// GET /api/v1/workloads/{id}/status
pub async fn get_status(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.substrate.get_status(&id) {
        Ok(Some(status)) => ApiResponse::ok(status).into_response(),
        Ok(None) => error_response("no status recorded yet", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/workloads/{id}/pools
pub async fn list_pools(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.substrate.list_pools(&id) {
        Ok(pools) => ApiResponse::ok(pools).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/workloads/{id}/pods
pub async fn list_pods(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.substrate.list_pods(&id) {
        Ok(pods) => ApiResponse::ok(pods).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/workloads/{id}/ledger
pub async fn get_ledger(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.substrate.get_ledger(&id) {
        Ok(Some(doc)) => ApiResponse::ok(doc).into_response(),
        Ok(None) => error_response("ledger not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}
