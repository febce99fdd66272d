use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;

use flowdeploy_common::{ExceptionNotification, FlowModel, FlowRoutePlan, ProfilingRequest, Result};

use crate::metrics::{metrics_handler, SharedMetrics};
use crate::orchestrator::{DeployResult, DeploymentOrchestrator, ModelSummary};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<DeploymentOrchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<DeploymentOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn metrics(&self) -> &SharedMetrics {
        self.orchestrator.context().metrics()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/v1/models", post(deploy_model).get(list_models))
        .route("/v1/models/:id", delete(undeploy_model))
        .route("/v1/models/:id/routes", get(route_plans))
        .route("/v1/models/:id/exception", post(notify_exception))
        .route("/v1/profiling", post(profiling))
        .route("/v1/nodes/:id/mesh", get(mesh_index))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn deploy_model(State(st): State<AppState>, Json(model): Json<FlowModel>) -> Result<Json<DeployResult>> {
    Ok(Json(st.orchestrator.deploy_model(model).await?))
}

async fn list_models(State(st): State<AppState>) -> Json<Vec<ModelSummary>> {
    Json(st.orchestrator.list_models().await)
}

async fn undeploy_model(State(st): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse> {
    st.orchestrator.undeploy(&id).await?;
    Ok(Json(json!({ "model_id": id, "removed": true })))
}

async fn route_plans(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BTreeMap<i32, FlowRoutePlan>>> {
    Ok(Json(st.orchestrator.route_plans(&id).await?))
}

async fn notify_exception(
    State(st): State<AppState>,
    Path(id): Path<String>,
    Json(n): Json<ExceptionNotification>,
) -> Result<impl IntoResponse> {
    st.orchestrator.notify_exception(&id, n).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn profiling(State(st): State<AppState>, Json(req): Json<ProfilingRequest>) -> Result<impl IntoResponse> {
    st.orchestrator.update_profiling_info(req.enable).await?;
    Ok(Json(json!({ "enable": req.enable })))
}

async fn mesh_index(State(st): State<AppState>, Path(node_id): Path<i32>) -> Result<impl IntoResponse> {
    let mesh = st.orchestrator.get_device_mesh_index(node_id).await?;
    Ok(Json(json!({ "node_id": node_id, "mesh_index": mesh })))
}
