use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use flowdeploy_common::{
    AbnormalReport, DeployRequest, DeployResponse, ExceptionNotification, ProfilingRequest,
    UndeployRequest,
};

use crate::runtime::{InstalledModel, NodeRuntime};

pub fn router(runtime: NodeRuntime) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/deploy", post(deploy))
        .route("/v1/undeploy", post(undeploy))
        .route("/v1/exception", post(exception))
        .route("/v1/profiling", post(profiling))
        .route("/v1/abnormal", post(report_abnormal).get(abnormal).delete(clear_abnormal))
        .route("/v1/models", get(models))
        .with_state(runtime)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn deploy(
    State(rt): State<NodeRuntime>,
    Json(req): Json<DeployRequest>,
) -> flowdeploy_common::Result<Json<DeployResponse>> {
    Ok(Json(rt.deploy(req).await?))
}

async fn undeploy(State(rt): State<NodeRuntime>, Json(req): Json<UndeployRequest>) -> impl IntoResponse {
    let removed = rt.undeploy(&req.model_id).await;
    Json(json!({ "model_id": req.model_id, "removed": removed }))
}

async fn exception(
    State(rt): State<NodeRuntime>,
    Json(n): Json<ExceptionNotification>,
) -> flowdeploy_common::Result<impl IntoResponse> {
    let affected = rt.notify_exception(&n).await?;
    Ok(Json(json!({ "model_id": n.model_id, "affected": affected })))
}

async fn profiling(State(rt): State<NodeRuntime>, Json(req): Json<ProfilingRequest>) -> impl IntoResponse {
    rt.set_profiling(req.enable);
    Json(json!({ "enable": rt.is_profiling() }))
}

async fn report_abnormal(
    State(rt): State<NodeRuntime>,
    Json(report): Json<AbnormalReport>,
) -> impl IntoResponse {
    rt.report_abnormal(report).await;
    StatusCode::NO_CONTENT
}

async fn abnormal(State(rt): State<NodeRuntime>) -> Json<AbnormalReport> {
    Json(rt.abnormal_snapshot().await)
}

async fn clear_abnormal(State(rt): State<NodeRuntime>) -> impl IntoResponse {
    rt.clear_abnormal().await;
    StatusCode::NO_CONTENT
}

async fn models(State(rt): State<NodeRuntime>) -> Json<Vec<InstalledModel>> {
    Json(rt.models().await)
}
