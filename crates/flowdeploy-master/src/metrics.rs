use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::State;
use axum::response::IntoResponse;

use crate::api::AppState;

/// Shared metrics for the master, safe for concurrent access.
#[derive(Debug, Default)]
pub struct SharedMetrics {
    /// Successful deployments.
    pub deploy_total: AtomicU64,
    /// Deployments aborted during planning or dispatch.
    pub deploy_failures_total: AtomicU64,
    pub undeploy_total: AtomicU64,
    /// Full redeploys completed.
    pub redeploy_total: AtomicU64,
    /// Partial recoveries completed.
    pub partial_recover_total: AtomicU64,
    /// Redeploy callbacks that failed or panicked.
    pub callback_errors_total: AtomicU64,
    /// Currently deployed models (gauge).
    pub deployed_models: AtomicU64,
    /// Nodes marked abnormal by heartbeat loss or staleness.
    pub abnormal_nodes_total: AtomicU64,
}

impl SharedMetrics {
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render(&self) -> String {
        let rows: [(&str, &str, &str, &AtomicU64); 8] = [
            ("deploy_total", "counter", "Successful deployments.", &self.deploy_total),
            ("deploy_failures_total", "counter", "Aborted deployments.", &self.deploy_failures_total),
            ("undeploy_total", "counter", "Undeployed models.", &self.undeploy_total),
            ("redeploy_total", "counter", "Full redeploys completed.", &self.redeploy_total),
            ("partial_recover_total", "counter", "Partial recoveries completed.", &self.partial_recover_total),
            ("callback_errors_total", "counter", "Failed redeploy callbacks.", &self.callback_errors_total),
            ("deployed_models", "gauge", "Currently deployed models.", &self.deployed_models),
            ("abnormal_nodes_total", "counter", "Nodes marked abnormal.", &self.abnormal_nodes_total),
        ];
        let mut body = String::new();
        for (name, kind, help, value) in rows {
            body.push_str(&format!(
                "# HELP flowdeploy_{name} {help}\n# TYPE flowdeploy_{name} {kind}\nflowdeploy_{name} {}\n",
                value.load(Ordering::Relaxed)
            ));
        }
        body
    }
}

/// GET /metrics in Prometheus text exposition format.
pub async fn metrics_handler(State(st): State<AppState>) -> impl IntoResponse {
    (axum::http::StatusCode::OK, st.metrics().render())
}
