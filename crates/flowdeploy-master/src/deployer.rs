use std::time::Duration;

use serde::Serialize;

use flowdeploy_common::{
    DeployError, DeployRequest, DeployResponse, ErrorBody, ExceptionNotification,
    ProfilingRequest, Result, UndeployRequest,
};
use flowdeploy_node::NodeRuntime;

/// Node agent reached over HTTP.
#[derive(Clone)]
pub struct RemoteDeployer {
    node_id: i32,
    base_url: String,
    http: reqwest::Client,
}

fn classify_reqwest_error(error: &reqwest::Error) -> &'static str {
    if error.is_timeout() {
        return "timeout";
    }
    if error.is_connect() {
        return "connect";
    }
    "other"
}

impl RemoteDeployer {
    pub fn new(node_id: i32, base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            node_id,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(30))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                DeployError::failed(format!(
                    "node {} unreachable ({}): {e}",
                    self.node_id,
                    classify_reqwest_error(&e)
                ))
            })?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        match resp.json::<ErrorBody>().await {
            Ok(body) => Err(body.into_error()),
            Err(_) => Err(DeployError::failed(format!(
                "node {} answered {status} on {path}",
                self.node_id
            ))),
        }
    }

    async fn deploy(&self, req: &DeployRequest) -> Result<DeployResponse> {
        self.post("/v1/deploy", req)
            .await?
            .json()
            .await
            .map_err(|e| DeployError::failed(format!("node {}: bad deploy response: {e}", self.node_id)))
    }
}

/// Target of per-node dispatch: the master's own node runtime or a remote
/// node agent.
#[derive(Clone)]
pub enum Deployer {
    Local(NodeRuntime),
    Remote(RemoteDeployer),
}

impl Deployer {
    pub fn node_id(&self) -> i32 {
        match self {
            Deployer::Local(rt) => rt.node_id(),
            Deployer::Remote(r) => r.node_id,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Deployer::Local(_))
    }

    pub async fn deploy(&self, req: &DeployRequest) -> Result<DeployResponse> {
        match self {
            Deployer::Local(rt) => rt.deploy(req.clone()).await,
            Deployer::Remote(r) => r.deploy(req).await,
        }
    }

    pub async fn undeploy(&self, model_id: &str) -> Result<()> {
        match self {
            Deployer::Local(rt) => {
                rt.undeploy(model_id).await;
                Ok(())
            }
            Deployer::Remote(r) => {
                let req = UndeployRequest {
                    model_id: model_id.to_string(),
                };
                r.post("/v1/undeploy", &req).await.map(|_| ())
            }
        }
    }

    pub async fn notify_exception(&self, notification: &ExceptionNotification) -> Result<()> {
        match self {
            Deployer::Local(rt) => rt.notify_exception(notification).await.map(|_| ()),
            Deployer::Remote(r) => r.post("/v1/exception", notification).await.map(|_| ()),
        }
    }

    pub async fn set_profiling(&self, enable: bool) -> Result<()> {
        match self {
            Deployer::Local(rt) => {
                rt.set_profiling(enable);
                Ok(())
            }
            Deployer::Remote(r) => r
                .post("/v1/profiling", &ProfilingRequest { enable })
                .await
                .map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowdeploy_common::{FlowRoutePlan, StatusCode};

    async fn spawn_node(node_id: i32) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, flowdeploy_node::api::router(NodeRuntime::new(node_id)))
                .await
                .unwrap();
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn test_remote_deploy_and_error_mapping() {
        let base = spawn_node(2).await;
        let d = Deployer::Remote(RemoteDeployer::new(2, base, reqwest::Client::new()));
        let req = DeployRequest {
            model_id: "m".into(),
            node_id: 2,
            route_plan: FlowRoutePlan::empty(2),
            submodels: vec![],
        };
        assert_eq!(d.deploy(&req).await.unwrap().node_id, 2);
        // the node rejects the duplicate with ParamInvalid, which survives the hop
        let err = d.deploy(&req).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::ParamInvalid);
        d.undeploy("m").await.unwrap();
        d.set_profiling(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_node_fails() {
        let d = Deployer::Remote(RemoteDeployer::new(
            9,
            "http://127.0.0.1:1",
            reqwest::Client::new(),
        ));
        let err = d.undeploy("m").await.unwrap_err();
        assert_eq!(err.status(), StatusCode::Failed);
    }
}
