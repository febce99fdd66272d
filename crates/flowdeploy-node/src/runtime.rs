use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flowdeploy_common::{
    now_ms, AbnormalReport, DeployError, DeployRequest, DeployResponse, EndpointDescKind,
    ExceptionKind, ExceptionNotification, FlowRoutePlan, Result, SubmodelDeployDesc,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct InstanceState {
    pub desc: SubmodelDeployDesc,
    pub loaded_at_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    pub last_trans_id: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstalledModel {
    pub model_id: String,
    pub route_plan: FlowRoutePlan,
    pub instances: BTreeMap<String, InstanceState>,
}

/// Per-node deployer: owns the wiring and submodel instances of every model
/// deployed on this node.
#[derive(Clone)]
pub struct NodeRuntime {
    node_id: i32,
    models: Arc<Mutex<BTreeMap<String, InstalledModel>>>,
    profiling: Arc<AtomicBool>,
    abnormal: Arc<Mutex<AbnormalReport>>,
}

fn validate_route_plan(plan: &FlowRoutePlan) -> Result<()> {
    let n = plan.endpoints.len();
    for (i, ep) in plan.endpoints.iter().enumerate() {
        if let EndpointDescKind::Group { members, .. } = &ep.kind {
            if let Some(&bad) = members.iter().find(|&&m| m >= n || m == i) {
                return Err(DeployError::param_invalid(format!(
                    "group '{}' has invalid member {bad}",
                    ep.name
                )));
            }
        }
    }
    for b in plan.bindings.iter().chain(&plan.bindings_before_load) {
        if b.src >= n || b.dst >= n {
            return Err(DeployError::param_invalid(format!(
                "binding {} -> {} is out of range ({n} endpoints)",
                b.src, b.dst
            )));
        }
    }
    Ok(())
}

fn validate_instance(plan: &FlowRoutePlan, desc: &SubmodelDeployDesc) -> Result<()> {
    let local_queue = |idx: usize| {
        plan.endpoints.iter().any(|e| {
            matches!(e.kind, EndpointDescKind::Queue { queue_index, .. } if queue_index == idx)
        })
    };
    let missing = desc
        .input_queue_indices
        .iter()
        .chain(&desc.output_queue_indices)
        .find(|&&q| !local_queue(q));
    match missing {
        Some(q) => Err(DeployError::param_invalid(format!(
            "instance '{}' uses queue {q} which is not on node {}",
            desc.instance_name, plan.node_id
        ))),
        None => Ok(()),
    }
}

impl NodeRuntime {
    pub fn new(node_id: i32) -> Self {
        Self {
            node_id,
            models: Arc::new(Mutex::new(BTreeMap::new())),
            profiling: Arc::new(AtomicBool::new(false)),
            abnormal: Arc::new(Mutex::new(AbnormalReport::default())),
        }
    }

    pub fn node_id(&self) -> i32 {
        self.node_id
    }

    /// Install a model: before-load bindings first, then the submodel
    /// instances, then the remaining bindings.
    pub async fn deploy(&self, req: DeployRequest) -> Result<DeployResponse> {
        if req.node_id != self.node_id {
            return Err(DeployError::param_invalid(format!(
                "deploy request for node {} sent to node {}",
                req.node_id, self.node_id
            )));
        }
        validate_route_plan(&req.route_plan)?;

        let mut models = self.models.lock().await;
        if models.contains_key(&req.model_id) {
            return Err(DeployError::param_invalid(format!(
                "model '{}' is already deployed on node {}",
                req.model_id, self.node_id
            )));
        }

        debug!(
            model_id = %req.model_id,
            bindings = req.route_plan.bindings_before_load.len(),
            "wired bindings before load"
        );

        let mut instances = BTreeMap::new();
        for desc in req.submodels {
            validate_instance(&req.route_plan, &desc)?;
            debug!(model_id = %req.model_id, instance = %desc.instance_name, device = %desc.device, "loaded submodel instance");
            instances.insert(
                desc.instance_name.clone(),
                InstanceState {
                    desc,
                    loaded_at_ms: now_ms(),
                    exception: None,
                    last_trans_id: 0,
                },
            );
        }

        let resp = DeployResponse {
            node_id: self.node_id,
            loaded_instances: instances.keys().cloned().collect(),
            endpoints: req.route_plan.endpoints.len(),
        };
        info!(
            model_id = %req.model_id,
            node_id = self.node_id,
            instances = resp.loaded_instances.len(),
            endpoints = resp.endpoints,
            bindings = req.route_plan.bindings.len(),
            "model deployed on node"
        );

        models.insert(
            req.model_id.clone(),
            InstalledModel {
                model_id: req.model_id,
                route_plan: req.route_plan,
                instances,
            },
        );
        Ok(resp)
    }

    /// Returns whether the model was present; undeploying twice is harmless.
    pub async fn undeploy(&self, model_id: &str) -> bool {
        let removed = self.models.lock().await.remove(model_id).is_some();
        if removed {
            self.abnormal
                .lock()
                .await
                .instances
                .retain(|i| i.model_id != model_id);
            info!(model_id = %model_id, node_id = self.node_id, "model undeployed from node");
        }
        removed
    }

    /// Returns the number of instances affected.
    pub async fn notify_exception(&self, notification: &ExceptionNotification) -> Result<usize> {
        let mut models = self.models.lock().await;
        let model = models.get_mut(&notification.model_id).ok_or_else(|| {
            DeployError::param_invalid(format!(
                "model '{}' is not deployed on node {}",
                notification.model_id, self.node_id
            ))
        })?;

        let mut affected = 0;
        for (name, inst) in model.instances.iter_mut() {
            if !notification.instance_names.is_empty() && !notification.instance_names.contains(name) {
                continue;
            }
            match notification.kind {
                ExceptionKind::Raise => {
                    inst.exception = Some(
                        notification
                            .message
                            .clone()
                            .unwrap_or_else(|| "exception raised".to_string()),
                    );
                }
                ExceptionKind::ClearExceptionData => inst.exception = None,
            }
            inst.last_trans_id = notification.trans_id;
            affected += 1;
        }
        drop(models);

        if notification.kind == ExceptionKind::ClearExceptionData {
            self.abnormal.lock().await.instances.retain(|i| {
                i.model_id != notification.model_id
                    || (!notification.instance_names.is_empty()
                        && !notification.instance_names.contains(&i.instance_name))
            });
        }

        info!(
            model_id = %notification.model_id,
            kind = ?notification.kind,
            affected,
            "exception notification applied"
        );
        Ok(affected)
    }

    pub fn set_profiling(&self, enable: bool) {
        self.profiling.store(enable, Ordering::Relaxed);
        info!(node_id = self.node_id, enable, "profiling updated");
    }

    pub fn is_profiling(&self) -> bool {
        self.profiling.load(Ordering::Relaxed)
    }

    /// Merge local faults into the report carried by the next heartbeat.
    pub async fn report_abnormal(&self, report: AbnormalReport) {
        let mut current = self.abnormal.lock().await;
        for d in report.devices {
            if !current.devices.contains(&d) {
                current.devices.push(d);
            }
        }
        for i in report.instances {
            if !current.instances.contains(&i) {
                current.instances.push(i);
            }
        }
    }

    pub async fn clear_abnormal(&self) {
        *self.abnormal.lock().await = AbnormalReport::default();
    }

    pub async fn abnormal_snapshot(&self) -> AbnormalReport {
        self.abnormal.lock().await.clone()
    }

    pub async fn models(&self) -> Vec<InstalledModel> {
        self.models.lock().await.values().cloned().collect()
    }

    pub async fn model(&self, model_id: &str) -> Option<InstalledModel> {
        self.models.lock().await.get(model_id).cloned()
    }

    pub async fn model_count(&self) -> usize {
        self.models.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowdeploy_common::{AbnormalInstance, DeviceInfo, EndpointDesc, EnqueuePolicy, RouteBinding};

    fn make_queue(name: &str, index: usize) -> EndpointDesc {
        EndpointDesc {
            name: name.into(),
            kind: EndpointDescKind::Queue {
                queue_index: index,
                depth: 8,
                enqueue_policy: EnqueuePolicy::Fifo,
                device_key: "0:1:0".into(),
            },
        }
    }

    fn make_request(model_id: &str) -> DeployRequest {
        let dev = DeviceInfo::accelerator(0, 1, 0, vec![0], "Ascend");
        DeployRequest {
            model_id: model_id.into(),
            node_id: 1,
            route_plan: FlowRoutePlan {
                node_id: 1,
                endpoints: vec![make_queue("in", 3), make_queue("out", 4)],
                bindings: vec![],
                bindings_before_load: vec![RouteBinding { src: 0, dst: 1 }],
            },
            submodels: vec![SubmodelDeployDesc {
                model_name: "A".into(),
                instance_name: "A".into(),
                device: dev.clone(),
                queue_device: dev,
                input_queue_indices: vec![3],
                output_queue_indices: vec![4],
                is_head: false,
                artifact: None,
            }],
        }
    }

    #[tokio::test]
    async fn test_deploy_and_undeploy() {
        let rt = NodeRuntime::new(1);
        let resp = rt.deploy(make_request("m-1")).await.unwrap();
        assert_eq!(resp.loaded_instances, vec!["A".to_string()]);
        assert_eq!(rt.model_count().await, 1);

        // second deploy of the same id is rejected
        assert!(rt.deploy(make_request("m-1")).await.is_err());

        assert!(rt.undeploy("m-1").await);
        assert!(!rt.undeploy("m-1").await);
        assert_eq!(rt.model_count().await, 0);
    }

    #[tokio::test]
    async fn test_rejects_foreign_queue_and_bad_binding() {
        let rt = NodeRuntime::new(1);
        let mut req = make_request("m-1");
        req.submodels[0].input_queue_indices = vec![99];
        assert!(rt.deploy(req).await.is_err());

        let mut req = make_request("m-2");
        req.route_plan.bindings.push(RouteBinding { src: 0, dst: 5 });
        assert!(rt.deploy(req).await.is_err());

        let mut req = make_request("m-3");
        req.node_id = 2;
        assert!(rt.deploy(req).await.is_err());
        assert_eq!(rt.model_count().await, 0);
    }

    #[tokio::test]
    async fn test_exception_raise_and_clear() {
        let rt = NodeRuntime::new(1);
        rt.deploy(make_request("m-1")).await.unwrap();
        rt.report_abnormal(AbnormalReport {
            devices: vec![],
            instances: vec![AbnormalInstance {
                model_id: "m-1".into(),
                instance_name: "A".into(),
            }],
        })
        .await;

        let raise = ExceptionNotification {
            model_id: "m-1".into(),
            kind: ExceptionKind::Raise,
            trans_id: 7,
            instance_names: vec![],
            message: Some("bad input".into()),
        };
        assert_eq!(rt.notify_exception(&raise).await.unwrap(), 1);
        let model = rt.model("m-1").await.unwrap();
        assert_eq!(model.instances["A"].exception.as_deref(), Some("bad input"));
        assert_eq!(model.instances["A"].last_trans_id, 7);

        let clear = ExceptionNotification {
            kind: ExceptionKind::ClearExceptionData,
            message: None,
            ..raise.clone()
        };
        rt.notify_exception(&clear).await.unwrap();
        assert!(rt.model("m-1").await.unwrap().instances["A"].exception.is_none());
        assert!(rt.abnormal_snapshot().await.instances.is_empty());

        let unknown = ExceptionNotification {
            model_id: "nope".into(),
            ..raise
        };
        assert!(rt.notify_exception(&unknown).await.is_err());
    }
}
