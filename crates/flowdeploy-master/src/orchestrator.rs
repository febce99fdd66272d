use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use flowdeploy_common::{
    now_ms, DeployError, DeployRequest, DeviceInfo, DeployedModel, DeployedModelRecord, ExceptionKind,
    ExceptionNotification, FlowModel, FlowRoutePlan, ModelHealth, Result, SubmodelDeployDesc,
};
use flowdeploy_meta::{keys, MetaStore, MetaStoreExt};
use flowdeploy_planner::{
    DeployState, FlowRoutePlanner, HeterogeneousDeployPlanner, ModelRelationFlattener, PlanAttrs,
};

use crate::abnormal::{redeploy_callback, AbnormalStatusHandler, RecoveryKind, RecoveryRequest};
use crate::context::{ClusterContext, PlanOptions};
use crate::metrics::SharedMetrics;
use crate::resource::ResourceManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Deploying,
    Deployed,
    Undeploying,
}

/// Lets the caller of `deploy_model` check whether its deployment degraded.
#[derive(Debug, Clone)]
pub struct AbnormalProbe {
    model_id: String,
    handler: Weak<AbnormalStatusHandler>,
}

impl AbnormalProbe {
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// `None` once the model is no longer tracked.
    pub async fn health(&self) -> Option<ModelHealth> {
        let handler = self.handler.upgrade()?;
        handler.model_health(&self.model_id).await
    }

    /// Untracked models count as abnormal.
    pub async fn is_abnormal(&self) -> bool {
        !matches!(self.health().await, Some(ModelHealth::Healthy))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeployResult {
    pub model_id: String,
    pub input_queue_indices: Vec<usize>,
    pub output_queue_indices: Vec<usize>,
    pub nodes: Vec<i32>,
    #[serde(skip_serializing)]
    pub probe: AbnormalProbe,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub model_id: String,
    pub model_name: String,
    pub lifecycle: LifecycleState,
    pub health: Option<ModelHealth>,
    pub nodes: Vec<i32>,
    pub instances: usize,
    pub redeploy_count: u32,
}

struct Placement {
    state: DeployState,
    deployed: DeployedModel,
    nodes: BTreeSet<i32>,
}

struct ModelSlot {
    root: FlowModel,
    lifecycle: LifecycleState,
    /// `None` while deploying and after a failed redeploy.
    placement: Option<Placement>,
    redeploy_count: u32,
}

/// Nodes holding at least one submodel instance.
fn instance_nodes(state: &DeployState) -> BTreeSet<i32> {
    state
        .plan
        .submodels
        .values()
        .map(|sm| sm.queue_device.node_id)
        .collect()
}

fn build_requests(state: &DeployState) -> Vec<DeployRequest> {
    let plan = &state.plan;
    state
        .route_plans
        .iter()
        .map(|(&node_id, route_plan)| DeployRequest {
            model_id: state.model_id.clone(),
            node_id,
            route_plan: route_plan.clone(),
            submodels: plan
                .submodels
                .values()
                .filter(|sm| sm.queue_device.node_id == node_id)
                .map(|sm| SubmodelDeployDesc {
                    model_name: sm.model_name.clone(),
                    instance_name: sm.instance_name.clone(),
                    device: sm.device.clone(),
                    queue_device: sm.queue_device.clone(),
                    input_queue_indices: sm
                        .input_queue_indices
                        .iter()
                        .map(|&q| plan.canonical_queue(q))
                        .collect(),
                    output_queue_indices: sm
                        .output_queue_indices
                        .iter()
                        .map(|&q| plan.canonical_queue(q))
                        .collect(),
                    is_head: sm.is_head,
                    artifact: sm.artifact.clone(),
                })
                .collect(),
        })
        .collect()
}

fn build_deployed_model(state: &DeployState, local_node: i32) -> DeployedModel {
    DeployedModel {
        model_id: state.model_id.clone(),
        deployed_remote_nodes: state
            .route_plans
            .keys()
            .copied()
            .filter(|&n| n != local_node)
            .collect(),
        model_deploy_infos: state.plan.device_map(),
        dynamic_sched: state.plan.dynamic_sched_plan.is_some(),
    }
}

/// Flatten `root`, place it on `devices` and resolve the per-node route
/// plans. Pure: nothing is dispatched.
pub fn plan_model(
    resources: &ResourceManager,
    devices: Vec<DeviceInfo>,
    model_id: &str,
    root: &FlowModel,
    opts: PlanOptions,
) -> Result<DeployState> {
    let flat = ModelRelationFlattener::new()
        .with_max_depth(opts.max_flatten_depth)
        .flatten(root)?;
    let head = resources.head_device()?;
    let plan = HeterogeneousDeployPlanner::new(devices, head).build_plan(&flat)?;

    let mut state = DeployState::new(model_id, plan);
    FlowRoutePlanner::new(resources.rank_table()).resolve_flow_route_plans(
        &mut state,
        PlanAttrs {
            keep_out_of_order: opts.keep_out_of_order,
        },
    )?;
    Ok(state)
}

/// Drives flatten → plan → route → dispatch for whole models and keeps the
/// deployed-model table.
pub struct DeploymentOrchestrator {
    ctx: Arc<ClusterContext>,
    handler: Arc<AbnormalStatusHandler>,
    models: Mutex<BTreeMap<String, ModelSlot>>,
    weak_self: Weak<DeploymentOrchestrator>,
}

impl DeploymentOrchestrator {
    pub fn new(ctx: Arc<ClusterContext>, handler: Arc<AbnormalStatusHandler>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            ctx,
            handler,
            models: Mutex::new(BTreeMap::new()),
            weak_self: weak.clone(),
        })
    }

    pub fn context(&self) -> &Arc<ClusterContext> {
        &self.ctx
    }

    pub fn handler(&self) -> &Arc<AbnormalStatusHandler> {
        &self.handler
    }

    async fn plan(&self, model_id: &str, root: &FlowModel) -> Result<DeployState> {
        let resources = self.ctx.resources().await;
        let devices = self.ctx.planning_devices().await;
        plan_model(&resources, devices, model_id, root, self.ctx.options())
    }

    /// All-or-nothing: when any node fails, the nodes that succeeded are
    /// torn down again.
    async fn dispatch(&self, state: &DeployState) -> Result<BTreeSet<i32>> {
        let mut targets = Vec::new();
        for req in build_requests(state) {
            let deployer = self.ctx.deployer_for(req.node_id).await?;
            targets.push((deployer, req));
        }

        let results = join_all(
            targets
                .iter()
                .map(|(d, req)| async move { (d.node_id(), d.deploy(req).await) }),
        )
        .await;

        let mut deployed = BTreeSet::new();
        let mut first_err = None;
        for (node_id, r) in results {
            match r {
                Ok(_) => {
                    deployed.insert(node_id);
                }
                Err(e) => {
                    error!(model_id = %state.model_id, node_id, error = %e, "node deploy failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_err {
            self.teardown(&state.model_id, &deployed).await;
            return Err(e);
        }
        Ok(deployed)
    }

    /// Best-effort undeploy on `nodes`; failures are logged.
    async fn teardown(&self, model_id: &str, nodes: &BTreeSet<i32>) {
        let futs = nodes.iter().map(|&node_id| async move {
            let r = match self.ctx.deployer_for(node_id).await {
                Ok(d) => d.undeploy(model_id).await,
                Err(e) => Err(e),
            };
            if let Err(e) = r {
                warn!(model_id = %model_id, node_id, error = %e, "node undeploy failed");
            }
        });
        join_all(futs).await;
    }

    async fn write_record(&self, model_id: &str) {
        let record = {
            let models = self.models.lock().await;
            let Some(slot) = models.get(model_id) else {
                return;
            };
            DeployedModelRecord {
                model_id: model_id.to_string(),
                model_name: slot.root.name.clone(),
                nodes: slot
                    .placement
                    .as_ref()
                    .map(|p| p.nodes.iter().copied().collect())
                    .unwrap_or_default(),
                health: self
                    .handler
                    .model_health(model_id)
                    .await
                    .unwrap_or_default(),
                redeploy_count: slot.redeploy_count,
                updated_at_ms: now_ms(),
            }
        };
        if let Err(e) = self
            .ctx
            .store()
            .put_json(&keys::deployed_model(model_id), &record, None)
            .await
        {
            warn!(model_id = %model_id, error = %e, "failed to write deployed model record");
        }
    }

    fn update_gauge(&self, models: &BTreeMap<String, ModelSlot>) {
        let deployed = models
            .values()
            .filter(|s| s.lifecycle == LifecycleState::Deployed)
            .count();
        self.ctx
            .metrics()
            .deployed_models
            .store(deployed as u64, std::sync::atomic::Ordering::Relaxed);
    }

    fn recovery_callback(&self) -> crate::abnormal::RedeployCallback {
        let weak = self.weak_self.clone();
        redeploy_callback(move |req| {
            let weak = weak.clone();
            async move {
                let orchestrator = weak
                    .upgrade()
                    .ok_or_else(|| anyhow::anyhow!("orchestrator is gone"))?;
                orchestrator.recover(req).await?;
                Ok(())
            }
        })
    }

    pub async fn deploy_model(&self, root: FlowModel) -> Result<DeployResult> {
        let model_id = Uuid::new_v4().to_string();
        self.models.lock().await.insert(
            model_id.clone(),
            ModelSlot {
                root: root.clone(),
                lifecycle: LifecycleState::Deploying,
                placement: None,
                redeploy_count: 0,
            },
        );
        info!(model_id = %model_id, model = %root.name, "deploying model");

        match self.deploy_and_track(&model_id, &root).await {
            Ok(result) => {
                SharedMetrics::inc(&self.ctx.metrics().deploy_total);
                self.write_record(&model_id).await;
                info!(model_id = %model_id, nodes = ?result.nodes, "model deployed");
                Ok(result)
            }
            Err(e) => {
                let mut models = self.models.lock().await;
                models.remove(&model_id);
                self.update_gauge(&models);
                SharedMetrics::inc(&self.ctx.metrics().deploy_failures_total);
                error!(model_id = %model_id, error = %e, "deployment aborted");
                Err(e)
            }
        }
    }

    async fn deploy_and_track(&self, model_id: &str, root: &FlowModel) -> Result<DeployResult> {
        let state = self.plan(model_id, root).await?;
        let nodes = self.dispatch(&state).await?;

        let deployed = build_deployed_model(&state, self.ctx.local_runtime().node_id());
        let tracked = match self.handler.register_model(deployed.clone()).await {
            Ok(()) => self
                .handler
                .register_callback(model_id, self.recovery_callback())
                .await,
            Err(e) => Err(e),
        };
        if let Err(e) = tracked {
            self.handler.unregister_model(model_id).await;
            self.teardown(model_id, &nodes).await;
            return Err(e);
        }

        let result = DeployResult {
            model_id: model_id.to_string(),
            input_queue_indices: state.plan.input_queue_indices.clone(),
            output_queue_indices: state.plan.output_queue_indices.clone(),
            nodes: nodes.iter().copied().collect(),
            probe: AbnormalProbe {
                model_id: model_id.to_string(),
                handler: Arc::downgrade(&self.handler),
            },
        };

        let mut models = self.models.lock().await;
        if let Some(slot) = models.get_mut(model_id) {
            slot.lifecycle = LifecycleState::Deployed;
            slot.placement = Some(Placement {
                state,
                deployed,
                nodes,
            });
        }
        self.update_gauge(&models);
        Ok(result)
    }

    pub async fn undeploy(&self, model_id: &str) -> Result<()> {
        let nodes = {
            let mut models = self.models.lock().await;
            let slot = models
                .get_mut(model_id)
                .ok_or_else(|| DeployError::param_invalid(format!("unknown model id '{model_id}'")))?;
            if slot.lifecycle != LifecycleState::Deployed {
                return Err(DeployError::failed(format!(
                    "model '{model_id}' is {:?}, try again later",
                    slot.lifecycle
                )));
            }
            slot.lifecycle = LifecycleState::Undeploying;
            slot.placement
                .as_ref()
                .map(|p| p.nodes.clone())
                .unwrap_or_default()
        };

        self.teardown(model_id, &nodes).await;
        self.handler.unregister_model(model_id).await;
        {
            let mut models = self.models.lock().await;
            models.remove(model_id);
            self.update_gauge(&models);
        }
        if let Err(e) = self.ctx.store().delete(&keys::deployed_model(model_id)).await {
            warn!(model_id = %model_id, error = %e, "failed to delete deployed model record");
        }
        SharedMetrics::inc(&self.ctx.metrics().undeploy_total);
        info!(model_id = %model_id, nodes = nodes.len(), "model undeployed");
        Ok(())
    }

    /// Forward to every node holding an instance of the model.
    pub async fn notify_exception(
        &self,
        model_id: &str,
        mut notification: ExceptionNotification,
    ) -> Result<()> {
        let nodes = {
            let models = self.models.lock().await;
            let slot = models
                .get(model_id)
                .ok_or_else(|| DeployError::param_invalid(format!("unknown model id '{model_id}'")))?;
            slot.placement
                .as_ref()
                .map(|p| instance_nodes(&p.state))
                .unwrap_or_default()
        };
        notification.model_id = model_id.to_string();
        self.broadcast_exception(&nodes, &notification).await?;
        info!(model_id = %model_id, kind = ?notification.kind, nodes = nodes.len(), "exception forwarded");
        Ok(())
    }

    async fn broadcast_exception(
        &self,
        nodes: &BTreeSet<i32>,
        notification: &ExceptionNotification,
    ) -> Result<()> {
        let results = join_all(nodes.iter().map(|&node_id| async move {
            self.ctx
                .deployer_for(node_id)
                .await?
                .notify_exception(notification)
                .await
        }))
        .await;
        results.into_iter().collect::<Result<Vec<()>>>().map(|_| ())
    }

    /// Toggle profiling on the local node and every node holding a model.
    pub async fn update_profiling_info(&self, enable: bool) -> Result<()> {
        let mut nodes: BTreeSet<i32> = self
            .models
            .lock()
            .await
            .values()
            .filter_map(|s| s.placement.as_ref())
            .flat_map(|p| p.nodes.iter().copied())
            .collect();
        nodes.insert(self.ctx.local_runtime().node_id());

        let results = join_all(nodes.iter().map(|&node_id| async move {
            self.ctx.deployer_for(node_id).await?.set_profiling(enable).await
        }))
        .await;
        results.into_iter().collect::<Result<Vec<()>>>()?;
        info!(enable, nodes = nodes.len(), "profiling updated");
        Ok(())
    }

    pub async fn get_device_mesh_index(&self, node_id: i32) -> Result<Vec<i32>> {
        self.ctx.resources().await.mesh_index(node_id)
    }

    pub async fn route_plans(&self, model_id: &str) -> Result<BTreeMap<i32, FlowRoutePlan>> {
        let models = self.models.lock().await;
        let slot = models
            .get(model_id)
            .ok_or_else(|| DeployError::param_invalid(format!("unknown model id '{model_id}'")))?;
        Ok(slot
            .placement
            .as_ref()
            .map(|p| p.state.route_plans.clone())
            .unwrap_or_default())
    }

    pub async fn list_models(&self) -> Vec<ModelSummary> {
        let snapshot: Vec<ModelSummary> = {
            let models = self.models.lock().await;
            models
                .iter()
                .map(|(id, slot)| ModelSummary {
                    model_id: id.clone(),
                    model_name: slot.root.name.clone(),
                    lifecycle: slot.lifecycle,
                    health: None,
                    nodes: slot
                        .placement
                        .as_ref()
                        .map(|p| p.nodes.iter().copied().collect())
                        .unwrap_or_default(),
                    instances: slot
                        .placement
                        .as_ref()
                        .map(|p| p.deployed.instance_count())
                        .unwrap_or(0),
                    redeploy_count: slot.redeploy_count,
                })
                .collect()
        };
        let mut out = Vec::with_capacity(snapshot.len());
        for mut s in snapshot {
            s.health = self.handler.model_health(&s.model_id).await;
            out.push(s);
        }
        out
    }

    pub async fn deployed_model_count(&self) -> usize {
        self.models.lock().await.len()
    }

    /// Entry point of the redeploy callback registered for every model.
    pub async fn recover(&self, req: RecoveryRequest) -> Result<()> {
        match req.kind {
            RecoveryKind::ClearExceptionData => self.clear_exception_data(&req).await,
            RecoveryKind::Redeploy => self.redeploy(&req).await,
        }
    }

    async fn clear_exception_data(&self, req: &RecoveryRequest) -> Result<()> {
        let nodes = {
            let models = self.models.lock().await;
            let slot = models.get(&req.model_id).ok_or_else(|| {
                DeployError::param_invalid(format!("unknown model id '{}'", req.model_id))
            })?;
            let Some(p) = slot.placement.as_ref() else {
                return Err(DeployError::failed(format!("model '{}' has no placement", req.model_id)));
            };
            let affected: BTreeSet<i32> = req
                .abnormal_instances
                .iter()
                .filter_map(|name| p.state.plan.submodels.get(name))
                .map(|sm| sm.queue_device.node_id)
                .collect();
            if affected.is_empty() {
                instance_nodes(&p.state)
            } else {
                affected
            }
        };
        let notification = ExceptionNotification {
            model_id: req.model_id.clone(),
            kind: ExceptionKind::ClearExceptionData,
            trans_id: 0,
            instance_names: req.abnormal_instances.clone(),
            message: None,
        };
        self.broadcast_exception(&nodes, &notification).await?;
        info!(model_id = %req.model_id, nodes = nodes.len(), "cleared exception data");
        Ok(())
    }

    /// Undeploy everywhere, then re-plan the stored root model against the
    /// inventory minus the abnormal devices and nodes. The model id is kept.
    async fn redeploy(&self, req: &RecoveryRequest) -> Result<()> {
        self.ctx.exclude_devices(&req.abnormal_devices);
        for &n in &req.abnormal_nodes {
            self.ctx.exclude_node(n);
        }

        let (root, old_nodes) = {
            let mut models = self.models.lock().await;
            let slot = models.get_mut(&req.model_id).ok_or_else(|| {
                DeployError::param_invalid(format!("unknown model id '{}'", req.model_id))
            })?;
            if slot.lifecycle != LifecycleState::Deployed {
                return Err(DeployError::failed(format!(
                    "model '{}' is {:?}, redeploy skipped",
                    req.model_id, slot.lifecycle
                )));
            }
            slot.lifecycle = LifecycleState::Deploying;
            let nodes = slot
                .placement
                .take()
                .map(|p| p.nodes)
                .unwrap_or_default();
            (slot.root.clone(), nodes)
        };
        info!(model_id = %req.model_id, nodes = old_nodes.len(), "redeploying model");

        let live: BTreeSet<i32> = old_nodes
            .iter()
            .copied()
            .filter(|n| !req.abnormal_nodes.contains(n))
            .collect();
        self.teardown(&req.model_id, &live).await;

        let outcome = match self.plan(&req.model_id, &root).await {
            Ok(state) => match self.dispatch(&state).await {
                Ok(nodes) => Ok((state, nodes)),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        let result = {
            let mut models = self.models.lock().await;
            let Some(slot) = models.get_mut(&req.model_id) else {
                return Err(DeployError::failed(format!(
                    "model '{}' disappeared during redeploy",
                    req.model_id
                )));
            };
            slot.lifecycle = LifecycleState::Deployed;
            match outcome {
                Ok((state, nodes)) => {
                    let deployed = build_deployed_model(&state, self.ctx.local_runtime().node_id());
                    slot.redeploy_count += 1;
                    slot.placement = Some(Placement {
                        state,
                        deployed: deployed.clone(),
                        nodes,
                    });
                    Ok(deployed)
                }
                Err(e) => Err(e),
            }
        };

        let outcome = match result {
            Ok(deployed) => self.handler.update_deployed_model(deployed).await,
            Err(e) => Err(e),
        };
        self.write_record(&req.model_id).await;
        match &outcome {
            Ok(()) => info!(model_id = %req.model_id, "model redeployed"),
            Err(e) => error!(model_id = %req.model_id, error = %e, "redeploy failed"),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowdeploy_common::{Endpoint, ModelRelation, StatusCode, SubmodelSpec};
    use flowdeploy_meta::MemoryMetaStore;

    use crate::abnormal::DeployContext;
    use crate::resource::{ClusterConfig, DeviceConfig, HostConfig, NodeConfig, ResourceConfig};

    /// Single node holding the head host and one accelerator.
    fn make_local_orchestrator() -> Arc<DeploymentOrchestrator> {
        let config = ResourceConfig {
            clusters: vec![ClusterConfig {
                cluster_id: 0,
                nodes: vec![NodeConfig {
                    node_id: 0,
                    address: None,
                    is_local: true,
                    mesh_index: vec![0],
                    host: Some(HostConfig {
                        resource_type: "X86".into(),
                    }),
                    devices: vec![DeviceConfig {
                        device_id: 0,
                        resource_type: "Ascend".into(),
                        mesh_index: vec![0],
                        heavy_load_capable: false,
                        rank_id: None,
                    }],
                }],
            }],
        };
        let rm = ResourceManager::from_config(config, None).unwrap();
        let ctx = Arc::new(ClusterContext::new(rm, Arc::new(MemoryMetaStore::new())));
        let handler = Arc::new(AbnormalStatusHandler::new(
            Arc::new(DeployContext::new()),
            ctx.metrics().clone(),
        ));
        DeploymentOrchestrator::new(ctx, handler)
    }

    fn make_model(logical_id: &str) -> FlowModel {
        let relation = ModelRelation::new()
            .with_root(["in"], ["out"])
            .with_submodel("A", ["in"], ["mid"])
            .with_submodel("B", ["mid"], ["out"])
            .with_endpoint(Endpoint::default_queue("mid"));
        FlowModel::new("pipe")
            .with_relation(relation)
            .with_submodel(
                SubmodelSpec::new("A")
                    .with_resource_type("Ascend")
                    .with_logical_device_id(logical_id),
            )
            .with_submodel(
                SubmodelSpec::new("B")
                    .with_resource_type("Ascend")
                    .with_logical_device_id(logical_id),
            )
    }

    #[tokio::test]
    async fn test_deploy_and_undeploy_locally() {
        let orch = make_local_orchestrator();
        let result = orch.deploy_model(make_model("0:0:0")).await.unwrap();
        assert_eq!(result.nodes, vec![0]);
        assert_eq!(result.input_queue_indices.len(), 1);
        assert!(!result.probe.is_abnormal().await);
        assert_eq!(orch.context().local_runtime().model_count().await, 1);

        let record = orch
            .context()
            .store()
            .get(&keys::deployed_model(&result.model_id))
            .await
            .unwrap();
        assert!(record.is_some());

        orch.undeploy(&result.model_id).await.unwrap();
        assert_eq!(orch.deployed_model_count().await, 0);
        assert_eq!(orch.context().local_runtime().model_count().await, 0);
        assert!(result.probe.is_abnormal().await);
    }

    #[tokio::test]
    async fn test_failed_plan_registers_nothing() {
        let orch = make_local_orchestrator();
        let err = orch.deploy_model(make_model("0:5:0")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::ParamInvalid);
        assert_eq!(orch.deployed_model_count().await, 0);
        assert_eq!(orch.handler().deployed_model_count().await, 0);
        assert_eq!(
            orch.context()
                .metrics()
                .deploy_failures_total
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_unknown_model_ids() {
        let orch = make_local_orchestrator();
        let deployed = orch.deploy_model(make_model("0:0:0")).await.unwrap();
        assert_eq!(orch.undeploy("nope").await.unwrap_err().status(), StatusCode::ParamInvalid);
        // the deployed set and the node are untouched
        assert_eq!(orch.deployed_model_count().await, 1);
        assert_eq!(orch.handler().deployed_model_count().await, 1);
        assert_eq!(orch.context().local_runtime().model_count().await, 1);
        assert!(!deployed.probe.is_abnormal().await);
        let n = ExceptionNotification {
            model_id: String::new(),
            kind: ExceptionKind::Raise,
            trans_id: 1,
            instance_names: vec![],
            message: None,
        };
        assert_eq!(
            orch.notify_exception("nope", n).await.unwrap_err().status(),
            StatusCode::ParamInvalid
        );
        assert_eq!(orch.get_device_mesh_index(0).await.unwrap(), vec![0]);
        assert_eq!(orch.get_device_mesh_index(4).await.unwrap_err().status(), StatusCode::Failed);
    }

    #[tokio::test]
    async fn test_notify_and_profiling_reach_local_node() {
        let orch = make_local_orchestrator();
        let result = orch.deploy_model(make_model("0:0:0")).await.unwrap();
        let n = ExceptionNotification {
            model_id: String::new(),
            kind: ExceptionKind::Raise,
            trans_id: 3,
            instance_names: vec!["A".into()],
            message: Some("user raised".into()),
        };
        orch.notify_exception(&result.model_id, n).await.unwrap();
        let installed = orch
            .context()
            .local_runtime()
            .model(&result.model_id)
            .await
            .unwrap();
        assert_eq!(installed.instances["A"].exception.as_deref(), Some("user raised"));
        assert!(installed.instances["B"].exception.is_none());

        orch.update_profiling_info(true).await.unwrap();
        assert!(orch.context().local_runtime().is_profiling());
    }

    #[tokio::test]
    async fn test_redeploy_keeps_model_id() {
        let orch = make_local_orchestrator();
        let result = orch.deploy_model(make_model("0:0:0")).await.unwrap();
        let req = RecoveryRequest {
            model_id: result.model_id.clone(),
            kind: RecoveryKind::Redeploy,
            abnormal_devices: vec![],
            abnormal_nodes: vec![],
            abnormal_instances: vec![],
        };
        orch.recover(req).await.unwrap();
        let models = orch.list_models().await;
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].model_id, result.model_id);
        assert_eq!(models[0].redeploy_count, 1);
        assert_eq!(models[0].lifecycle, LifecycleState::Deployed);
        assert_eq!(orch.context().local_runtime().model_count().await, 1);
    }

    #[tokio::test]
    async fn test_redeploy_without_devices_fails() {
        let orch = make_local_orchestrator();
        let result = orch.deploy_model(make_model("0:0:0")).await.unwrap();
        let acc = DeviceInfo::accelerator(0, 0, 0, vec![0], "Ascend");
        let req = RecoveryRequest {
            model_id: result.model_id.clone(),
            kind: RecoveryKind::Redeploy,
            abnormal_devices: vec![acc],
            abnormal_nodes: vec![],
            abnormal_instances: vec![],
        };
        assert!(orch.recover(req).await.is_err());
        assert_eq!(orch.context().local_runtime().model_count().await, 0);
        // the slot stays so the model can still be undeployed
        orch.undeploy(&result.model_id).await.unwrap();
    }
}
