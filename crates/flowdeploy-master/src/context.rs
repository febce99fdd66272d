use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::RwLock;

use flowdeploy_common::{DeployError, DeviceInfo, Result};
use flowdeploy_meta::MetaStore;
use flowdeploy_node::NodeRuntime;

use crate::deployer::{Deployer, RemoteDeployer};
use crate::metrics::SharedMetrics;
use crate::resource::ResourceManager;

#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions {
    pub keep_out_of_order: bool,
    pub max_flatten_depth: Option<usize>,
}

/// Process-wide state shared by the orchestrator, the fault handler and the
/// HTTP API: device inventory, local runtime, node addresses and metrics.
pub struct ClusterContext {
    resources: RwLock<Arc<ResourceManager>>,
    config_dir: Option<PathBuf>,
    local_node_override: Option<i32>,
    store: Arc<dyn MetaStore>,
    local: NodeRuntime,
    http: reqwest::Client,
    /// Addresses learned from heartbeats; they win over the config.
    node_addresses: DashMap<i32, String>,
    excluded_devices: DashSet<DeviceInfo>,
    excluded_nodes: DashSet<i32>,
    metrics: Arc<SharedMetrics>,
    options: PlanOptions,
}

impl ClusterContext {
    pub fn new(resources: ResourceManager, store: Arc<dyn MetaStore>) -> Self {
        let local = NodeRuntime::new(resources.local_node_id());
        Self {
            resources: RwLock::new(Arc::new(resources)),
            config_dir: None,
            local_node_override: None,
            store,
            local,
            http: reqwest::Client::new(),
            node_addresses: DashMap::new(),
            excluded_devices: DashSet::new(),
            excluded_nodes: DashSet::new(),
            metrics: Arc::new(SharedMetrics::default()),
            options: PlanOptions::default(),
        }
    }

    /// Directory holding `resource.json` and the redeploy sentinel files.
    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>, local_node: Option<i32>) -> Self {
        self.config_dir = Some(dir.into());
        self.local_node_override = local_node;
        self
    }

    pub fn with_options(mut self, options: PlanOptions) -> Self {
        self.options = options;
        self
    }

    pub fn config_dir(&self) -> Option<&Path> {
        self.config_dir.as_deref()
    }

    pub fn local_node_override(&self) -> Option<i32> {
        self.local_node_override
    }

    pub async fn resources(&self) -> Arc<ResourceManager> {
        self.resources.read().await.clone()
    }

    /// Swap in a freshly loaded inventory; exclusions are reset since the
    /// new config already reflects the lost devices.
    pub async fn replace_resources(&self, resources: ResourceManager) {
        *self.resources.write().await = Arc::new(resources);
        self.excluded_devices.clear();
    }

    pub fn store(&self) -> &Arc<dyn MetaStore> {
        &self.store
    }

    pub fn local_runtime(&self) -> &NodeRuntime {
        &self.local
    }

    pub fn metrics(&self) -> &Arc<SharedMetrics> {
        &self.metrics
    }

    pub fn options(&self) -> PlanOptions {
        self.options
    }

    pub fn record_node_address(&self, node_id: i32, address: String) {
        self.node_addresses.insert(node_id, address);
    }

    pub fn exclude_devices<'a>(&self, devices: impl IntoIterator<Item = &'a DeviceInfo>) {
        for d in devices {
            self.excluded_devices.insert(d.without_proxy());
        }
    }

    pub fn exclude_node(&self, node_id: i32) {
        self.excluded_nodes.insert(node_id);
    }

    pub fn restore_node(&self, node_id: i32) -> bool {
        self.excluded_nodes.remove(&node_id).is_some()
    }

    pub fn excluded_nodes(&self) -> BTreeSet<i32> {
        self.excluded_nodes.iter().map(|n| *n).collect()
    }

    /// Inventory minus devices and nodes currently known to be abnormal.
    pub async fn planning_devices(&self) -> Vec<DeviceInfo> {
        let resources = self.resources().await;
        resources
            .devices()
            .iter()
            .filter(|d| !self.excluded_nodes.contains(&d.node_id))
            .filter(|d| !self.excluded_devices.iter().any(|e| e.same_device(d)))
            .cloned()
            .collect()
    }

    pub async fn deployer_for(&self, node_id: i32) -> Result<Deployer> {
        if node_id == self.local.node_id() {
            return Ok(Deployer::Local(self.local.clone()));
        }
        let address = match self.node_addresses.get(&node_id) {
            Some(a) => Some(a.clone()),
            None => self
                .resources()
                .await
                .node(node_id)
                .and_then(|n| n.address.clone()),
        };
        let address = address
            .ok_or_else(|| DeployError::failed(format!("no deployer address for node {node_id}")))?;
        Ok(Deployer::Remote(RemoteDeployer::new(
            node_id,
            address,
            self.http.clone(),
        )))
    }

    /// Every node a side-channel broadcast should reach.
    pub async fn known_nodes(&self) -> BTreeSet<i32> {
        let mut nodes: BTreeSet<i32> = self.resources().await.nodes().map(|n| n.node_id).collect();
        nodes.extend(self.node_addresses.iter().map(|e| *e.key()));
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::tests::make_config_json;
    use flowdeploy_meta::MemoryMetaStore;

    fn make_context() -> ClusterContext {
        let config = serde_json::from_str(&make_config_json("http://127.0.0.1:9")).unwrap();
        let rm = ResourceManager::from_config(config, None).unwrap();
        ClusterContext::new(rm, Arc::new(MemoryMetaStore::new()))
    }

    #[tokio::test]
    async fn test_deployer_selection() {
        let ctx = make_context();
        assert!(ctx.deployer_for(0).await.unwrap().is_local());
        assert!(!ctx.deployer_for(1).await.unwrap().is_local());
        assert!(ctx.deployer_for(5).await.is_err());
        ctx.record_node_address(5, "http://127.0.0.1:10".into());
        assert_eq!(ctx.deployer_for(5).await.unwrap().node_id(), 5);
    }

    #[tokio::test]
    async fn test_planning_devices_skip_exclusions() {
        let ctx = make_context();
        assert_eq!(ctx.planning_devices().await.len(), 3);
        let acc = DeviceInfo::accelerator(0, 1, 0, vec![0], "Ascend");
        ctx.exclude_devices([&acc]);
        assert_eq!(ctx.planning_devices().await.len(), 2);
        ctx.exclude_node(1);
        assert_eq!(ctx.planning_devices().await.len(), 1);
        assert!(ctx.restore_node(1));
        assert_eq!(ctx.planning_devices().await.len(), 2);
    }
}
