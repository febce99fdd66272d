use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::device::DeviceInfo;

/// model name → instance name → devices.
pub type ModelDeployInfos = BTreeMap<String, BTreeMap<String, BTreeSet<DeviceInfo>>>;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModelHealth {
    #[default]
    Healthy,
    AbnormalDetected,
    RedeployInProgress,
    PermanentlyFailed,
}

/// Unit tracked by the fault monitor for one successful deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployedModel {
    pub model_id: String,
    #[serde(default)]
    pub deployed_remote_nodes: BTreeSet<i32>,
    #[serde(default)]
    pub model_deploy_infos: ModelDeployInfos,
    #[serde(default)]
    pub dynamic_sched: bool,
}

impl DeployedModel {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            ..Default::default()
        }
    }

    pub fn with_remote_node(mut self, node_id: i32) -> Self {
        self.deployed_remote_nodes.insert(node_id);
        self
    }

    pub fn with_instance(
        mut self,
        model_name: impl Into<String>,
        instance_name: impl Into<String>,
        devices: impl IntoIterator<Item = DeviceInfo>,
    ) -> Self {
        self.model_deploy_infos
            .entry(model_name.into())
            .or_default()
            .entry(instance_name.into())
            .or_default()
            .extend(devices);
        self
    }

    pub fn with_dynamic_sched(mut self, enabled: bool) -> Self {
        self.dynamic_sched = enabled;
        self
    }

    pub fn instance_count(&self) -> usize {
        self.model_deploy_infos.values().map(BTreeMap::len).sum()
    }

    pub fn instance_devices(&self, instance_name: &str) -> Option<&BTreeSet<DeviceInfo>> {
        self.model_deploy_infos
            .values()
            .find_map(|instances| instances.get(instance_name))
    }

    pub fn all_devices(&self) -> BTreeSet<DeviceInfo> {
        self.model_deploy_infos
            .values()
            .flat_map(|instances| instances.values())
            .flat_map(|devs| devs.iter().cloned())
            .collect()
    }

    pub fn all_nodes(&self) -> BTreeSet<i32> {
        let mut nodes: BTreeSet<i32> = self.all_devices().iter().map(|d| d.node_id).collect();
        nodes.extend(self.deployed_remote_nodes.iter().copied());
        nodes
    }
}

/// Deployed-model record kept in the metadata store under `/deployed_models/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployedModelRecord {
    pub model_id: String,
    pub model_name: String,
    pub nodes: Vec<i32>,
    pub health: ModelHealth,
    #[serde(default)]
    pub redeploy_count: u32,
    pub updated_at_ms: u64,
}
