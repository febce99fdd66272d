use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use flowdeploy_common::{DeployError, DeviceInfo, Result};
use flowdeploy_planner::RankTable;

pub const RESOURCE_FILE: &str = "resource.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceConfig {
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterConfig {
    pub cluster_id: i32,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeConfig {
    pub node_id: i32,
    /// Base URL of the node agent.
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default)]
    pub mesh_index: Vec<i32>,
    #[serde(default)]
    pub host: Option<HostConfig>,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostConfig {
    pub resource_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    pub device_id: i32,
    pub resource_type: String,
    #[serde(default)]
    pub mesh_index: Vec<i32>,
    #[serde(default)]
    pub heavy_load_capable: bool,
    #[serde(default)]
    pub rank_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeEntry {
    pub cluster_id: i32,
    pub node_id: i32,
    pub address: Option<String>,
    pub is_local: bool,
    pub mesh_index: Vec<i32>,
}

/// Device inventory loaded from `resource.json`.
#[derive(Debug, Clone)]
pub struct ResourceManager {
    config: ResourceConfig,
    devices: Vec<DeviceInfo>,
    ranks: RankTable,
    nodes: BTreeMap<i32, NodeEntry>,
    local_node_id: i32,
}

impl ResourceManager {
    /// `local_node` overrides the `is_local` flags of the config.
    pub fn from_config(config: ResourceConfig, local_node: Option<i32>) -> Result<Self> {
        let mut devices = Vec::new();
        let mut nodes = BTreeMap::new();
        let mut explicit_ranks = Vec::new();

        for cluster in &config.clusters {
            for node in &cluster.nodes {
                let entry = NodeEntry {
                    cluster_id: cluster.cluster_id,
                    node_id: node.node_id,
                    address: node.address.clone(),
                    is_local: node.is_local,
                    mesh_index: node.mesh_index.clone(),
                };
                if nodes.insert(node.node_id, entry).is_some() {
                    return Err(DeployError::param_invalid(format!(
                        "node {} is declared more than once",
                        node.node_id
                    )));
                }
                if let Some(host) = &node.host {
                    devices.push(DeviceInfo::host(cluster.cluster_id, node.node_id, &host.resource_type));
                }
                for d in &node.devices {
                    let dev = DeviceInfo::accelerator(
                        cluster.cluster_id,
                        node.node_id,
                        d.device_id,
                        d.mesh_index.clone(),
                        &d.resource_type,
                    )
                    .with_heavy_load_capable(d.heavy_load_capable);
                    if let Some(rank) = d.rank_id {
                        explicit_ranks.push((dev.clone(), rank));
                    }
                    devices.push(dev);
                }
            }
        }

        let local_node_id = match local_node {
            Some(id) if nodes.contains_key(&id) => id,
            Some(id) => {
                return Err(DeployError::param_invalid(format!(
                    "local node {id} is not in the resource config"
                )))
            }
            None => nodes
                .values()
                .find(|n| n.is_local)
                .or_else(|| nodes.values().next())
                .map(|n| n.node_id)
                .ok_or_else(|| DeployError::param_invalid("resource config declares no nodes"))?,
        };
        for (id, n) in nodes.iter_mut() {
            n.is_local = *id == local_node_id;
        }

        let ranks = build_rank_table(&devices, &explicit_ranks);
        tracing::debug!(
            devices = devices.len(),
            nodes = nodes.len(),
            local_node_id,
            "loaded resource config"
        );
        Ok(Self {
            config,
            devices,
            ranks,
            nodes,
            local_node_id,
        })
    }

    pub fn load(dir: &Path, local_node: Option<i32>) -> anyhow::Result<Self> {
        let path = dir.join(RESOURCE_FILE);
        let raw = std::fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        let config: ResourceConfig =
            serde_json::from_slice(&raw).with_context(|| format!("parse {}", path.display()))?;
        Ok(Self::from_config(config, local_node)?)
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    pub fn rank_table(&self) -> &RankTable {
        &self.ranks
    }

    pub fn node(&self, node_id: i32) -> Option<&NodeEntry> {
        self.nodes.get(&node_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeEntry> {
        self.nodes.values()
    }

    pub fn local_node_id(&self) -> i32 {
        self.local_node_id
    }

    /// Host CPU of the local node; root inputs and outputs live there.
    pub fn head_device(&self) -> Result<DeviceInfo> {
        self.devices
            .iter()
            .find(|d| d.is_host() && d.node_id == self.local_node_id)
            .cloned()
            .ok_or_else(|| {
                DeployError::failed(format!("local node {} has no host device", self.local_node_id))
            })
    }

    pub fn mesh_index(&self, node_id: i32) -> Result<Vec<i32>> {
        self.nodes
            .get(&node_id)
            .map(|n| n.mesh_index.clone())
            .ok_or_else(|| DeployError::failed(format!("node {node_id} is not registered")))
    }
}

/// Configured ranks are kept as is; every other device gets the next free
/// rank in device order.
fn build_rank_table(devices: &[DeviceInfo], explicit: &[(DeviceInfo, u32)]) -> RankTable {
    if explicit.is_empty() {
        return RankTable::dense(devices);
    }
    let mut table = RankTable::new();
    let mut next = 0;
    for (dev, rank) in explicit {
        table.insert(dev, *rank);
        next = next.max(rank + 1);
    }
    let mut rest: Vec<&DeviceInfo> = devices
        .iter()
        .filter(|d| !explicit.iter().any(|(e, _)| e == *d))
        .collect();
    rest.sort();
    for dev in rest {
        table.insert(dev, next);
        next += 1;
    }
    table
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flowdeploy_common::StatusCode;

    pub(crate) fn make_config_json(remote_address: &str) -> String {
        format!(
            r#"{{
  "clusters": [{{
    "cluster_id": 0,
    "nodes": [
      {{ "node_id": 0, "is_local": true, "mesh_index": [0], "host": {{ "resource_type": "X86" }} }},
      {{ "node_id": 1, "address": "{remote_address}", "mesh_index": [1],
         "host": {{ "resource_type": "X86" }},
         "devices": [ {{ "device_id": 0, "resource_type": "Ascend", "mesh_index": [0] }} ] }}
    ]
  }}]
}}"#
        )
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(RESOURCE_FILE), make_config_json("http://127.0.0.1:9")).unwrap();
        let rm = ResourceManager::load(dir.path(), None).unwrap();
        assert_eq!(rm.devices().len(), 3);
        assert_eq!(rm.local_node_id(), 0);
        assert!(rm.head_device().unwrap().is_host());
        assert_eq!(rm.mesh_index(1).unwrap(), vec![1]);
        assert_eq!(rm.mesh_index(7).unwrap_err().status(), StatusCode::Failed);
        assert_eq!(rm.rank_table().len(), 3);
    }

    #[test]
    fn test_explicit_ranks_kept() {
        let config = ResourceConfig {
            clusters: vec![ClusterConfig {
                cluster_id: 0,
                nodes: vec![NodeConfig {
                    node_id: 3,
                    address: None,
                    is_local: false,
                    mesh_index: vec![],
                    host: Some(HostConfig {
                        resource_type: "X86".into(),
                    }),
                    devices: vec![DeviceConfig {
                        device_id: 0,
                        resource_type: "Ascend".into(),
                        mesh_index: vec![0],
                        heavy_load_capable: true,
                        rank_id: Some(8),
                    }],
                }],
            }],
        };
        let rm = ResourceManager::from_config(config, None).unwrap();
        let acc = rm.devices().iter().find(|d| !d.is_host()).unwrap();
        assert!(acc.heavy_load_capable);
        assert_eq!(rm.rank_table().device_rank_id(acc).unwrap(), 8);
        let host = rm.head_device().unwrap();
        assert_eq!(rm.rank_table().device_rank_id(&host).unwrap(), 9);
    }

    #[test]
    fn test_duplicate_node_and_unknown_local() {
        let mut config: ResourceConfig = serde_json::from_str(&make_config_json("x")).unwrap();
        assert!(ResourceManager::from_config(config.clone(), Some(5)).is_err());
        let dup = config.clusters[0].nodes[0].clone();
        config.clusters[0].nodes.push(dup);
        let err = ResourceManager::from_config(config, None).unwrap_err();
        assert_eq!(err.status(), StatusCode::ParamInvalid);
    }
}
