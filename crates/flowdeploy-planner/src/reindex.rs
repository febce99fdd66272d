use std::collections::{BTreeMap, BTreeSet};

use flowdeploy_common::{DeployError, DeviceInfo, LogicalDeviceId, Result};
use tracing::debug;

/// Logical device address space: `"cluster:logicalNode:logicalDevice"` for
/// accelerators, `"cluster:logicalNode:-1"` for a node's host CPU.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceTable {
    entries: BTreeMap<String, DeviceInfo>,
}

impl DeviceTable {
    pub fn get(&self, key: &str) -> Option<&DeviceInfo> {
        self.entries.get(key)
    }

    pub fn resolve(&self, id: &LogicalDeviceId) -> Result<DeviceInfo> {
        self.entries.get(&id.table_key()).cloned().ok_or_else(|| {
            DeployError::param_invalid(format!("logical device id '{id}' matches no device"))
        })
    }

    /// Host CPU of a physical node.
    pub fn host_of(&self, cluster_id: i32, node_id: i32) -> Option<&DeviceInfo> {
        self.entries
            .values()
            .find(|d| d.is_host() && d.cluster_id == cluster_id && d.node_id == node_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DeviceInfo)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reject a node id that shows up under more than one cluster. Route plans,
/// deployers and heartbeats address a node by its id alone.
pub fn ensure_unique_node_ids<'a>(devices: impl IntoIterator<Item = &'a DeviceInfo>) -> Result<()> {
    let mut owners: BTreeMap<i32, i32> = BTreeMap::new();
    for d in devices {
        let cluster = *owners.entry(d.node_id).or_insert(d.cluster_id);
        if cluster != d.cluster_id {
            return Err(DeployError::param_invalid(format!(
                "node {} appears in clusters {cluster} and {}",
                d.node_id, d.cluster_id
            )));
        }
    }
    Ok(())
}

/// Build the logical device table.
///
/// Nodes of a cluster are numbered by their lowest accelerator mesh index
/// (host-only nodes last, ties by node id); accelerators of a node by mesh
/// index then device id. The result does not depend on input order.
pub fn reindex_devices(devices: &[DeviceInfo]) -> Result<DeviceTable> {
    let mut sorted = devices.to_vec();
    sorted.sort_by(|a, b| {
        (a.cluster_id, a.node_id, &a.mesh_index, a.device_id)
            .cmp(&(b.cluster_id, b.node_id, &b.mesh_index, b.device_id))
    });

    let mut seen = BTreeSet::new();
    for d in &sorted {
        if !seen.insert((d.cluster_id, d.key())) {
            return Err(DeployError::param_invalid(format!(
                "duplicate device key '{}' in cluster {}",
                d.key(),
                d.cluster_id
            )));
        }
    }

    let mut clusters: BTreeMap<i32, BTreeMap<i32, Vec<DeviceInfo>>> = BTreeMap::new();
    for d in sorted {
        clusters
            .entry(d.cluster_id)
            .or_default()
            .entry(d.node_id)
            .or_default()
            .push(d);
    }

    let mut entries = BTreeMap::new();
    for (cluster_id, nodes) in &clusters {
        let mut order: Vec<(bool, Option<&Vec<i32>>, i32)> = nodes
            .iter()
            .map(|(node_id, devs)| {
                let mesh = devs.iter().filter(|d| !d.is_host()).map(|d| &d.mesh_index).min();
                (mesh.is_none(), mesh, *node_id)
            })
            .collect();
        order.sort();

        for (logical_node, (_, _, node_id)) in order.iter().enumerate() {
            let Some(devs) = nodes.get(node_id) else {
                continue;
            };
            let mut accs: Vec<&DeviceInfo> = devs.iter().filter(|d| !d.is_host()).collect();
            accs.sort_by(|a, b| (&a.mesh_index, a.device_id).cmp(&(&b.mesh_index, b.device_id)));
            for (logical_dev, d) in accs.into_iter().enumerate() {
                entries.insert(format!("{cluster_id}:{logical_node}:{logical_dev}"), d.clone());
            }
            if let Some(host) = devs.iter().find(|d| d.is_host()) {
                entries.insert(format!("{cluster_id}:{logical_node}:-1"), host.clone());
            }
        }
    }

    debug!(devices = entries.len(), clusters = clusters.len(), "reindexed devices");
    Ok(DeviceTable { entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowdeploy_common::StatusCode;

    fn make_devices() -> Vec<DeviceInfo> {
        vec![
            DeviceInfo::accelerator(0, 2, 1, vec![1, 1], "Ascend"),
            DeviceInfo::accelerator(0, 2, 0, vec![1, 0], "Ascend"),
            DeviceInfo::host(0, 2, "X86"),
            DeviceInfo::accelerator(0, 5, 0, vec![0, 0], "Ascend"),
            DeviceInfo::host(0, 9, "X86"),
            DeviceInfo::accelerator(1, 0, 0, vec![0, 0], "Ascend"),
        ]
    }

    #[test]
    fn test_reindex_is_order_independent() {
        let devices = make_devices();
        let mut reversed = devices.clone();
        reversed.reverse();
        let mut rotated = devices.clone();
        rotated.rotate_left(2);

        let a = reindex_devices(&devices).unwrap();
        assert_eq!(a, reindex_devices(&reversed).unwrap());
        assert_eq!(a, reindex_devices(&rotated).unwrap());
        assert_eq!(a.len(), devices.len());
    }

    #[test]
    fn test_node_ids_unique_across_clusters() {
        // node 0 only lives in cluster 1 here
        assert!(ensure_unique_node_ids(&make_devices()).is_ok());
        let mut devices = make_devices();
        devices.push(DeviceInfo::host(0, 0, "X86"));
        let err = ensure_unique_node_ids(&devices).unwrap_err();
        assert_eq!(err.status(), StatusCode::ParamInvalid);
    }

    #[test]
    fn test_nodes_ordered_by_mesh() {
        let table = reindex_devices(&make_devices()).unwrap();
        // node 5 sits at mesh row 0, so it comes before node 2
        assert_eq!(table.get("0:0:0").unwrap().node_id, 5);
        assert_eq!(table.get("0:1:0").unwrap().device_id, 0);
        assert_eq!(table.get("0:1:1").unwrap().device_id, 1);
        assert!(table.get("0:1:-1").unwrap().is_host());
        // host-only node goes last
        assert_eq!(table.get("0:2:-1").unwrap().node_id, 9);
        assert_eq!(table.get("1:0:0").unwrap().cluster_id, 1);
        assert_eq!(table.host_of(0, 2).unwrap().node_id, 2);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let dup = vec![
            DeviceInfo::accelerator(0, 1, 0, vec![3], "Ascend"),
            DeviceInfo::accelerator(0, 1, 1, vec![3], "Ascend"),
        ];
        let err = reindex_devices(&dup).unwrap_err();
        assert_eq!(err.status(), StatusCode::ParamInvalid);
    }
}
