use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DeployError, Result};

/// Device id used for the host CPU of a node.
pub const HOST_DEVICE_ID: i32 = -1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Accelerator,
    Cpu,
}

/// A compute device known to the cluster inventory.
///
/// Field order matters: the derived ordering sorts by cluster, node, type,
/// device id and mesh index, which is what makes device sets deterministic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceInfo {
    pub cluster_id: i32,
    pub node_id: i32,
    pub device_type: DeviceType,
    pub device_id: i32,
    #[serde(default)]
    pub mesh_index: Vec<i32>,
    pub resource_type: String,
    #[serde(default)]
    pub heavy_load_capable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_device_id: Option<i32>,
}

impl DeviceInfo {
    pub fn accelerator(
        cluster_id: i32,
        node_id: i32,
        device_id: i32,
        mesh_index: Vec<i32>,
        resource_type: impl Into<String>,
    ) -> Self {
        let mesh_index = if mesh_index.is_empty() {
            vec![device_id]
        } else {
            mesh_index
        };
        Self {
            cluster_id,
            node_id,
            device_type: DeviceType::Accelerator,
            device_id,
            mesh_index,
            resource_type: resource_type.into(),
            heavy_load_capable: false,
            proxy_device_id: None,
        }
    }

    pub fn host(cluster_id: i32, node_id: i32, resource_type: impl Into<String>) -> Self {
        Self {
            cluster_id,
            node_id,
            device_type: DeviceType::Cpu,
            device_id: HOST_DEVICE_ID,
            mesh_index: Vec::new(),
            resource_type: resource_type.into(),
            heavy_load_capable: false,
            proxy_device_id: None,
        }
    }

    pub fn with_heavy_load_capable(mut self, capable: bool) -> Self {
        self.heavy_load_capable = capable;
        self
    }

    pub fn with_proxy_device(mut self, proxy_device_id: i32) -> Self {
        self.proxy_device_id = Some(proxy_device_id);
        self
    }

    pub fn is_host(&self) -> bool {
        self.device_type == DeviceType::Cpu
    }

    pub fn with_proxy(&self) -> bool {
        self.proxy_device_id.is_some()
    }

    /// Canonical lookup key: `cluster:node:mesh0:mesh1…` for accelerators,
    /// `node:0` for host CPUs.
    pub fn key(&self) -> String {
        match self.device_type {
            DeviceType::Cpu => format!("{}:0", self.node_id),
            DeviceType::Accelerator => {
                let mut key = format!("{}:{}", self.cluster_id, self.node_id);
                for m in &self.mesh_index {
                    key.push(':');
                    key.push_str(&m.to_string());
                }
                key
            }
        }
    }

    /// Same physical device, ignoring the proxy annotation.
    pub fn same_device(&self, other: &DeviceInfo) -> bool {
        self.cluster_id == other.cluster_id
            && self.node_id == other.node_id
            && self.device_type == other.device_type
            && self.device_id == other.device_id
    }

    pub fn without_proxy(&self) -> DeviceInfo {
        DeviceInfo {
            proxy_device_id: None,
            ..self.clone()
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.device_type {
            DeviceType::Cpu => write!(f, "cpu[{}:{}]", self.cluster_id, self.node_id)?,
            DeviceType::Accelerator => write!(
                f,
                "acc[{}:{}:{}]",
                self.cluster_id, self.node_id, self.device_id
            )?,
        }
        if let Some(proxy) = self.proxy_device_id {
            write!(f, "+proxy{}", proxy)?;
        }
        Ok(())
    }
}

/// Parsed form of one logical device id entry.
///
/// `node_index` and `device_index` are positions in the reindexed device
/// table, not physical ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogicalDeviceId {
    pub cluster_id: i32,
    pub node_index: i32,
    pub device_index: i32,
    pub proxy: Option<i32>,
}

impl LogicalDeviceId {
    pub fn parse(entry: &str) -> Result<Self> {
        let parts = split_components(entry)?;
        let id = match parts.as_slice() {
            [node, device] => LogicalDeviceId {
                cluster_id: 0,
                node_index: *node,
                device_index: *device,
                proxy: None,
            },
            [cluster, node, device] => LogicalDeviceId {
                cluster_id: *cluster,
                node_index: *node,
                device_index: *device,
                proxy: None,
            },
            [cluster, node, device, proxy] => LogicalDeviceId {
                cluster_id: *cluster,
                node_index: *node,
                device_index: *device,
                proxy: Some(*proxy),
            },
            _ => {
                return Err(DeployError::param_invalid(format!(
                    "logical device id '{entry}' must have 2 to 4 components"
                )))
            }
        };
        Ok(id)
    }

    pub fn is_host(&self) -> bool {
        self.device_index == HOST_DEVICE_ID
    }

    /// Key into the reindexed device table.
    pub fn table_key(&self) -> String {
        format!("{}:{}:{}", self.cluster_id, self.node_index, self.device_index)
    }
}

impl fmt::Display for LogicalDeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.cluster_id, self.node_index, self.device_index)?;
        if let Some(p) = self.proxy {
            write!(f, ":{}", p)?;
        }
        Ok(())
    }
}

fn split_components(entry: &str) -> Result<Vec<i32>> {
    let parts: Vec<&str> = entry.split(':').collect();
    if parts.len() < 2 || parts.len() > 4 {
        return Err(DeployError::param_invalid(format!(
            "logical device id '{entry}' must have 2 to 4 components"
        )));
    }
    parts
        .iter()
        .map(|p| {
            p.parse::<i32>().map_err(|_| {
                DeployError::param_invalid(format!(
                    "logical device id '{entry}' has non-numeric component '{p}'"
                ))
            })
        })
        .collect()
}

/// Split a logical device id string into its entries.
///
/// Accepts a single entry (`"0:1:2"`) or a bracketed list (`"[0:1, 0:2]"`).
pub fn parse_logical_device_ids(ids: &str) -> Result<Vec<String>> {
    let trimmed = ids.trim();
    if trimmed.is_empty() {
        return Err(DeployError::param_invalid("logical device id is empty"));
    }

    let body = match trimmed.strip_prefix('[') {
        Some(rest) => rest.strip_suffix(']').ok_or_else(|| {
            DeployError::param_invalid(format!("unterminated device id list '{ids}'"))
        })?,
        None => {
            if trimmed.contains(',') {
                return Err(DeployError::param_invalid(format!(
                    "device id list '{ids}' must be enclosed in brackets"
                )));
            }
            trimmed
        }
    };

    if body.contains('[') || body.contains(']') {
        return Err(DeployError::param_invalid(format!(
            "nested or stray bracket in device id list '{ids}'"
        )));
    }
    if body.trim().is_empty() {
        return Err(DeployError::param_invalid(format!("device id list '{ids}' is empty")));
    }

    let mut out = Vec::new();
    for entry in body.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            return Err(DeployError::param_invalid(format!(
                "empty entry in device id list '{ids}'"
            )));
        }
        split_components(entry)?;
        out.push(entry.to_string());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatusCode;

    #[test]
    fn test_parse_single_bracket_entry() {
        assert_eq!(parse_logical_device_ids("[1:1]").unwrap(), vec!["1:1".to_string()]);
    }

    #[test]
    fn test_parse_list_tolerates_whitespace() {
        assert_eq!(
            parse_logical_device_ids(" [0:0:1 ,  0:1:0:2] ").unwrap(),
            vec!["0:0:1".to_string(), "0:1:0:2".to_string()]
        );
        assert_eq!(parse_logical_device_ids("0:0:1").unwrap(), vec!["0:0:1".to_string()]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["[a:b , 2:2]", "[]", "[ ]", "[0:1", "0:1]", "[0:1,,0:2]", "0:1, 0:2", "[[0:1]]", "7", "1:2:3:4:5", ""] {
            let err = parse_logical_device_ids(bad).unwrap_err();
            assert_eq!(err.status(), StatusCode::ParamInvalid, "input {bad:?}");
        }
    }

    #[test]
    fn test_logical_id_forms() {
        let short = LogicalDeviceId::parse("1:2").unwrap();
        assert_eq!((short.cluster_id, short.node_index, short.device_index), (0, 1, 2));
        assert_eq!(short.proxy, None);

        let proxied = LogicalDeviceId::parse("0:1:0:3").unwrap();
        assert_eq!(proxied.proxy, Some(3));
        assert_eq!(proxied.table_key(), "0:1:0");

        assert!(LogicalDeviceId::parse("0:0:-1").unwrap().is_host());
    }

    #[test]
    fn test_device_keys() {
        let acc = DeviceInfo::accelerator(0, 3, 1, vec![2, 5], "Ascend");
        assert_eq!(acc.key(), "0:3:2:5");
        let host = DeviceInfo::host(0, 3, "X86");
        assert_eq!(host.key(), "3:0");
        // mesh index defaults to the device id
        assert_eq!(DeviceInfo::accelerator(1, 0, 4, vec![], "Ascend").key(), "1:0:4");
    }

    #[test]
    fn test_proxy_flag() {
        let acc = DeviceInfo::accelerator(0, 0, 0, vec![0], "Ascend");
        assert!(!acc.with_proxy());
        let proxied = acc.clone().with_proxy_device(1);
        assert!(proxied.with_proxy());
        assert!(proxied.same_device(&acc));
        assert_eq!(proxied.without_proxy(), acc);
    }
}
