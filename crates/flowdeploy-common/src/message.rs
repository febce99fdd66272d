use serde::{Deserialize, Serialize};

use crate::device::DeviceInfo;
use crate::route::FlowRoutePlan;

/// One submodel instance a node agent must load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmodelDeployDesc {
    pub model_name: String,
    pub instance_name: String,
    pub device: DeviceInfo,
    pub queue_device: DeviceInfo,
    pub input_queue_indices: Vec<usize>,
    pub output_queue_indices: Vec<usize>,
    #[serde(default)]
    pub is_head: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
}

/// `POST /v1/deploy` on a node agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployRequest {
    pub model_id: String,
    pub node_id: i32,
    pub route_plan: FlowRoutePlan,
    #[serde(default)]
    pub submodels: Vec<SubmodelDeployDesc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployResponse {
    pub node_id: i32,
    pub loaded_instances: Vec<String>,
    pub endpoints: usize,
}

/// `POST /v1/undeploy` on a node agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UndeployRequest {
    pub model_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionKind {
    /// User-raised exception forwarded to every instance.
    Raise,
    /// Drop buffered exception state after a partial recovery.
    ClearExceptionData,
}

/// `POST /v1/exception` on a node agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExceptionNotification {
    #[serde(default)]
    pub model_id: String,
    pub kind: ExceptionKind,
    #[serde(default)]
    pub trans_id: u64,
    /// Empty means every instance of the model on the node.
    #[serde(default)]
    pub instance_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfilingRequest {
    pub enable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct AbnormalInstance {
    pub model_id: String,
    pub instance_name: String,
}

/// `POST /v1/abnormal` on a node agent: mark local faults to be reported
/// with the next heartbeat.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AbnormalReport {
    #[serde(default)]
    pub devices: Vec<DeviceInfo>,
    #[serde(default)]
    pub instances: Vec<AbnormalInstance>,
}

/// Heartbeat written by node agents under `/nodes/{id}/status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeStatus {
    pub node_id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub last_heartbeat_ms: u64,
    #[serde(default)]
    pub abnormal_devices: Vec<DeviceInfo>,
    #[serde(default)]
    pub abnormal_instances: Vec<AbnormalInstance>,
}
