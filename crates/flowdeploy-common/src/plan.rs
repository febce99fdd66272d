use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::device::DeviceInfo;
use crate::relation::EnqueuePolicy;

/// A physical queue placed on one device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueInfo {
    /// Endpoint this queue materialises.
    pub name: String,
    pub device: DeviceInfo,
    pub depth: u32,
    pub enqueue_policy: EnqueuePolicy,
    /// Canonical entry this one aliases, if it is a reuse of an existing
    /// (endpoint, device) queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_index: Option<usize>,
}

/// Fan-in/fan-out junction over several queues.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupEntryInfo {
    pub name: String,
    pub device: DeviceInfo,
    pub members: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_index: Option<usize>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum EndpointRef {
    Queue(usize),
    Group(usize),
}

impl fmt::Display for EndpointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointRef::Queue(i) => write!(f, "q{i}"),
            EndpointRef::Group(i) => write!(f, "g{i}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Binding {
    pub src: EndpointRef,
    pub dst: EndpointRef,
    #[serde(default)]
    pub before_load: bool,
}

impl Binding {
    pub fn new(src: EndpointRef, dst: EndpointRef, before_load: bool) -> Self {
        Self {
            src,
            dst,
            before_load,
        }
    }

    pub fn queues(src: usize, dst: usize) -> Self {
        Self::new(EndpointRef::Queue(src), EndpointRef::Queue(dst), false)
    }
}

/// Where one submodel instance runs and which queues it owns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmodelPlacement {
    pub model_name: String,
    pub instance_name: String,
    pub device: DeviceInfo,
    /// Device hosting the instance's queues; carries the proxy for heavy-load
    /// submodels.
    pub queue_device: DeviceInfo,
    pub input_queue_indices: Vec<usize>,
    pub output_queue_indices: Vec<usize>,
    #[serde(default)]
    pub is_head: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DynamicSchedPlan {
    pub status_output_queue_indices: Vec<usize>,
    pub sched_input_queue_indices: Vec<usize>,
    pub sched_output_queue_indices: Vec<usize>,
    pub datagw_request_bindings: Vec<Binding>,
    pub entry_bindings: Vec<Binding>,
    pub model_index_info: BTreeMap<String, u32>,
    pub model_instance_num: BTreeMap<String, u32>,
}

/// Concrete placement and channel wiring for one root model.
///
/// Queue and group indices are dense and stable for the plan's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployPlan {
    pub model_name: String,
    pub head_device: DeviceInfo,
    pub queues: Vec<QueueInfo>,
    pub groups: Vec<GroupEntryInfo>,
    pub bindings: Vec<Binding>,
    /// Keyed by instance name.
    pub submodels: BTreeMap<String, SubmodelPlacement>,
    pub input_queue_indices: Vec<usize>,
    pub output_queue_indices: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_sched_plan: Option<DynamicSchedPlan>,
}

impl DeployPlan {
    /// Index of the physical queue behind `index`, following reuse aliases.
    pub fn canonical_queue(&self, index: usize) -> usize {
        let mut cur = index;
        while let Some(next) = self.queues.get(cur).and_then(|q| q.ref_index) {
            if next == cur {
                break;
            }
            cur = next;
        }
        cur
    }

    pub fn endpoint_device(&self, endpoint: EndpointRef) -> Option<&DeviceInfo> {
        match endpoint {
            EndpointRef::Queue(i) => self.queues.get(i).map(|q| &q.device),
            EndpointRef::Group(i) => self.groups.get(i).map(|g| &g.device),
        }
    }

    /// Nodes owning at least one queue, group or instance.
    pub fn participating_nodes(&self) -> BTreeSet<i32> {
        let mut nodes: BTreeSet<i32> = self.queues.iter().map(|q| q.device.node_id).collect();
        nodes.extend(self.groups.iter().map(|g| g.device.node_id));
        for sm in self.submodels.values() {
            nodes.insert(sm.device.node_id);
            nodes.insert(sm.queue_device.node_id);
        }
        nodes
    }

    pub fn instances_on_node(&self, node_id: i32) -> impl Iterator<Item = &SubmodelPlacement> {
        self.submodels
            .values()
            .filter(move |sm| sm.device.node_id == node_id || sm.queue_device.node_id == node_id)
    }

    /// model name → instance name → devices the instance occupies.
    pub fn device_map(&self) -> BTreeMap<String, BTreeMap<String, BTreeSet<DeviceInfo>>> {
        let mut out: BTreeMap<String, BTreeMap<String, BTreeSet<DeviceInfo>>> = BTreeMap::new();
        for sm in self.submodels.values() {
            let devices = out
                .entry(sm.model_name.clone())
                .or_default()
                .entry(sm.instance_name.clone())
                .or_default();
            devices.insert(sm.device.clone());
            devices.insert(sm.queue_device.without_proxy());
        }
        out
    }
}
