use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const DEFAULT_QUEUE_DEPTH: u32 = 128;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EnqueuePolicy {
    #[default]
    Fifo,
    Overwrite,
}

impl EnqueuePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnqueuePolicy::Fifo => "FIFO",
            EnqueuePolicy::Overwrite => "OVERWRITE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EndpointKind {
    Queue {
        #[serde(default = "default_depth")]
        depth: u32,
        #[serde(default)]
        enqueue_policy: EnqueuePolicy,
    },
    Tag,
    Group,
    ExternalQueue {
        #[serde(default = "default_depth")]
        depth: u32,
        #[serde(default)]
        enqueue_policy: EnqueuePolicy,
    },
}

fn default_depth() -> u32 {
    DEFAULT_QUEUE_DEPTH
}

/// A named communication point of a model relation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    pub name: String,
    #[serde(flatten)]
    pub kind: EndpointKind,
}

impl Endpoint {
    pub fn queue(name: impl Into<String>, depth: u32, enqueue_policy: EnqueuePolicy) -> Self {
        Self {
            name: name.into(),
            kind: EndpointKind::Queue {
                depth,
                enqueue_policy,
            },
        }
    }

    pub fn default_queue(name: impl Into<String>) -> Self {
        Self::queue(name, DEFAULT_QUEUE_DEPTH, EnqueuePolicy::Fifo)
    }

    pub fn external_queue(name: impl Into<String>, depth: u32) -> Self {
        Self {
            name: name.into(),
            kind: EndpointKind::ExternalQueue {
                depth,
                enqueue_policy: EnqueuePolicy::Fifo,
            },
        }
    }

    /// Depth and policy used when this endpoint is materialised as a queue.
    pub fn queue_attrs(&self) -> (u32, EnqueuePolicy) {
        match &self.kind {
            EndpointKind::Queue {
                depth,
                enqueue_policy,
            }
            | EndpointKind::ExternalQueue {
                depth,
                enqueue_policy,
            } => (*depth, *enqueue_policy),
            EndpointKind::Tag | EndpointKind::Group => (DEFAULT_QUEUE_DEPTH, EnqueuePolicy::Fifo),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RootEndpointInfo {
    #[serde(default)]
    pub input_names: Vec<String>,
    #[serde(default)]
    pub output_names: Vec<String>,
    #[serde(default)]
    pub external_input_queue_names: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmodelEndpointInfo {
    #[serde(default)]
    pub input_names: Vec<String>,
    #[serde(default)]
    pub output_names: Vec<String>,
}

/// Connectivity of one (sub)model: which endpoints feed which submodel.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelRelation {
    #[serde(default)]
    pub root: RootEndpointInfo,
    #[serde(default)]
    pub submodels: BTreeMap<String, SubmodelEndpointInfo>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

impl ModelRelation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root<I, O>(mut self, inputs: I, outputs: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        self.root.input_names = inputs.into_iter().map(Into::into).collect();
        self.root.output_names = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_submodel<I, O>(mut self, name: impl Into<String>, inputs: I, outputs: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        self.submodels.insert(
            name.into(),
            SubmodelEndpointInfo {
                input_names: inputs.into_iter().map(Into::into).collect(),
                output_names: outputs.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn endpoint(&self, name: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    /// Undeclared endpoints behave as default queues.
    pub fn queue_attrs(&self, name: &str) -> (u32, EnqueuePolicy) {
        self.endpoint(name)
            .map(Endpoint::queue_attrs)
            .unwrap_or((DEFAULT_QUEUE_DEPTH, EnqueuePolicy::Fifo))
    }

    /// Every endpoint name referenced by the root or a submodel, in first-seen order.
    pub fn referenced_names(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut push = |n: &String| {
            if !out.contains(n) {
                out.push(n.clone());
            }
        };
        self.root.input_names.iter().for_each(&mut push);
        self.root.output_names.iter().for_each(&mut push);
        self.root.external_input_queue_names.iter().for_each(&mut push);
        for info in self.submodels.values() {
            info.input_names.iter().for_each(&mut push);
            info.output_names.iter().for_each(&mut push);
        }
        out
    }
}

/// One partition of a flow model.
///
/// A submodel is either a leaf that runs on a device, or a wrapper around a
/// nested [`FlowModel`] that the flattener expands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmodelSpec {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,

    /// `"cluster:node:device[:proxy]"` or a bracketed list of such entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_device_id: Option<String>,

    #[serde(default)]
    pub heavy_load: bool,

    /// Location of the compiled submodel shipped to the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested: Option<Box<FlowModel>>,
}

impl SubmodelSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_type: None,
            logical_device_id: None,
            heavy_load: false,
            artifact: None,
            nested: None,
        }
    }

    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn with_logical_device_id(mut self, id: impl Into<String>) -> Self {
        self.logical_device_id = Some(id.into());
        self
    }

    pub fn with_heavy_load(mut self, heavy_load: bool) -> Self {
        self.heavy_load = heavy_load;
        self
    }

    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }

    pub fn with_nested(mut self, model: FlowModel) -> Self {
        self.nested = Some(Box::new(model));
        self
    }

    pub fn is_wrapper(&self) -> bool {
        self.nested.is_some()
    }
}

/// Root model submitted for deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlowModel {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<ModelRelation>,

    #[serde(default)]
    pub submodels: Vec<SubmodelSpec>,

    #[serde(default)]
    pub dynamic_sched: bool,
}

impl FlowModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relation: None,
            submodels: Vec::new(),
            dynamic_sched: false,
        }
    }

    pub fn with_relation(mut self, relation: ModelRelation) -> Self {
        self.relation = Some(relation);
        self
    }

    pub fn with_submodel(mut self, submodel: SubmodelSpec) -> Self {
        self.submodels.push(submodel);
        self
    }

    pub fn with_dynamic_sched(mut self, enabled: bool) -> Self {
        self.dynamic_sched = enabled;
        self
    }

    pub fn submodel(&self, name: &str) -> Option<&SubmodelSpec> {
        self.submodels.iter().find(|s| s.name == name)
    }
}
