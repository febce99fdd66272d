use serde::{Deserialize, Serialize};

use crate::relation::EnqueuePolicy;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EndpointDescKind {
    Queue {
        queue_index: usize,
        depth: u32,
        enqueue_policy: EnqueuePolicy,
        device_key: String,
    },
    /// Remote peer reachable through the communication fabric.
    Tag {
        tag_id: u64,
        local_rank: u32,
        peer_rank: u32,
        peer_device_key: String,
    },
    /// Members are positions in [`FlowRoutePlan::endpoints`].
    Group { members: Vec<usize>, ordered: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointDesc {
    pub name: String,
    #[serde(flatten)]
    pub kind: EndpointDescKind,
}

impl EndpointDesc {
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            EndpointDescKind::Queue { .. } => "queue",
            EndpointDescKind::Tag { .. } => "tag",
            EndpointDescKind::Group { .. } => "group",
        }
    }
}

/// `(src, dst)` positions in [`FlowRoutePlan::endpoints`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouteBinding {
    pub src: usize,
    pub dst: usize,
}

/// Node-local wiring descriptor exchanged between master and node agents.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlowRoutePlan {
    pub node_id: i32,
    #[serde(default)]
    pub endpoints: Vec<EndpointDesc>,
    #[serde(default)]
    pub bindings: Vec<RouteBinding>,
    #[serde(default)]
    pub bindings_before_load: Vec<RouteBinding>,
}

impl FlowRoutePlan {
    pub fn empty(node_id: i32) -> Self {
        Self {
            node_id,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty() && self.bindings.is_empty() && self.bindings_before_load.is_empty()
    }

    pub fn count_of(&self, type_name: &str) -> usize {
        self.endpoints.iter().filter(|e| e.type_name() == type_name).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape_is_tagged() {
        let plan = FlowRoutePlan {
            node_id: 1,
            endpoints: vec![
                EndpointDesc {
                    name: "x".into(),
                    kind: EndpointDescKind::Queue {
                        queue_index: 0,
                        depth: 16,
                        enqueue_policy: EnqueuePolicy::Fifo,
                        device_key: "0:1:0".into(),
                    },
                },
                EndpointDesc {
                    name: "g".into(),
                    kind: EndpointDescKind::Group {
                        members: vec![0],
                        ordered: true,
                    },
                },
            ],
            bindings: vec![RouteBinding { src: 0, dst: 1 }],
            bindings_before_load: vec![],
        };
        let value = serde_json::to_value(&plan).unwrap();
        assert_eq!(value["endpoints"][0]["type"], "queue");
        assert_eq!(value["endpoints"][1]["type"], "group");
        let back: FlowRoutePlan = serde_json::from_value(value).unwrap();
        assert_eq!(back, plan);
        assert_eq!(back.count_of("queue"), 1);
        assert!(FlowRoutePlan::empty(3).is_empty());
    }
}
