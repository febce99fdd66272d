//! Placement and wiring for flow models: flatten nested submodels, place
//! instances on devices, allocate queues and groups, and project the result
//! onto each node.

pub mod flatten;
pub mod heterogeneous;
pub mod reindex;
pub mod route;

#[cfg(test)]
pub(crate) mod fixtures;

pub use flatten::{FlatModel, ModelRelationFlattener};
pub use heterogeneous::HeterogeneousDeployPlanner;
pub use reindex::{ensure_unique_node_ids, reindex_devices, DeviceTable};
pub use route::{
    print_endpoint_desc, print_flow_route_plan, DeployState, FlowRoutePlanner, PlanAttrs,
    RankTable, TagRegistry,
};
