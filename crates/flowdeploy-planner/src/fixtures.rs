use flowdeploy_common::{DeployPlan, DeviceInfo, FlowModel, ModelRelation, SubmodelSpec};

use crate::flatten::ModelRelationFlattener;
use crate::heterogeneous::HeterogeneousDeployPlanner;

pub(crate) fn make_head() -> DeviceInfo {
    DeviceInfo::host(0, 0, "X86")
}

pub(crate) fn make_acc(node_id: i32, device_id: i32) -> DeviceInfo {
    DeviceInfo::accelerator(0, node_id, device_id, vec![device_id], "Ascend")
}

/// A reads in0 and writes x and a2b, B reads in1 and a2b and writes y,
/// C merges x and y into out.
pub(crate) fn make_chain_model(dynamic_sched: bool) -> FlowModel {
    let rel = ModelRelation::new()
        .with_root(["in0", "in1"], ["out"])
        .with_submodel("A", ["in0"], ["x", "a2b"])
        .with_submodel("B", ["in1", "a2b"], ["y"])
        .with_submodel("C", ["x", "y"], ["out"]);
    FlowModel::new("chain")
        .with_relation(rel)
        .with_submodel(SubmodelSpec::new("A").with_resource_type("Ascend"))
        .with_submodel(SubmodelSpec::new("B").with_resource_type("Ascend"))
        .with_submodel(SubmodelSpec::new("C").with_resource_type("Ascend"))
        .with_dynamic_sched(dynamic_sched)
}

/// Chain model on a single accelerator of node 1, head on node 0.
pub(crate) fn make_fixture_plan(dynamic_sched: bool) -> DeployPlan {
    let flat = ModelRelationFlattener::new()
        .flatten(&make_chain_model(dynamic_sched))
        .unwrap();
    HeterogeneousDeployPlanner::new(vec![make_acc(1, 0)], make_head())
        .build_plan(&flat)
        .unwrap()
}
