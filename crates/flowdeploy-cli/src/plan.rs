use std::path::Path;

use anyhow::Context;

use flowdeploy_common::FlowModel;
use flowdeploy_master::{plan_model, PlanOptions, ResourceManager};
use flowdeploy_planner::DeployState;

pub fn load_model(path: &Path) -> anyhow::Result<FlowModel> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse flow model {}", path.display()))
}

/// Plan against the full inventory of `resources_dir` without contacting
/// any node.
pub fn plan_offline(model: &FlowModel, resources_dir: &Path, opts: PlanOptions) -> anyhow::Result<DeployState> {
    let rm = ResourceManager::load(resources_dir, None)?;
    let devices = rm.devices().to_vec();
    tracing::debug!(devices = devices.len(), model = %model.name, "planning offline");
    Ok(plan_model(&rm, devices, "offline", model, opts)?)
}
