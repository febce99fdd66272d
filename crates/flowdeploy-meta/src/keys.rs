//! Key layout in the metadata store.

pub const NODES_PREFIX: &str = "/nodes/";
pub const DEPLOYED_MODELS_PREFIX: &str = "/deployed_models/";

pub fn node_status(node_id: i32) -> String {
    format!("{NODES_PREFIX}{node_id}/status")
}

/// Inverse of [`node_status`].
pub fn node_id_from_status_key(key: &str) -> Option<i32> {
    key.strip_prefix(NODES_PREFIX)?
        .strip_suffix("/status")?
        .parse()
        .ok()
}

pub fn deployed_model(model_id: &str) -> String {
    format!("{DEPLOYED_MODELS_PREFIX}{model_id}")
}
