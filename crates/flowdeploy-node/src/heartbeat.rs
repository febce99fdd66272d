use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use flowdeploy_common::{now_ms, NodeStatus};
use flowdeploy_meta::{keys, MetaStore, MetaStoreExt};

use crate::runtime::NodeRuntime;

/// Write one heartbeat, carrying the faults reported since start-up.
pub async fn publish_heartbeat(
    store: &dyn MetaStore,
    runtime: &NodeRuntime,
    address: Option<&str>,
    ttl_ms: u64,
) -> anyhow::Result<()> {
    let abnormal = runtime.abnormal_snapshot().await;
    let status = NodeStatus {
        node_id: runtime.node_id(),
        address: address.map(str::to_string),
        last_heartbeat_ms: now_ms(),
        abnormal_devices: abnormal.devices,
        abnormal_instances: abnormal.instances,
    };
    store
        .put_json(&keys::node_status(runtime.node_id()), &status, Some(ttl_ms))
        .await?;
    Ok(())
}

pub async fn heartbeat_loop(
    store: Arc<dyn MetaStore>,
    runtime: NodeRuntime,
    address: Option<String>,
    ttl_ms: u64,
    interval_ms: u64,
    cancel: CancellationToken,
) {
    loop {
        if let Err(e) = publish_heartbeat(store.as_ref(), &runtime, address.as_deref(), ttl_ms).await {
            tracing::warn!(error=%e, "failed to write heartbeat");
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
        }
    }
    tracing::debug!(node_id = runtime.node_id(), "heartbeat loop stopped");
}
