use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use flowdeploy_common::{now_ms, DeviceInfo, NodeStatus};
use flowdeploy_meta::{keys, MetaStore, MetaStoreExt, WatchEvent};

use crate::abnormal::DeployContext;
use crate::context::ClusterContext;
use crate::metrics::SharedMetrics;

#[derive(Debug, Default)]
struct SeenNode {
    last_heartbeat_ms: u64,
    devices: BTreeSet<DeviceInfo>,
    instances: BTreeSet<(String, String)>,
    lost: bool,
}

/// Turns node heartbeats into abnormal reports for the fault monitor.
///
/// Only transitions are reported: a device or instance is pushed when it
/// first shows up in a node's report, a node when its key disappears or its
/// heartbeat goes stale. A node's own report never marks the node lost.
/// Entries are dropped with their key, so decommissioned nodes do not linger.
pub struct NodeWatcher {
    ctx: Arc<ClusterContext>,
    deploy_ctx: Arc<DeployContext>,
    stale_after_ms: u64,
    nodes: Mutex<BTreeMap<i32, SeenNode>>,
}

impl NodeWatcher {
    pub fn new(ctx: Arc<ClusterContext>, deploy_ctx: Arc<DeployContext>, stale_after_ms: u64) -> Self {
        Self {
            ctx,
            deploy_ctx,
            stale_after_ms,
            nodes: Mutex::new(BTreeMap::new()),
        }
    }

    pub async fn ingest_status(&self, status: NodeStatus) {
        if let Some(addr) = &status.address {
            self.ctx.record_node_address(status.node_id, addr.clone());
        }

        let devices: BTreeSet<DeviceInfo> =
            status.abnormal_devices.iter().map(|d| d.without_proxy()).collect();
        let instances: BTreeSet<(String, String)> = status
            .abnormal_instances
            .iter()
            .map(|i| (i.model_id.clone(), i.instance_name.clone()))
            .collect();

        let (new_devices, new_instances, fresh) = {
            let mut nodes = self.nodes.lock().await;
            let seen = nodes.entry(status.node_id).or_default();
            let new_devices: Vec<DeviceInfo> = devices.difference(&seen.devices).cloned().collect();
            let new_instances: Vec<(String, String)> =
                instances.difference(&seen.instances).cloned().collect();
            seen.devices = devices;
            seen.instances = instances;
            seen.last_heartbeat_ms = status.last_heartbeat_ms;
            let fresh = now_ms().saturating_sub(status.last_heartbeat_ms) <= self.stale_after_ms;
            if fresh {
                seen.lost = false;
            }
            (new_devices, new_instances, fresh)
        };

        // also covers a node whose entry was dropped with its key
        if fresh && self.ctx.restore_node(status.node_id) {
            tracing::info!(node_id = status.node_id, "node is back");
        }
        for d in new_devices {
            tracing::warn!(node_id = status.node_id, device = %d, "device reported abnormal");
            self.deploy_ctx.push_abnormal_device(d).await;
        }
        for (model_id, instance) in new_instances {
            tracing::warn!(node_id = status.node_id, model_id = %model_id, instance = %instance, "instance reported abnormal");
            self.deploy_ctx
                .push_abnormal_instance(&model_id, &instance)
                .await;
        }
    }

    /// Returns false when the node was already marked lost.
    async fn mark_node_lost(&self, node_id: i32, reason: &str) -> bool {
        {
            let mut nodes = self.nodes.lock().await;
            let seen = nodes.entry(node_id).or_default();
            if seen.lost {
                return false;
            }
            seen.lost = true;
        }
        self.report_lost(node_id, reason).await;
        true
    }

    async fn report_lost(&self, node_id: i32, reason: &str) {
        tracing::warn!(node_id, reason, "node lost");
        self.ctx.exclude_node(node_id);
        SharedMetrics::inc(&self.ctx.metrics().abnormal_nodes_total);
        self.deploy_ctx.push_abnormal_node(node_id).await;
    }

    /// Drop a node whose status key is gone. Reported once even when the
    /// deletion is seen again after the entry was removed.
    pub async fn forget_node(&self, node_id: i32) -> bool {
        let removed = self.nodes.lock().await.remove(&node_id);
        match removed {
            Some(seen) if !seen.lost => {
                self.report_lost(node_id, "heartbeat key removed").await;
                true
            }
            _ => false,
        }
    }

    pub async fn tracked_nodes(&self) -> BTreeSet<i32> {
        self.nodes.lock().await.keys().copied().collect()
    }

    /// Mark every node whose last heartbeat is older than the stale window.
    pub async fn scan_stale(&self, now_ms: u64) -> Vec<i32> {
        let stale: Vec<i32> = self
            .nodes
            .lock()
            .await
            .iter()
            .filter(|(_, s)| !s.lost && now_ms.saturating_sub(s.last_heartbeat_ms) > self.stale_after_ms)
            .map(|(&id, _)| id)
            .collect();
        let mut lost = Vec::with_capacity(stale.len());
        for node_id in stale {
            if self.mark_node_lost(node_id, "heartbeat stale").await {
                lost.push(node_id);
            }
        }
        lost
    }

    async fn handle_event(&self, ev: WatchEvent) {
        let Some(node_id) = keys::node_id_from_status_key(&ev.key) else {
            return;
        };
        match ev.value {
            Some(bytes) => match serde_json::from_slice::<NodeStatus>(&bytes) {
                Ok(status) => self.ingest_status(status).await,
                Err(e) => tracing::warn!(key = %ev.key, error = %e, "undecodable node status"),
            },
            None => {
                self.forget_node(node_id).await;
            }
        }
    }

    /// Watch `/nodes/`, then list it, reconnecting until cancelled. The
    /// watch is opened first so no update between the two is missed.
    pub async fn run(self: Arc<Self>, store: Arc<dyn MetaStore>, cancel: CancellationToken) {
        let scan_every = Duration::from_millis((self.stale_after_ms / 2).max(100));
        loop {
            let mut stream = match store.watch_prefix(keys::NODES_PREFIX, None).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error=%e, "failed to watch node status, will retry");
                    if sleep_or_cancel(&cancel, Duration::from_secs(1)).await {
                        return;
                    }
                    continue;
                }
            };

            match store.list_json::<NodeStatus>(keys::NODES_PREFIX).await {
                Ok(items) => {
                    for (_, status) in items {
                        self.ingest_status(status).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(error=%e, "failed to list node status, will retry");
                    if sleep_or_cancel(&cancel, Duration::from_secs(1)).await {
                        return;
                    }
                    continue;
                }
            }

            let mut scan = tokio::time::interval(scan_every);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = scan.tick() => {
                        self.scan_stale(now_ms()).await;
                    }
                    ev = stream.next() => match ev {
                        Some(ev) => self.handle_event(ev).await,
                        None => break,
                    },
                }
            }

            tracing::warn!("node status watch stream ended, reconnecting");
            if sleep_or_cancel(&cancel, Duration::from_secs(1)).await {
                return;
            }
        }
    }
}

/// True when cancelled.
async fn sleep_or_cancel(cancel: &CancellationToken, d: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(d) => false,
    }
}
