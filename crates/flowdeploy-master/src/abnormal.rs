//! Fault monitor for deployed models.
//!
//! Two trigger sources feed one recovery pipeline: a [`ConfigChangeSource`]
//! (reloaded device config) and the [`DeployContext`] filled by heartbeat
//! ingestion. Each affected model is either partially recovered (exception
//! data cleared) or fully redeployed through its registered callbacks.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flowdeploy_common::{DeployError, DeployedModel, DeviceInfo, ModelHealth, Result};

use crate::config_source::ConfigChangeSource;
use crate::metrics::SharedMetrics;

pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_millis(500);
const MIN_MONITOR_INTERVAL: Duration = Duration::from_millis(100);
const MAX_MONITOR_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryKind {
    /// Drop buffered exception data of the abnormal instances only.
    ClearExceptionData,
    /// Tear down and redeploy every instance of the model.
    Redeploy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryRequest {
    pub model_id: String,
    pub kind: RecoveryKind,
    pub abnormal_devices: Vec<DeviceInfo>,
    pub abnormal_nodes: Vec<i32>,
    pub abnormal_instances: Vec<String>,
}

pub type RedeployCallback =
    Arc<dyn Fn(RecoveryRequest) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

pub fn redeploy_callback<F, Fut>(f: F) -> RedeployCallback
where
    F: Fn(RecoveryRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |req| f(req).boxed())
}

/// Abnormal state accumulated between two monitor iterations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbnormalInfo {
    /// model id → abnormal instance names.
    pub instances: BTreeMap<String, BTreeSet<String>>,
    pub nodes: BTreeSet<i32>,
    pub devices: BTreeSet<DeviceInfo>,
}

impl AbnormalInfo {
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty() && self.nodes.is_empty() && self.devices.is_empty()
    }
}

/// Shared sink for abnormal reports coming from heartbeats.
#[derive(Debug, Default)]
pub struct DeployContext {
    inner: Mutex<AbnormalInfo>,
}

impl DeployContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_abnormal_instance(&self, model_id: &str, instance_name: &str) {
        self.inner
            .lock()
            .await
            .instances
            .entry(model_id.to_string())
            .or_default()
            .insert(instance_name.to_string());
    }

    pub async fn push_abnormal_node(&self, node_id: i32) {
        self.inner.lock().await.nodes.insert(node_id);
    }

    pub async fn push_abnormal_device(&self, device: DeviceInfo) {
        self.inner.lock().await.devices.insert(device.without_proxy());
    }

    pub async fn take(&self) -> AbnormalInfo {
        std::mem::take(&mut *self.inner.lock().await)
    }
}

/// True iff at least one device of `devices` appears in `list`.
pub fn is_in_device_list(devices: &BTreeSet<DeviceInfo>, list: &[DeviceInfo]) -> bool {
    devices.iter().any(|d| list.iter().any(|l| l.same_device(d)))
}

/// Partial recovery is possible for a dynamically scheduled model that keeps
/// at least one healthy instance, as long as no newly abnormal instance shares
/// a device with an instance already marked abnormal.
pub fn is_support_dynamic_sched_recover(
    model: &DeployedModel,
    new_abnormal: &BTreeSet<String>,
    already_abnormal: &BTreeSet<String>,
) -> bool {
    if !model.dynamic_sched || new_abnormal.is_empty() {
        return false;
    }
    let marked: BTreeSet<&String> = already_abnormal.difference(new_abnormal).collect();
    if new_abnormal.len() + marked.len() >= model.instance_count() {
        return false;
    }
    let marked_devices: Vec<DeviceInfo> = marked
        .iter()
        .filter_map(|name| model.instance_devices(name))
        .flat_map(|devs| devs.iter().cloned())
        .collect();
    new_abnormal.iter().all(|name| match model.instance_devices(name) {
        Some(devs) => !is_in_device_list(devs, &marked_devices),
        None => false,
    })
}

struct ModelTracking {
    deployed: DeployedModel,
    health: ModelHealth,
    callbacks: Vec<RedeployCallback>,
    marked_abnormal: BTreeSet<String>,
    lock: Arc<Mutex<()>>,
}

impl ModelTracking {
    fn new(deployed: DeployedModel) -> Self {
        Self {
            deployed,
            health: ModelHealth::Healthy,
            callbacks: Vec::new(),
            marked_abnormal: BTreeSet::new(),
            lock: Arc::new(Mutex::new(())),
        }
    }
}

#[derive(Default)]
struct HandlerState {
    finalized: bool,
    models: BTreeMap<String, ModelTracking>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryOutcome {
    pub recovered: Vec<String>,
    pub failed: Vec<String>,
}

impl RecoveryOutcome {
    pub fn ok(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn summary(&self) -> String {
        format!("{} recovered, {} failed", self.recovered.len(), self.failed.len())
    }
}

struct PendingRecovery {
    request: RecoveryRequest,
    lock: Arc<Mutex<()>>,
    callbacks: Vec<RedeployCallback>,
}

pub struct AbnormalStatusHandler {
    context: Arc<DeployContext>,
    metrics: Arc<SharedMetrics>,
    interval: Duration,
    state: Mutex<HandlerState>,
    cancel: CancellationToken,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl AbnormalStatusHandler {
    pub fn new(context: Arc<DeployContext>, metrics: Arc<SharedMetrics>) -> Self {
        Self {
            context,
            metrics,
            interval: DEFAULT_MONITOR_INTERVAL,
            state: Mutex::new(HandlerState::default()),
            cancel: CancellationToken::new(),
            monitor: Mutex::new(None),
        }
    }

    /// Poll interval, clamped to 100..=1000 ms.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.clamp(MIN_MONITOR_INTERVAL, MAX_MONITOR_INTERVAL);
        self
    }

    pub fn with_deployed_model(mut self, deployed: DeployedModel) -> Self {
        let id = deployed.model_id.clone();
        self.state
            .get_mut()
            .models
            .insert(id, ModelTracking::new(deployed));
        self
    }

    /// Attach a callback to a model added with [`Self::with_deployed_model`].
    pub fn with_callback(mut self, model_id: &str, callback: RedeployCallback) -> Self {
        if let Some(t) = self.state.get_mut().models.get_mut(model_id) {
            t.callbacks.push(callback);
        }
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn deploy_context(&self) -> &Arc<DeployContext> {
        &self.context
    }

    pub async fn register_model(&self, deployed: DeployedModel) -> Result<()> {
        let mut st = self.state.lock().await;
        if st.finalized {
            return Err(DeployError::failed(format!(
                "abnormal status handler is finalized, model '{}' is not tracked",
                deployed.model_id
            )));
        }
        if st.models.contains_key(&deployed.model_id) {
            return Err(DeployError::param_invalid(format!(
                "model '{}' is already tracked",
                deployed.model_id
            )));
        }
        debug!(model_id = %deployed.model_id, instances = deployed.instance_count(), "tracking deployed model");
        st.models
            .insert(deployed.model_id.clone(), ModelTracking::new(deployed));
        Ok(())
    }

    /// Replace the placement of a tracked model after a redeploy.
    pub async fn update_deployed_model(&self, deployed: DeployedModel) -> Result<()> {
        let mut st = self.state.lock().await;
        let t = st.models.get_mut(&deployed.model_id).ok_or_else(|| {
            DeployError::param_invalid(format!("model '{}' is not tracked", deployed.model_id))
        })?;
        t.deployed = deployed;
        Ok(())
    }

    pub async fn register_callback(&self, model_id: &str, callback: RedeployCallback) -> Result<()> {
        let mut st = self.state.lock().await;
        if st.finalized {
            return Err(DeployError::failed("abnormal status handler is finalized"));
        }
        let t = st
            .models
            .get_mut(model_id)
            .ok_or_else(|| DeployError::param_invalid(format!("model '{model_id}' is not tracked")))?;
        t.callbacks.push(callback);
        Ok(())
    }

    pub async fn unregister_model(&self, model_id: &str) -> bool {
        self.state.lock().await.models.remove(model_id).is_some()
    }

    pub async fn model_health(&self, model_id: &str) -> Option<ModelHealth> {
        self.state.lock().await.models.get(model_id).map(|t| t.health)
    }

    pub async fn deployed_model_count(&self) -> usize {
        self.state.lock().await.models.len()
    }

    pub async fn is_finalized(&self) -> bool {
        self.state.lock().await.finalized
    }

    /// Spawn the monitor loop.
    pub async fn start(self: &Arc<Self>, source: Option<Box<dyn ConfigChangeSource>>) {
        if self.is_finalized().await {
            warn!("abnormal status handler is finalized, monitor not started");
            return;
        }
        let mut monitor = self.monitor.lock().await;
        if monitor.is_some() {
            return;
        }
        let this = self.clone();
        *monitor = Some(tokio::spawn(async move { this.monitor_loop(source).await }));
        info!(interval_ms = self.interval.as_millis() as u64, "abnormal status monitor started");
    }

    async fn monitor_loop(self: Arc<Self>, mut source: Option<Box<dyn ConfigChangeSource>>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            self.run_once(source.as_deref_mut()).await;
        }
        debug!("abnormal status monitor stopped");
    }

    /// One monitor iteration: config trigger first, then heartbeat state.
    pub async fn run_once(&self, source: Option<&mut (dyn ConfigChangeSource + 'static)>) {
        if let Some(source) = source {
            match source.poll().await {
                Ok(Some(change)) => {
                    info!(abnormal_devices = change.abnormal_devices.len(), "redeploy requested by config change");
                    let info = AbnormalInfo {
                        devices: change.abnormal_devices.into_iter().collect(),
                        ..Default::default()
                    };
                    let outcome = self.handle_abnormal(info, true).await;
                    if let Err(e) = source.complete(outcome.ok(), &outcome.summary()).await {
                        warn!(error=%e, "failed to report config change outcome");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error=%e, "config change poll failed"),
            }
        }

        let info = self.pre_handle_abnormal_info().await;
        if !info.is_empty() {
            self.handle_abnormal(info, false).await;
        }
    }

    /// Drain the heartbeat state, keeping only what concerns tracked models.
    pub async fn pre_handle_abnormal_info(&self) -> AbnormalInfo {
        let mut info = self.context.take().await;
        let st = self.state.lock().await;
        info.instances.retain(|model_id, _| st.models.contains_key(model_id));
        info
    }

    /// Run recovery for every model touched by `info`; `all_models` forces
    /// a full redeploy of every tracked model.
    pub async fn handle_abnormal(&self, info: AbnormalInfo, all_models: bool) -> RecoveryOutcome {
        let devices: Vec<DeviceInfo> = info.devices.iter().cloned().collect();
        let nodes: Vec<i32> = info.nodes.iter().copied().collect();

        let pending: Vec<PendingRecovery> = {
            let mut st = self.state.lock().await;
            if st.finalized {
                return RecoveryOutcome::default();
            }
            let mut pending = Vec::new();
            for (model_id, t) in st.models.iter_mut() {
                let new_instances = info.instances.get(model_id).cloned().unwrap_or_default();
                let device_hit = is_in_device_list(&t.deployed.all_devices(), &devices);
                let node_hit = t.deployed.all_nodes().iter().any(|n| info.nodes.contains(n));
                if !all_models && !device_hit && !node_hit && new_instances.is_empty() {
                    continue;
                }

                t.health = ModelHealth::AbnormalDetected;
                let partial = !all_models
                    && !device_hit
                    && !node_hit
                    && is_support_dynamic_sched_recover(&t.deployed, &new_instances, &t.marked_abnormal);
                let kind = if partial {
                    RecoveryKind::ClearExceptionData
                } else {
                    RecoveryKind::Redeploy
                };
                info!(model_id = %model_id, kind = ?kind, device_hit, node_hit, instances = new_instances.len(), "abnormal model detected");

                t.marked_abnormal.extend(new_instances.iter().cloned());
                t.health = ModelHealth::RedeployInProgress;
                pending.push(PendingRecovery {
                    request: RecoveryRequest {
                        model_id: model_id.clone(),
                        kind,
                        abnormal_devices: devices.clone(),
                        abnormal_nodes: nodes.clone(),
                        abnormal_instances: new_instances.into_iter().collect(),
                    },
                    lock: t.lock.clone(),
                    callbacks: t.callbacks.clone(),
                });
            }
            pending
        };

        let results = join_all(pending.into_iter().map(|p| self.run_callbacks(p))).await;

        let mut outcome = RecoveryOutcome::default();
        let mut st = self.state.lock().await;
        for (request, ok) in results {
            if let Some(t) = st.models.get_mut(&request.model_id) {
                if ok {
                    t.health = ModelHealth::Healthy;
                    if request.kind == RecoveryKind::Redeploy {
                        t.marked_abnormal.clear();
                    }
                } else {
                    t.health = ModelHealth::PermanentlyFailed;
                }
            }
            if ok {
                match request.kind {
                    RecoveryKind::Redeploy => SharedMetrics::inc(&self.metrics.redeploy_total),
                    RecoveryKind::ClearExceptionData => {
                        SharedMetrics::inc(&self.metrics.partial_recover_total)
                    }
                }
                outcome.recovered.push(request.model_id);
            } else {
                outcome.failed.push(request.model_id);
            }
        }
        outcome
    }

    /// Callbacks of one model run in registration order under its lock; a
    /// failing or panicking callback does not stop the others.
    async fn run_callbacks(&self, pending: PendingRecovery) -> (RecoveryRequest, bool) {
        let _guard = pending.lock.lock().await;
        let model_id = &pending.request.model_id;
        let mut ok = true;
        for (index, cb) in pending.callbacks.iter().enumerate() {
            let started = std::panic::catch_unwind(AssertUnwindSafe(|| cb(pending.request.clone())));
            let result = match started {
                Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
                Err(panic) => Err(panic),
            };
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    ok = false;
                    SharedMetrics::inc(&self.metrics.callback_errors_total);
                    warn!(model_id = %model_id, callback = index, error = %e, "redeploy callback failed");
                }
                Err(_) => {
                    ok = false;
                    SharedMetrics::inc(&self.metrics.callback_errors_total);
                    warn!(model_id = %model_id, callback = index, "redeploy callback panicked");
                }
            }
        }
        if ok {
            info!(model_id = %model_id, kind = ?pending.request.kind, "model recovered");
        }
        (pending.request, ok)
    }

    /// Stop the monitor and drop all tracking. Safe to call more than once.
    pub async fn finalize(&self) {
        {
            let mut st = self.state.lock().await;
            if st.finalized {
                return;
            }
            st.finalized = true;
            st.models.clear();
        }
        self.cancel.cancel();
        let handle = self.monitor.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error=%e, "abnormal status monitor ended abnormally");
            }
        }
        self.context.take().await;
        info!("abnormal status handler finalized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::config_source::{ChannelConfigChangeSource, ConfigChange};

    fn acc(node: i32, dev: i32) -> DeviceInfo {
        DeviceInfo::accelerator(0, node, dev, vec![dev], "Ascend")
    }

    fn make_model(id: &str, dynamic: bool) -> DeployedModel {
        DeployedModel::new(id)
            .with_instance("A", "A@0", [acc(1, 0)])
            .with_instance("A", "A@1", [acc(1, 1)])
            .with_instance("B", "B@0", [acc(2, 0)])
            .with_remote_node(1)
            .with_remote_node(2)
            .with_dynamic_sched(dynamic)
    }

    fn recording_callback(log: Arc<std::sync::Mutex<Vec<RecoveryRequest>>>) -> RedeployCallback {
        redeploy_callback(move |req| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(req);
                Ok(())
            }
        })
    }

    fn make_handler() -> AbnormalStatusHandler {
        AbnormalStatusHandler::new(Arc::new(DeployContext::new()), Arc::new(SharedMetrics::default()))
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_is_in_device_list() {
        let devices: BTreeSet<DeviceInfo> = [acc(1, 0)].into_iter().collect();
        assert!(!is_in_device_list(&devices, &[]));
        assert!(!is_in_device_list(&BTreeSet::new(), &[acc(1, 0)]));
        assert!(!is_in_device_list(&devices, &[acc(1, 1)]));
        assert!(is_in_device_list(&devices, &[acc(1, 1), acc(1, 0).with_proxy_device(3)]));
    }

    #[test]
    fn test_dynamic_sched_recover_rules() {
        let model = make_model("m", true);
        assert!(is_support_dynamic_sched_recover(&model, &set(&["A@0"]), &set(&[])));
        // an abnormal instance on another device does not block
        assert!(is_support_dynamic_sched_recover(&model, &set(&["A@0"]), &set(&["B@0"])));
        assert!(!is_support_dynamic_sched_recover(&make_model("m", false), &set(&["A@0"]), &set(&[])));
        assert!(!is_support_dynamic_sched_recover(&model, &set(&["A@0", "A@1", "B@0"]), &set(&[])));
        assert!(!is_support_dynamic_sched_recover(&model, &set(&["nope"]), &set(&[])));
        assert!(!is_support_dynamic_sched_recover(&model, &set(&[]), &set(&[])));
    }

    #[test]
    fn test_shared_device_blocks_partial_recover() {
        let model = DeployedModel::new("m")
            .with_instance("A", "A@0", [acc(1, 0)])
            .with_instance("A", "A@1", [acc(1, 0)])
            .with_instance("A", "A@2", [acc(1, 1)])
            .with_dynamic_sched(true);
        assert!(!is_support_dynamic_sched_recover(&model, &set(&["A@1"]), &set(&["A@0"])));
        assert!(is_support_dynamic_sched_recover(&model, &set(&["A@2"]), &set(&[])));
    }

    #[tokio::test]
    async fn test_partial_recover_for_dynamic_model() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let handler = make_handler()
            .with_deployed_model(make_model("m", true))
            .with_callback("m", recording_callback(log.clone()));
        handler.deploy_context().push_abnormal_instance("m", "A@0").await;
        handler.deploy_context().push_abnormal_instance("ghost", "X").await;

        handler.run_once(None).await;

        let calls = log.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].kind, RecoveryKind::ClearExceptionData);
        assert_eq!(calls[0].abnormal_instances, vec!["A@0".to_string()]);
        assert_eq!(handler.model_health("m").await, Some(ModelHealth::Healthy));
        assert_eq!(handler.metrics.partial_recover_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_node_loss_forces_redeploy() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let handler = make_handler()
            .with_deployed_model(make_model("m", true))
            .with_deployed_model(DeployedModel::new("other").with_instance("C", "C", [acc(5, 0)]))
            .with_callback("m", recording_callback(log.clone()));
        handler.deploy_context().push_abnormal_node(2).await;

        handler.run_once(None).await;

        let calls = log.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].kind, RecoveryKind::Redeploy);
        assert_eq!(calls[0].abnormal_nodes, vec![2]);
        assert_eq!(handler.model_health("other").await, Some(ModelHealth::Healthy));
    }

    #[tokio::test]
    async fn test_callback_errors_are_isolated() {
        let ran = Arc::new(AtomicUsize::new(0));
        let failing = redeploy_callback(|_| async { Err(anyhow::anyhow!("node gone")) });
        let panicking = redeploy_callback(|req: RecoveryRequest| async move {
            assert!(req.model_id.is_empty(), "bug in callback");
            Ok(())
        });
        let counting = {
            let ran = ran.clone();
            redeploy_callback(move |_| {
                let ran = ran.clone();
                async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };
        let handler = make_handler()
            .with_deployed_model(make_model("m", false))
            .with_callback("m", failing)
            .with_callback("m", panicking)
            .with_callback("m", counting);

        let info = AbnormalInfo {
            devices: [acc(1, 0)].into_iter().collect(),
            ..Default::default()
        };
        let outcome = handler.handle_abnormal(info, false).await;

        assert!(!outcome.ok());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(handler.metrics.callback_errors_total.load(Ordering::Relaxed), 2);
        assert_eq!(handler.model_health("m").await, Some(ModelHealth::PermanentlyFailed));
    }

    #[tokio::test]
    async fn test_config_change_redeploys_every_model() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let handler = make_handler()
            .with_deployed_model(make_model("m1", true))
            .with_deployed_model(make_model("m2", false))
            .with_callback("m1", recording_callback(log.clone()))
            .with_callback("m2", recording_callback(log.clone()));
        let (mut source, mut trigger) = ChannelConfigChangeSource::new(1);
        trigger
            .trigger(ConfigChange {
                abnormal_devices: vec![acc(9, 0)],
            })
            .await
            .unwrap();

        handler.run_once(Some(&mut source)).await;

        assert_eq!(trigger.next_outcome().await, Some((true, "2 recovered, 0 failed".to_string())));
        let calls = log.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.kind == RecoveryKind::Redeploy));
    }

    #[tokio::test]
    async fn test_finalize_is_idempotent_and_rejects_registration() {
        let handler = Arc::new(make_handler().with_interval(Duration::from_millis(5)));
        assert_eq!(handler.interval(), Duration::from_millis(100));
        handler.start(None).await;
        handler.register_model(make_model("m", false)).await.unwrap();
        assert!(handler.register_model(make_model("m", false)).await.is_err());

        handler.finalize().await;
        handler.finalize().await;

        assert_eq!(handler.deployed_model_count().await, 0);
        let err = handler.register_model(make_model("n", false)).await.unwrap_err();
        assert_eq!(err.status(), flowdeploy_common::StatusCode::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_loop_picks_up_heartbeat_state() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let handler = Arc::new(
            make_handler()
                .with_deployed_model(make_model("m", false))
                .with_callback("m", recording_callback(log.clone())),
        );
        handler.start(None).await;
        handler.deploy_context().push_abnormal_instance("m", "B@0").await;

        tokio::time::sleep(Duration::from_millis(1_200)).await;

        assert_eq!(log.lock().unwrap().len(), 1);
        handler.finalize().await;
    }
}
