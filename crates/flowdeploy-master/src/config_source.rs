use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use flowdeploy_common::DeviceInfo;

use crate::context::ClusterContext;
use crate::resource::ResourceManager;

pub const REDEPLOY_FILE: &str = "redeploy";
pub const REDEPLOY_DONE_FILE: &str = "redeploy.done";
pub const REDEPLOY_ERROR_FILE: &str = "redeploy.error";

/// A reloaded device configuration, reduced to the devices it lost.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigChange {
    pub abnormal_devices: Vec<DeviceInfo>,
}

/// Trigger source for configuration-driven redeploys.
#[async_trait]
pub trait ConfigChangeSource: Send {
    /// Returns a change when a redeploy was requested since the last poll.
    async fn poll(&mut self) -> anyhow::Result<Option<ConfigChange>>;

    /// Reports the outcome of handling the last change.
    async fn complete(&mut self, ok: bool, summary: &str) -> anyhow::Result<()>;
}

/// Devices of `old` that are missing from `new` or whose attributes changed.
pub fn find_abnormal_device_on_server(old: &[DeviceInfo], new: &[DeviceInfo]) -> Vec<DeviceInfo> {
    old.iter().filter(|d| !new.contains(d)).cloned().collect()
}

/// Watches the resource-config directory for a `redeploy` sentinel.
pub struct FileConfigChangeSource {
    dir: PathBuf,
    ctx: Arc<ClusterContext>,
}

impl FileConfigChangeSource {
    pub fn new(dir: impl Into<PathBuf>, ctx: Arc<ClusterContext>) -> Self {
        Self {
            dir: dir.into(),
            ctx,
        }
    }

    async fn remove_if_exists(&self, name: &str) -> anyhow::Result<bool> {
        match tokio::fs::remove_file(self.dir.join(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_sentinel(&self, name: &str, summary: &str) -> anyhow::Result<()> {
        let content = format!("{} {summary}\n", Utc::now().to_rfc3339());
        tokio::fs::write(self.dir.join(name), content).await?;
        Ok(())
    }
}

#[async_trait]
impl ConfigChangeSource for FileConfigChangeSource {
    async fn poll(&mut self) -> anyhow::Result<Option<ConfigChange>> {
        self.remove_if_exists(REDEPLOY_DONE_FILE).await?;
        self.remove_if_exists(REDEPLOY_ERROR_FILE).await?;
        if !self.remove_if_exists(REDEPLOY_FILE).await? {
            return Ok(None);
        }

        let dir = self.dir.clone();
        let local = self.ctx.local_node_override();
        let loaded = tokio::task::spawn_blocking(move || ResourceManager::load(&dir, local)).await?;
        let new = match loaded {
            Ok(rm) => rm,
            Err(e) => {
                tracing::warn!(error=%e, dir=%self.dir.display(), "redeploy requested but resource config is unreadable");
                self.write_sentinel(REDEPLOY_ERROR_FILE, &format!("reload failed: {e:#}"))
                    .await?;
                return Ok(None);
            }
        };

        let old = self.ctx.resources().await;
        let abnormal_devices = find_abnormal_device_on_server(old.devices(), new.devices());
        tracing::info!(
            abnormal = abnormal_devices.len(),
            devices = new.devices().len(),
            "resource config reloaded"
        );
        self.ctx.replace_resources(new).await;
        Ok(Some(ConfigChange { abnormal_devices }))
    }

    async fn complete(&mut self, ok: bool, summary: &str) -> anyhow::Result<()> {
        let name = if ok { REDEPLOY_DONE_FILE } else { REDEPLOY_ERROR_FILE };
        self.write_sentinel(name, summary).await
    }
}

/// In-process trigger for tests and embedding.
pub struct ChannelConfigChangeSource {
    rx: mpsc::Receiver<ConfigChange>,
    outcomes: mpsc::UnboundedSender<(bool, String)>,
}

pub struct ConfigChangeHandle {
    tx: mpsc::Sender<ConfigChange>,
    outcomes: mpsc::UnboundedReceiver<(bool, String)>,
}

impl ChannelConfigChangeSource {
    pub fn new(capacity: usize) -> (Self, ConfigChangeHandle) {
        let (tx, rx) = mpsc::channel(capacity);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (
            Self {
                rx,
                outcomes: out_tx,
            },
            ConfigChangeHandle {
                tx,
                outcomes: out_rx,
            },
        )
    }
}

impl ConfigChangeHandle {
    pub async fn trigger(&self, change: ConfigChange) -> anyhow::Result<()> {
        self.tx
            .send(change)
            .await
            .map_err(|_| anyhow::anyhow!("config change source dropped"))
    }

    /// Waits for the handler to finish the next triggered change.
    pub async fn next_outcome(&mut self) -> Option<(bool, String)> {
        self.outcomes.recv().await
    }
}

#[async_trait]
impl ConfigChangeSource for ChannelConfigChangeSource {
    async fn poll(&mut self) -> anyhow::Result<Option<ConfigChange>> {
        match self.rx.try_recv() {
            Ok(change) => Ok(Some(change)),
            Err(mpsc::error::TryRecvError::Empty) | Err(mpsc::error::TryRecvError::Disconnected) => Ok(None),
        }
    }

    async fn complete(&mut self, ok: bool, summary: &str) -> anyhow::Result<()> {
        let _ = self.outcomes.send((ok, summary.to_string()));
        Ok(())
    }
}
