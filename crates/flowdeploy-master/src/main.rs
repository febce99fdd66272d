mod args;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use flowdeploy_master::api::{self, AppState};
use flowdeploy_master::config_source::{ConfigChangeSource, FileConfigChangeSource};
use flowdeploy_master::heartbeat::NodeWatcher;
use flowdeploy_master::{
    AbnormalStatusHandler, ClusterContext, DeployContext, DeploymentOrchestrator, PlanOptions,
    ResourceManager,
};
use flowdeploy_meta::{EtcdMetaStore, MemoryMetaStore, MetaStore};

use crate::args::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let otel = flowdeploy_common::telemetry::init_tracing(
        "flowdeploy-master",
        args.otlp_endpoint.as_deref(),
        args.otlp_token.as_deref(),
    );

    let resources = ResourceManager::load(&args.resource_config_path, args.local_node_id)
        .with_context(|| format!("load resource config from {}", args.resource_config_path.display()))?;
    tracing::info!(
        listen = %args.listen_addr,
        local_node = resources.local_node_id(),
        devices = resources.devices().len(),
        "flowdeploy-master starting"
    );

    let store: Arc<dyn MetaStore> = match &args.etcd_endpoint {
        Some(ep) => Arc::new(EtcdMetaStore::connect(std::slice::from_ref(ep)).await?),
        None => {
            tracing::warn!("no etcd endpoint configured, only in-process heartbeats are seen");
            let mem = Arc::new(MemoryMetaStore::new());
            mem.spawn_expiry_sweeper(Duration::from_millis(500));
            mem
        }
    };

    let ctx = Arc::new(
        ClusterContext::new(resources, store.clone())
            .with_config_dir(&args.resource_config_path, args.local_node_id)
            .with_options(PlanOptions {
                keep_out_of_order: args.keep_out_of_order,
                max_flatten_depth: args.max_flatten_depth,
            }),
    );
    let deploy_ctx = Arc::new(DeployContext::new());
    let handler = Arc::new(
        AbnormalStatusHandler::new(deploy_ctx.clone(), ctx.metrics().clone())
            .with_interval(Duration::from_millis(args.monitor_interval_ms)),
    );
    let orchestrator = DeploymentOrchestrator::new(ctx.clone(), handler.clone());

    let source: Box<dyn ConfigChangeSource> =
        Box::new(FileConfigChangeSource::new(&args.resource_config_path, ctx.clone()));
    handler.start(Some(source)).await;

    let cancel = CancellationToken::new();
    let watcher = Arc::new(NodeWatcher::new(ctx.clone(), deploy_ctx, args.node_stale_ms));
    let watch_task = tokio::spawn(watcher.run(store, cancel.clone()));

    let listener = tokio::net::TcpListener::bind(&args.listen_addr).await?;
    let shutdown = cancel.clone();
    axum::serve(listener, api::router(AppState::new(orchestrator)))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    let _ = watch_task.await;
    handler.finalize().await;
    flowdeploy_common::telemetry::shutdown_tracing(otel);
    Ok(())
}
