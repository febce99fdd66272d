mod args;

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use flowdeploy_meta::{EtcdMetaStore, MemoryMetaStore, MetaStore};
use flowdeploy_node::{api, heartbeat::heartbeat_loop, NodeRuntime};

use crate::args::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let otel = flowdeploy_common::telemetry::init_tracing(
        "flowdeploy-node",
        args.otlp_endpoint.as_deref(),
        args.otlp_token.as_deref(),
    );
    tracing::info!(node_id = args.node_id, listen = %args.listen_addr, "flowdeploy-node starting");

    let store: Arc<dyn MetaStore> = match &args.etcd_endpoint {
        Some(ep) => Arc::new(EtcdMetaStore::connect(std::slice::from_ref(ep)).await?),
        None => {
            tracing::warn!("no etcd endpoint configured, heartbeats stay in process memory");
            Arc::new(MemoryMetaStore::new())
        }
    };

    let runtime = NodeRuntime::new(args.node_id);
    let cancel = CancellationToken::new();
    let address = args
        .advertise_addr
        .clone()
        .or_else(|| Some(format!("http://{}", args.listen_addr)));

    let hb = tokio::spawn(heartbeat_loop(
        store,
        runtime.clone(),
        address,
        args.heartbeat_ttl_ms,
        args.heartbeat_interval_ms,
        cancel.clone(),
    ));

    let listener = tokio::net::TcpListener::bind(&args.listen_addr).await?;
    let shutdown = cancel.clone();
    axum::serve(listener, api::router(runtime))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    let _ = hb.await;
    flowdeploy_common::telemetry::shutdown_tracing(otel);
    Ok(())
}
