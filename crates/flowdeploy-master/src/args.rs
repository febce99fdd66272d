use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
pub struct Args {
    #[arg(long, default_value = "0.0.0.0:9000")]
    pub listen_addr: String,

    /// Without an etcd endpoint the master only sees in-process heartbeats.
    #[arg(long)]
    pub etcd_endpoint: Option<String>,

    /// Directory holding `resource.json` and the redeploy sentinel files.
    #[arg(long, env = "RESOURCE_CONFIG_PATH", default_value = ".")]
    pub resource_config_path: PathBuf,

    /// Overrides the `is_local` flags of the resource config.
    #[arg(long)]
    pub local_node_id: Option<i32>,

    #[arg(long, default_value_t = 500)]
    pub monitor_interval_ms: u64,

    /// Heartbeats older than this mark the node lost.
    #[arg(long, default_value_t = 10_000)]
    pub node_stale_ms: u64,

    #[arg(long)]
    pub max_flatten_depth: Option<usize>,

    #[arg(long, default_value_t = false)]
    pub keep_out_of_order: bool,

    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    #[arg(long, env = "OTLP_TOKEN")]
    pub otlp_token: Option<String>,
}
