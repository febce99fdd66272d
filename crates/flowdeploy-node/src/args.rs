use clap::Parser;

#[derive(Debug, Parser)]
pub struct Args {
    /// Physical node id this agent serves.
    #[arg(long, default_value_t = 0)]
    pub node_id: i32,

    #[arg(long, default_value = "0.0.0.0:9100")]
    pub listen_addr: String,

    /// Address the master uses to reach this agent, published in heartbeats.
    #[arg(long)]
    pub advertise_addr: Option<String>,

    /// Without an etcd endpoint the agent keeps heartbeats in memory.
    #[arg(long)]
    pub etcd_endpoint: Option<String>,

    #[arg(long, default_value_t = 10_000)]
    pub heartbeat_ttl_ms: u64,

    #[arg(long, default_value_t = 3_000)]
    pub heartbeat_interval_ms: u64,

    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    #[arg(long, env = "OTLP_TOKEN")]
    pub otlp_token: Option<String>,
}
