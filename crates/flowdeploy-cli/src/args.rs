use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "flowdeploy")]
#[command(about = "Plan and deploy flow models on a heterogeneous cluster", long_about = None)]
pub struct Args {
    /// Master URL
    #[arg(long, env = "FLOWDEPLOY_MASTER_URL", default_value = "http://127.0.0.1:9000")]
    pub master_url: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Plan a model offline and print the per-node route plans
    Plan {
        /// Flow model JSON file
        model: PathBuf,
        /// Directory holding resource.json
        #[arg(long, default_value = ".")]
        resources: PathBuf,
        /// Only print the plan of this node
        #[arg(long)]
        node: Option<i32>,
        #[arg(long)]
        max_flatten_depth: Option<usize>,
        #[arg(long, default_value_t = false)]
        keep_out_of_order: bool,
    },
    /// Model management
    Model {
        #[command(subcommand)]
        subcommand: ModelCommand,
    },
    /// Forward an exception notification to a deployed model
    Notify {
        model_id: String,
        #[arg(long, value_enum, default_value_t = NotifyKind::Raise)]
        kind: NotifyKind,
        #[arg(long, default_value_t = 0)]
        trans_id: u64,
        /// Instances to notify (repeatable); all when omitted
        #[arg(long, value_delimiter = ',')]
        instance: Vec<String>,
        #[arg(long)]
        message: Option<String>,
    },
    /// Show the device mesh index of a node
    Mesh { node_id: i32 },
    /// Toggle profiling on the cluster nodes
    Profiling {
        #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
        enable: bool,
    },
    /// Fetch master metrics
    Metrics,
}

#[derive(Debug, Subcommand)]
pub enum ModelCommand {
    /// List deployed models
    List,
    /// Deploy a flow model from a JSON file
    Deploy { model: PathBuf },
    /// Undeploy a model by id
    Undeploy { model_id: String },
    /// Print the route plans of a deployed model
    Routes { model_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NotifyKind {
    Raise,
    Clear,
}
