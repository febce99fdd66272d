mod args;
mod client;
mod output;
mod plan;

use std::collections::BTreeMap;

use anyhow::Result;
use clap::Parser;
use reqwest::Client;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use flowdeploy_common::{ExceptionKind, ExceptionNotification, FlowRoutePlan};
use flowdeploy_master::PlanOptions;

use crate::args::{Args, Command, ModelCommand, NotifyKind};
use crate::client::{error_text, url};
use crate::output::{print_deploy_result, print_models, print_route_plans};
use crate::plan::{load_model, plan_offline};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let client = Client::new();
    let base = args.master_url;

    match args.command {
        Command::Plan {
            model,
            resources,
            node,
            max_flatten_depth,
            keep_out_of_order,
        } => {
            let flow = load_model(&model)?;
            let opts = PlanOptions {
                keep_out_of_order,
                max_flatten_depth,
            };
            match plan_offline(&flow, &resources, opts) {
                Ok(state) => {
                    println!(
                        "✓ Planned '{}': {} instances on {} nodes\n",
                        flow.name,
                        state.plan.submodels.len(),
                        state.route_plans.len()
                    );
                    print_route_plans(&state.route_plans, node);
                }
                Err(e) => eprintln!("✗ Planning failed: {e:#}"),
            }
        }
        Command::Model { subcommand } => match subcommand {
            ModelCommand::List => {
                let resp = client.get(url(&base, "/v1/models")).send().await?;
                if resp.status().is_success() {
                    let models: Vec<serde_json::Value> = resp.json().await?;
                    print_models(&models);
                } else {
                    eprintln!("✗ Failed to list models: {}", error_text(resp).await);
                }
            }
            ModelCommand::Deploy { model } => {
                let flow = load_model(&model)?;
                let resp = client.post(url(&base, "/v1/models")).json(&flow).send().await?;
                if resp.status().is_success() {
                    let result: serde_json::Value = resp.json().await?;
                    println!("✓ Model '{}' deployed", flow.name);
                    print_deploy_result(&result);
                } else {
                    eprintln!("✗ Failed to deploy model: {}", error_text(resp).await);
                }
            }
            ModelCommand::Undeploy { model_id } => {
                let resp = client
                    .delete(url(&base, &format!("/v1/models/{model_id}")))
                    .send()
                    .await?;
                if resp.status().is_success() {
                    println!("✓ Model '{model_id}' undeployed");
                } else {
                    eprintln!("✗ Failed to undeploy model: {}", error_text(resp).await);
                }
            }
            ModelCommand::Routes { model_id } => {
                let resp = client
                    .get(url(&base, &format!("/v1/models/{model_id}/routes")))
                    .send()
                    .await?;
                if resp.status().is_success() {
                    let plans: BTreeMap<i32, FlowRoutePlan> = resp.json().await?;
                    print_route_plans(&plans, None);
                } else {
                    eprintln!("✗ Failed to fetch route plans: {}", error_text(resp).await);
                }
            }
        },
        Command::Notify {
            model_id,
            kind,
            trans_id,
            instance,
            message,
        } => {
            let body = ExceptionNotification {
                model_id: model_id.clone(),
                kind: match kind {
                    NotifyKind::Raise => ExceptionKind::Raise,
                    NotifyKind::Clear => ExceptionKind::ClearExceptionData,
                },
                trans_id,
                instance_names: instance,
                message,
            };
            let resp = client
                .post(url(&base, &format!("/v1/models/{model_id}/exception")))
                .json(&body)
                .send()
                .await?;
            if resp.status().is_success() {
                println!("✓ Exception forwarded to model '{model_id}'");
            } else {
                eprintln!("✗ Failed to notify model: {}", error_text(resp).await);
            }
        }
        Command::Mesh { node_id } => {
            let resp = client
                .get(url(&base, &format!("/v1/nodes/{node_id}/mesh")))
                .send()
                .await?;
            if resp.status().is_success() {
                let body: serde_json::Value = resp.json().await?;
                println!("node {node_id}: mesh index {}", body["mesh_index"]);
            } else {
                eprintln!("✗ Failed to get mesh index: {}", error_text(resp).await);
            }
        }
        Command::Profiling { enable } => {
            let resp = client
                .post(url(&base, "/v1/profiling"))
                .json(&json!({ "enable": enable }))
                .send()
                .await?;
            if resp.status().is_success() {
                println!("✓ Profiling {}", if enable { "enabled" } else { "disabled" });
            } else {
                eprintln!("✗ Failed to update profiling: {}", error_text(resp).await);
            }
        }
        Command::Metrics => {
            let resp = client.get(url(&base, "/metrics")).send().await?;
            if resp.status().is_success() {
                print!("{}", resp.text().await?);
            } else {
                eprintln!("✗ Failed to fetch metrics: {}", error_text(resp).await);
            }
        }
    }

    Ok(())
}
