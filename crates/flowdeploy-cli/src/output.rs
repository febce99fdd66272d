use std::collections::BTreeMap;

use serde_json::Value;

use flowdeploy_common::FlowRoutePlan;
use flowdeploy_planner::print_flow_route_plan;

pub fn print_models(models: &[Value]) {
    println!("\n=== Deployed Models ===\n");
    if models.is_empty() {
        println!("No models deployed.");
        return;
    }
    println!(
        "{:<38} {:<20} {:<12} {:<20} {:<10} {:<10}",
        "Model ID", "Name", "State", "Health", "Instances", "Redeploys"
    );
    println!("{:-<115}", "");
    for m in models {
        println!(
            "{:<38} {:<20} {:<12} {:<20} {:<10} {:<10}",
            m["model_id"].as_str().unwrap_or(""),
            m["model_name"].as_str().unwrap_or(""),
            m["lifecycle"].as_str().unwrap_or("unknown"),
            m["health"].as_str().unwrap_or("untracked"),
            m["instances"].as_u64().unwrap_or(0),
            m["redeploy_count"].as_u64().unwrap_or(0),
        );
    }
    println!();
}

pub fn print_deploy_result(result: &Value) {
    println!("  Model ID: {}", result["model_id"].as_str().unwrap_or(""));
    println!("  Nodes:    {}", join_numbers(&result["nodes"]));
    println!("  Inputs:   {}", join_numbers(&result["input_queue_indices"]));
    println!("  Outputs:  {}", join_numbers(&result["output_queue_indices"]));
}

pub fn print_route_plans(plans: &BTreeMap<i32, FlowRoutePlan>, only_node: Option<i32>) {
    let mut printed = 0;
    for (node_id, plan) in plans {
        if only_node.is_some_and(|n| n != *node_id) {
            continue;
        }
        print!("{}", print_flow_route_plan(plan));
        println!();
        printed += 1;
    }
    if printed == 0 {
        println!("(no route plan for the selected node)");
    }
}

fn join_numbers(v: &Value) -> String {
    v.as_array()
        .map(|a| {
            a.iter()
                .filter_map(|x| x.as_i64())
                .map(|x| x.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}
