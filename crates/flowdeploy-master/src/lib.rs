//! Master side of flowdeploy: device inventory, the deployment orchestrator,
//! the fault monitor and the HTTP API in front of them.

pub mod abnormal;
pub mod api;
pub mod config_source;
pub mod context;
pub mod deployer;
pub mod heartbeat;
pub mod metrics;
pub mod orchestrator;
pub mod resource;

pub use abnormal::{AbnormalStatusHandler, DeployContext};
pub use context::{ClusterContext, PlanOptions};
pub use orchestrator::{
    plan_model, AbnormalProbe, DeployResult, DeploymentOrchestrator, LifecycleState, ModelSummary,
};
pub use resource::ResourceManager;
