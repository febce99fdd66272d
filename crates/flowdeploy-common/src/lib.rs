pub mod deployed;
pub mod device;
pub mod error;
pub mod message;
pub mod plan;
pub mod relation;
pub mod route;

pub use deployed::{DeployedModel, DeployedModelRecord, ModelDeployInfos, ModelHealth};
pub use device::{parse_logical_device_ids, DeviceInfo, DeviceType, LogicalDeviceId, HOST_DEVICE_ID};
pub use error::{DeployError, ErrorBody, ErrorDetail, Result, StatusCode};
pub use message::{
    AbnormalInstance, AbnormalReport, DeployRequest, DeployResponse, ExceptionKind,
    ExceptionNotification, NodeStatus, ProfilingRequest, SubmodelDeployDesc, UndeployRequest,
};
pub use plan::{
    Binding, DeployPlan, DynamicSchedPlan, EndpointRef, GroupEntryInfo, QueueInfo,
    SubmodelPlacement,
};
pub use relation::{
    EnqueuePolicy, Endpoint, EndpointKind, FlowModel, ModelRelation, RootEndpointInfo,
    SubmodelEndpointInfo, SubmodelSpec,
};
pub use route::{EndpointDesc, EndpointDescKind, FlowRoutePlan, RouteBinding};

pub mod telemetry;

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
