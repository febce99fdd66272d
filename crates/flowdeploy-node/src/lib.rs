pub mod api;
pub mod heartbeat;
pub mod runtime;

pub use runtime::NodeRuntime;
