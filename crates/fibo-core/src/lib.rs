pub mod api;
pub mod catalog;
pub mod config;
pub mod error;
pub mod event;
pub mod run;
pub mod traits;
pub mod workflow;

pub use catalog::{Behavior, Family, Flavor, NodeKind, NodeSpec, CATALOG_VERSION};
pub use config::AppConfig;
pub use error::{ApiError, FiboError, Result};
pub use event::{EventBus, RunEvent};
pub use run::{
    ExecutionSnapshot, NodeExecutionRecord, NodeStatus, PendingApproval, RunStatus, WorkflowRun,
};
pub use workflow::{Workflow, WorkflowDefinition, WorkflowEdge, WorkflowNode};
