pub mod dataflow;
pub mod executor;
pub mod graph;
pub mod orchestrator;
pub mod workflows;

pub use executor::NodeExecutor;
pub use graph::{validate_definition, ValidationReport, WorkflowGraph};
pub use orchestrator::Orchestrator;
pub use workflows::{WorkflowService, WorkflowUpdate};
