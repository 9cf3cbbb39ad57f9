use serde_json::Value;
use thiserror::Error;

/// Failures raised by the External API Gateway Adapter.
///
/// Transient conditions (429, 5xx, timeouts, connect errors) only surface
/// here after the retry budget is exhausted.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    #[error("Server error: {status} after {attempts} attempts")]
    ServerError { status: u16, attempts: u32 },

    #[error("Client error: {status}: {body}")]
    ClientError { status: u16, body: Value },

    #[error("Request timed out after {attempts} attempts: {message}")]
    Timeout { attempts: u32, message: String },

    #[error("Polling timed out after {waited_ms}ms (last status: {last_status})")]
    PollingTimeout { waited_ms: u64, last_status: String },

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// HTTP status carried by the error, if the provider answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::RateLimitExceeded { .. } => Some(429),
            ApiError::ServerError { status, .. } | ApiError::ClientError { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum FiboError {
    // Graph errors
    #[error("Workflow must contain at least one node")]
    EmptyGraph,

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Edge {edge_id} references unknown node {node_id}")]
    DanglingEdge { edge_id: String, node_id: String },

    #[error("Workflow contains a cycle involving nodes: {}", nodes.join(", "))]
    CyclicGraph { nodes: Vec<String> },

    // Validation errors
    #[error("Invalid input for node {node_id}: {message}")]
    Validation { node_id: String, message: String },

    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    // External API errors
    #[error(transparent)]
    Api(#[from] ApiError),

    // Node errors
    #[error("Node {node_id} failed: {message}")]
    NodeExecution {
        node_id: String,
        message: String,
        #[source]
        source: Box<FiboError>,
    },

    #[error("Node {node_id} failed: {message}")]
    NodeStep { node_id: String, message: String },

    // Run errors
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run {run_id} is not in an executable state ({status})")]
    NotExecutable { run_id: String, status: String },

    #[error("Invalid run transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Run {0} was modified concurrently")]
    Conflict(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FiboError {
    /// Structural graph problems detected before any node runs.
    pub fn is_graph_error(&self) -> bool {
        matches!(
            self,
            FiboError::EmptyGraph
                | FiboError::DuplicateNode(_)
                | FiboError::DanglingEdge { .. }
                | FiboError::CyclicGraph { .. }
        )
    }

    /// Wrap a lower-level failure with the id of the node it happened in.
    pub fn in_node(self, node_id: impl Into<String>) -> FiboError {
        let node_id = node_id.into();
        match self {
            already @ FiboError::NodeExecution { .. } => already,
            cause => FiboError::NodeExecution {
                message: node_message(&cause),
                node_id,
                source: Box::new(cause),
            },
        }
    }
}

fn node_message(cause: &FiboError) -> String {
    match cause {
        FiboError::Validation { message, .. } | FiboError::NodeStep { message, .. } => {
            message.clone()
        }
        other => other.to_string(),
    }
}

pub type Result<T> = std::result::Result<T, FiboError>;
