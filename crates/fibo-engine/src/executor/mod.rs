//! Node execution.
//!
//! [`NodeExecutor`] resolves a node's inputs, dispatches to the handler for
//! its behavior class, and records the outcome in the run snapshot. Failures
//! are written to the node's record and returned wrapped with the node id.

mod handlers;
mod inputs;

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use fibo_core::error::{FiboError, Result};
use fibo_core::run::{ExecutionSnapshot, NodeExecutionRecord, NodeStatus};
use fibo_core::traits::ImageApi;
use fibo_core::workflow::WorkflowNode;

use crate::dataflow::resolve_inputs;
use crate::graph::WorkflowGraph;

pub use handlers::{handler_for, NodeContext, NodeHandler};

pub struct NodeExecutor {
    api: Arc<dyn ImageApi>,
}

impl NodeExecutor {
    pub fn new(api: Arc<dyn ImageApi>) -> Self {
        Self { api }
    }

    /// Run `node` against the current snapshot and merge its record back.
    ///
    /// A gated node re-entered after approval completes from the approved
    /// prompt without calling the API.
    pub async fn execute(
        &self,
        snapshot: &mut ExecutionSnapshot,
        node: &WorkflowNode,
        graph: &WorkflowGraph,
    ) -> Result<Value> {
        let inputs = resolve_inputs(snapshot, node, graph);

        let mut record = match snapshot.nodes.remove(&node.id) {
            Some(existing)
                if existing.status == NodeStatus::WaitingApproval
                    && existing.approved_prompt.is_some() =>
            {
                existing
            }
            _ => NodeExecutionRecord::started(node.kind),
        };
        let resuming = record.approved_prompt.is_some();

        debug!(node_id = %node.id, node_type = %node.kind, resuming, "Executing node");

        let outcome = handler_for(node.kind)
            .execute(NodeContext {
                node_id: &node.id,
                kind: node.kind,
                inputs: &inputs,
                record: &mut record,
                api: self.api.as_ref(),
            })
            .await;

        let result = match outcome {
            Ok(response) => {
                if resuming || record.status == NodeStatus::Running {
                    record.complete(response.clone());
                } else {
                    record.response = Some(response.clone());
                    record.end_time = Some(chrono::Utc::now());
                }
                Ok(response)
            }
            Err(e) => {
                let err = e.in_node(node.id.clone());
                let message = match &err {
                    FiboError::NodeExecution { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                warn!(node_id = %node.id, node_type = %node.kind, error = %message, "Node failed");
                record.fail(message);
                Err(err)
            }
        };

        snapshot.upsert_node(node.id.clone(), record);
        result
    }
}
