use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::catalog::{NodeKind, CATALOG_VERSION};
use crate::error::{FiboError, Result};
use crate::workflow::WorkflowDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    WaitingApproval,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::WaitingApproval => "WAITING_APPROVAL",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(RunStatus::Pending),
            "RUNNING" => Some(RunStatus::Running),
            "WAITING_APPROVAL" => Some(RunStatus::WaitingApproval),
            "COMPLETED" => Some(RunStatus::Completed),
            "FAILED" => Some(RunStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// States `execute_run` may start from.
    pub fn is_executable(self) -> bool {
        matches!(self, RunStatus::Pending | RunStatus::WaitingApproval)
    }

    /// The run lifecycle transition table.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (WaitingApproval, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, WaitingApproval)
                | (WaitingApproval, Pending)
                | (WaitingApproval, Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Running,
    Completed,
    Failed,
    WaitingApproval,
    Rejected,
}

/// Execution state of one node inside a run snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecutionRecord {
    pub node_type: NodeKind,
    pub status: NodeStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Exact outbound payload, for replay and audit.
    #[serde(default)]
    pub request: Option<Value>,
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,

    // Approval-gated kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_prompt: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_prompt: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,

    // Two-step kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step1_request: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step1_response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step2_request: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step2_response: Option<Value>,
}

impl NodeExecutionRecord {
    /// A fresh record for a node that is about to run.
    pub fn started(node_type: NodeKind) -> Self {
        Self {
            node_type,
            status: NodeStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            request: None,
            response: None,
            error: None,
            generated_prompt: None,
            request_id: None,
            approved_prompt: None,
            approval_time: None,
            rejection_time: None,
            rejection_reason: None,
            step1_request: None,
            step1_response: None,
            step2_request: None,
            step2_response: None,
        }
    }

    /// Waiting for a human decision that has not been recorded yet.
    pub fn awaiting_approval(&self) -> bool {
        self.status == NodeStatus::WaitingApproval && self.approved_prompt.is_none()
    }

    pub fn complete(&mut self, response: Value) {
        self.status = NodeStatus::Completed;
        self.end_time = Some(Utc::now());
        self.response = Some(response);
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = NodeStatus::Failed;
        self.end_time = Some(Utc::now());
        self.error = Some(message.into());
    }
}

/// The durable, versioned record of a run's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    #[serde(default = "default_catalog_version")]
    pub catalog_version: u32,
    pub workflow_definition: WorkflowDefinition,
    #[serde(default)]
    pub input_parameters: Map<String, Value>,
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeExecutionRecord>,
    #[serde(default)]
    pub execution_order: Vec<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_catalog_version() -> u32 { CATALOG_VERSION }

impl ExecutionSnapshot {
    pub fn new(definition: WorkflowDefinition, input_parameters: Map<String, Value>) -> Self {
        Self {
            catalog_version: CATALOG_VERSION,
            workflow_definition: definition,
            input_parameters,
            nodes: BTreeMap::new(),
            execution_order: Vec::new(),
            start_time: None,
            end_time: None,
            error: None,
        }
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeExecutionRecord> {
        self.nodes.get(node_id)
    }

    pub fn node_mut(&mut self, node_id: &str) -> Option<&mut NodeExecutionRecord> {
        self.nodes.get_mut(node_id)
    }

    /// Merge a node's record into the snapshot, replacing any previous one.
    pub fn upsert_node(&mut self, node_id: impl Into<String>, record: NodeExecutionRecord) {
        self.nodes.insert(node_id.into(), record);
    }

    /// The recorded response of a node, if it produced one.
    pub fn response_of(&self, node_id: &str) -> Option<&Map<String, Value>> {
        self.nodes
            .get(node_id)
            .and_then(|r| r.response.as_ref())
            .and_then(Value::as_object)
    }
}

/// One invocation of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: String,
    pub workflow_id: String,
    pub user_id: String,
    pub status: RunStatus,
    pub snapshot: ExecutionSnapshot,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped by every successful save.
    #[serde(default)]
    pub version: u64,
}

impl WorkflowRun {
    pub fn new(
        workflow_id: impl Into<String>,
        user_id: impl Into<String>,
        snapshot: ExecutionSnapshot,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            user_id: user_id.into(),
            status: RunStatus::Pending,
            snapshot,
            created_at: Utc::now(),
            completed_at: None,
            version: 0,
        }
    }

    /// Move to `next`, enforcing the lifecycle table. Terminal states stamp
    /// the completion time.
    pub fn transition(&mut self, next: RunStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(FiboError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        if next.is_terminal() {
            let now = Utc::now();
            self.completed_at = Some(now);
            self.snapshot.end_time = Some(now);
        }
        Ok(())
    }

    /// Record a run-level failure and move to FAILED.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.snapshot.error = Some(message.into());
        self.transition(RunStatus::Failed)
    }
}

/// A node parked at the approval gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub node_id: String,
    pub node_type: NodeKind,
    pub generated_prompt: Option<Value>,
    pub request_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run() -> WorkflowRun {
        WorkflowRun::new(
            "wf",
            "user",
            ExecutionSnapshot::new(WorkflowDefinition::default(), Map::new()),
        )
    }

    #[test]
    fn new_run_is_pending() {
        let run = run();
        assert_eq!(run.status, RunStatus::Pending);
        assert!(run.completed_at.is_none());
        assert_eq!(run.snapshot.catalog_version, CATALOG_VERSION);
    }

    #[test]
    fn transition_table() {
        use RunStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(WaitingApproval.can_transition_to(Pending));
        assert!(WaitingApproval.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(WaitingApproval));
        assert!(!Running.can_transition_to(Pending));
    }

    #[test]
    fn terminal_transition_stamps_completion() {
        let mut run = run();
        run.transition(RunStatus::Running).unwrap();
        assert!(run.completed_at.is_none());
        run.fail("boom").unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.completed_at.is_some());
        assert_eq!(run.snapshot.error.as_deref(), Some("boom"));
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let mut run = run();
        let err = run.transition(RunStatus::Completed).unwrap_err();
        assert!(matches!(err, FiboError::InvalidTransition { .. }));
        assert_eq!(run.status, RunStatus::Pending);
    }

    #[test]
    fn status_serializes_screaming_case() {
        assert_eq!(
            serde_json::to_value(RunStatus::WaitingApproval).unwrap(),
            json!("WAITING_APPROVAL")
        );
        assert_eq!(RunStatus::parse("WAITING_APPROVAL"), Some(RunStatus::WaitingApproval));
        assert_eq!(
            serde_json::to_value(NodeStatus::Rejected).unwrap(),
            json!("REJECTED")
        );
    }

    #[test]
    fn awaiting_approval_requires_no_decision() {
        let mut record = NodeExecutionRecord::started(NodeKind::StructuredPromptGenerateV2);
        record.status = NodeStatus::WaitingApproval;
        assert!(record.awaiting_approval());
        record.approved_prompt = Some(json!({"style": "noir"}));
        assert!(!record.awaiting_approval());
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut snap = ExecutionSnapshot::new(WorkflowDefinition::default(), Map::new());
        let mut record = NodeExecutionRecord::started(NodeKind::ImageRefineV2);
        record.step1_request = Some(json!({"images": ["x"]}));
        record.complete(json!({"refined_image_url": "y"}));
        snap.upsert_node("r", record);

        let value = serde_json::to_value(&snap).unwrap();
        assert!(value["nodes"]["r"].get("approved_prompt").is_none());
        let back: ExecutionSnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back, snap);
        assert_eq!(back.response_of("r").unwrap()["refined_image_url"], "y");
    }
}
