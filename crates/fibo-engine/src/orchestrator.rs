use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use fibo_core::error::{FiboError, Result};
use fibo_core::event::{EventBus, RunEvent};
use fibo_core::run::{ExecutionSnapshot, NodeStatus, PendingApproval, RunStatus, WorkflowRun};
use fibo_core::traits::{ImageApi, RunStore, Store, WorkflowStore};

use crate::executor::NodeExecutor;
use crate::graph::WorkflowGraph;

/// How a pass over the execution order ended.
enum Outcome {
    Finished,
    Suspended(String),
}

/// Drives workflow runs through their lifecycle.
///
/// Every state change is persisted through [`RunStore::save_run`], so a run
/// can be resumed by calling [`Orchestrator::execute_run`] again after an
/// approval.
///
/// [`RunStore::save_run`]: fibo_core::traits::RunStore::save_run
pub struct Orchestrator {
    store: Arc<dyn Store>,
    executor: NodeExecutor,
    events: Arc<EventBus>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn Store>, api: Arc<dyn ImageApi>) -> Self {
        Self {
            store,
            executor: NodeExecutor::new(api),
            events: Arc::new(EventBus::default()),
        }
    }

    /// Publish progress on a shared bus instead of a private one.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Create a PENDING run of a workflow owned by `user_id`.
    pub async fn create_run(
        &self,
        workflow_id: &str,
        user_id: &str,
        input_parameters: Map<String, Value>,
    ) -> Result<WorkflowRun> {
        let workflow = self
            .store
            .get_workflow(workflow_id, user_id)
            .await?
            .ok_or_else(|| FiboError::WorkflowNotFound(workflow_id.to_string()))?;

        let snapshot = ExecutionSnapshot::new(workflow.definition, input_parameters);
        let run = WorkflowRun::new(&workflow.id, user_id, snapshot);
        self.store.insert_run(&run).await?;

        info!(run_id = %run.id, workflow_id = %workflow.id, "Run created");
        Ok(run)
    }

    /// Drive a PENDING or WAITING_APPROVAL run as far as it can go.
    ///
    /// Node and graph failures end the run as FAILED and still return `Ok`;
    /// `Err` means the run could not be driven at all.
    pub async fn execute_run(&self, run_id: &str) -> Result<WorkflowRun> {
        let mut run = self.load(run_id).await?;
        if !run.status.is_executable() {
            return Err(FiboError::NotExecutable {
                run_id: run.id.clone(),
                status: run.status.to_string(),
            });
        }

        run.transition(RunStatus::Running)?;
        if run.snapshot.start_time.is_none() {
            run.snapshot.start_time = Some(Utc::now());
        }
        self.persist(&mut run).await?;
        info!(run_id = %run.id, "Run started");

        match self.drive(&mut run).await {
            Ok(Outcome::Finished) => {
                run.transition(RunStatus::Completed)?;
                self.persist(&mut run).await?;
                info!(run_id = %run.id, "Run completed");
            }
            Ok(Outcome::Suspended(node_id)) => {
                run.transition(RunStatus::WaitingApproval)?;
                self.persist(&mut run).await?;
                info!(run_id = %run.id, node_id = %node_id, "Run suspended for approval");
                self.events.publish(RunEvent::RunSuspended {
                    run_id: run.id.clone(),
                    node_id,
                });
                return Ok(run);
            }
            Err(e @ FiboError::Conflict(_)) => return Err(e),
            Err(e @ FiboError::Database(_)) => {
                self.record_storage_failure(&mut run, &e).await;
                return Err(e);
            }
            Err(e) => {
                warn!(run_id = %run.id, error = %e, "Run failed");
                run.fail(e.to_string())?;
                self.persist(&mut run).await?;
            }
        }

        self.events.publish(RunEvent::RunFinished {
            run_id: run.id.clone(),
            status: run.status,
            error: run.snapshot.error.clone(),
        });
        Ok(run)
    }

    async fn drive(&self, run: &mut WorkflowRun) -> Result<Outcome> {
        let graph = WorkflowGraph::from_definition(&run.snapshot.workflow_definition)?;
        let order = graph.execution_order()?;
        run.snapshot.execution_order = order.clone();
        self.events.publish(RunEvent::RunStarted {
            run_id: run.id.clone(),
            execution_order: order.clone(),
        });

        for node_id in &order {
            let Some(node) = graph.node(node_id) else {
                continue;
            };

            if let Some(record) = run.snapshot.node(node_id) {
                if record.status == NodeStatus::Completed {
                    debug!(run_id = %run.id, node_id = %node_id, "Node already completed, skipping");
                    self.events.publish(RunEvent::NodeSkipped {
                        run_id: run.id.clone(),
                        node_id: node_id.clone(),
                    });
                    continue;
                }
                if node.kind.is_approval_gated() && record.awaiting_approval() {
                    return Ok(Outcome::Suspended(node_id.clone()));
                }
            }

            self.events.publish(RunEvent::NodeStarted {
                run_id: run.id.clone(),
                node_id: node_id.clone(),
                node_type: node.kind,
            });
            let started = Instant::now();
            let result = self.executor.execute(&mut run.snapshot, node, &graph).await;
            self.persist(run).await?;

            if let Err(e) = result {
                self.events.publish(RunEvent::NodeFailed {
                    run_id: run.id.clone(),
                    node_id: node_id.clone(),
                    error: e.to_string(),
                });
                return Err(e);
            }
            self.events.publish(RunEvent::NodeCompleted {
                run_id: run.id.clone(),
                node_id: node_id.clone(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            });

            if node.kind.is_approval_gated()
                && run.snapshot.node(node_id).is_some_and(|r| r.awaiting_approval())
            {
                return Ok(Outcome::Suspended(node_id.clone()));
            }
        }

        Ok(Outcome::Finished)
    }

    /// Record an approved payload for a parked node and make the run
    /// resumable. Returns false, changing nothing, when the run is not
    /// waiting on that node or the payload is not a JSON object.
    pub async fn approve(&self, run_id: &str, node_id: &str, payload: Value) -> Result<bool> {
        let mut run = self.load(run_id).await?;
        if run.status != RunStatus::WaitingApproval || !payload.is_object() {
            debug!(run_id, node_id, status = %run.status, "Approval refused");
            return Ok(false);
        }
        let Some(record) = run.snapshot.node_mut(node_id) else {
            return Ok(false);
        };
        if record.status != NodeStatus::WaitingApproval {
            return Ok(false);
        }

        record.approved_prompt = Some(payload);
        record.approval_time = Some(Utc::now());
        run.transition(RunStatus::Pending)?;
        self.persist(&mut run).await?;

        info!(run_id, node_id, "Structured prompt approved");
        self.events.publish(RunEvent::ApprovalResolved {
            run_id: run.id.clone(),
            node_id: node_id.to_string(),
            approved: true,
        });
        Ok(true)
    }

    /// Reject a parked node. The run fails and cannot be resumed.
    pub async fn reject(&self, run_id: &str, node_id: &str, reason: &str) -> Result<bool> {
        let mut run = self.load(run_id).await?;
        if run.status != RunStatus::WaitingApproval {
            return Ok(false);
        }
        let Some(record) = run.snapshot.node_mut(node_id) else {
            return Ok(false);
        };
        if record.status != NodeStatus::WaitingApproval {
            return Ok(false);
        }

        let now = Utc::now();
        record.status = NodeStatus::Rejected;
        record.rejection_reason = Some(reason.to_string());
        record.rejection_time = Some(now);
        record.end_time = Some(now);
        run.fail(format!(
            "Structured prompt rejected for node {node_id}: {reason}"
        ))?;
        self.persist(&mut run).await?;

        info!(run_id, node_id, reason, "Structured prompt rejected");
        self.events.publish(RunEvent::ApprovalResolved {
            run_id: run.id.clone(),
            node_id: node_id.to_string(),
            approved: false,
        });
        self.events.publish(RunEvent::RunFinished {
            run_id: run.id.clone(),
            status: run.status,
            error: run.snapshot.error.clone(),
        });
        Ok(true)
    }

    /// Nodes of the run waiting for a decision.
    pub async fn list_pending_approvals(&self, run_id: &str) -> Result<Vec<PendingApproval>> {
        let run = self.load(run_id).await?;
        Ok(run
            .snapshot
            .nodes
            .iter()
            .filter(|(_, record)| record.awaiting_approval())
            .map(|(node_id, record)| PendingApproval {
                node_id: node_id.clone(),
                node_type: record.node_type,
                generated_prompt: record.generated_prompt.clone(),
                request_id: record.request_id.clone(),
            })
            .collect())
    }

    /// A run owned by `user_id`.
    pub async fn get_run(&self, run_id: &str, user_id: &str) -> Result<WorkflowRun> {
        let run = self.load(run_id).await?;
        if run.user_id != user_id {
            return Err(FiboError::RunNotFound(run_id.to_string()));
        }
        Ok(run)
    }

    pub async fn list_runs(
        &self,
        user_id: &str,
        skip: usize,
        limit: usize,
    ) -> Result<(Vec<WorkflowRun>, usize)> {
        self.store.list_runs(user_id, skip, limit).await
    }

    async fn load(&self, run_id: &str) -> Result<WorkflowRun> {
        self.store
            .load_run(run_id)
            .await?
            .ok_or_else(|| FiboError::RunNotFound(run_id.to_string()))
    }

    /// Try once to move a run that hit a storage error out of RUNNING.
    async fn record_storage_failure(&self, run: &mut WorkflowRun, err: &FiboError) {
        if run.fail(err.to_string()).is_err() {
            return;
        }
        match self.persist(run).await {
            Ok(()) => {
                warn!(run_id = %run.id, error = %err, "Run failed on a storage error");
                self.events.publish(RunEvent::RunFinished {
                    run_id: run.id.clone(),
                    status: run.status,
                    error: run.snapshot.error.clone(),
                });
            }
            Err(e) => {
                warn!(run_id = %run.id, error = %e, "Could not record storage failure; run stays RUNNING")
            }
        }
    }

    async fn persist(&self, run: &mut WorkflowRun) -> Result<()> {
        run.version = self.store.save_run(run).await?;
        Ok(())
    }
}
