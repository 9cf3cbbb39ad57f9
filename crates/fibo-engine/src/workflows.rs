use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use fibo_core::error::{FiboError, Result};
use fibo_core::traits::{Store, WorkflowStore};
use fibo_core::workflow::{Workflow, WorkflowDefinition};

use crate::graph::{validate_definition, ValidationReport};

/// Partial update of a stored workflow. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct WorkflowUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub definition: Option<WorkflowDefinition>,
}

/// User-scoped workflow management. Definitions with validation errors are
/// never stored; warnings are allowed.
pub struct WorkflowService {
    store: Arc<dyn Store>,
}

impl WorkflowService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn validate(definition: &WorkflowDefinition) -> ValidationReport {
        validate_definition(definition)
    }

    fn ensure_valid(definition: &WorkflowDefinition) -> Result<()> {
        let report = validate_definition(definition);
        if report.valid {
            Ok(())
        } else {
            Err(FiboError::InvalidWorkflow(report.errors.join("; ")))
        }
    }

    pub async fn create_workflow(
        &self,
        user_id: &str,
        name: &str,
        description: Option<String>,
        definition: WorkflowDefinition,
    ) -> Result<Workflow> {
        Self::ensure_valid(&definition)?;
        let mut workflow = Workflow::new(user_id, name, definition);
        workflow.description = description;
        self.store.insert_workflow(&workflow).await?;
        info!(workflow_id = %workflow.id, user_id, "Workflow created");
        Ok(workflow)
    }

    pub async fn get_workflow(&self, id: &str, user_id: &str) -> Result<Workflow> {
        self.store
            .get_workflow(id, user_id)
            .await?
            .ok_or_else(|| FiboError::WorkflowNotFound(id.to_string()))
    }

    pub async fn list_workflows(
        &self,
        user_id: &str,
        skip: usize,
        limit: usize,
    ) -> Result<(Vec<Workflow>, usize)> {
        self.store.list_workflows(user_id, skip, limit).await
    }

    pub async fn update_workflow(
        &self,
        id: &str,
        user_id: &str,
        update: WorkflowUpdate,
    ) -> Result<Workflow> {
        let mut workflow = self.get_workflow(id, user_id).await?;

        if let Some(definition) = update.definition {
            Self::ensure_valid(&definition)?;
            workflow.definition = definition;
        }
        if let Some(name) = update.name {
            workflow.name = name;
        }
        if update.description.is_some() {
            workflow.description = update.description;
        }
        workflow.version += 1;
        workflow.updated_at = Utc::now();

        if !self.store.update_workflow(&workflow).await? {
            return Err(FiboError::WorkflowNotFound(id.to_string()));
        }
        info!(workflow_id = %workflow.id, version = workflow.version, "Workflow updated");
        Ok(workflow)
    }

    /// Delete a workflow together with all of its runs.
    pub async fn delete_workflow(&self, id: &str, user_id: &str) -> Result<()> {
        if !self.store.delete_workflow(id, user_id).await? {
            return Err(FiboError::WorkflowNotFound(id.to_string()));
        }
        info!(workflow_id = %id, "Workflow deleted");
        Ok(())
    }
}
