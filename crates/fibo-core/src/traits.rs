use futures::future::BoxFuture;

use crate::api::{ImageGenerateRequest, OperationResponse, StructuredPromptRequest};
use crate::catalog::Flavor;
use crate::error::{ApiError, Result};
use crate::run::WorkflowRun;
use crate::workflow::Workflow;

/// Image-generation API: the remote client or an offline double.
///
/// Implementations resolve asynchronous operations themselves: the returned
/// response is always terminal.
pub trait ImageApi: Send + Sync + 'static {
    /// Generate an image.
    fn generate_image(
        &self,
        flavor: Flavor,
        request: ImageGenerateRequest,
    ) -> BoxFuture<'_, std::result::Result<OperationResponse, ApiError>>;

    /// Generate a structured prompt from text and/or images.
    fn generate_structured_prompt(
        &self,
        flavor: Flavor,
        request: StructuredPromptRequest,
    ) -> BoxFuture<'_, std::result::Result<OperationResponse, ApiError>>;
}

/// Workflow definitions, scoped to their owning user.
pub trait WorkflowStore: Send + Sync + 'static {
    fn insert_workflow(&self, workflow: &Workflow) -> BoxFuture<'_, Result<()>>;

    fn get_workflow(&self, id: &str, user_id: &str) -> BoxFuture<'_, Result<Option<Workflow>>>;

    /// Newest first. Returns the page and the user's total count.
    fn list_workflows(
        &self,
        user_id: &str,
        skip: usize,
        limit: usize,
    ) -> BoxFuture<'_, Result<(Vec<Workflow>, usize)>>;

    /// Returns false when no workflow matched.
    fn update_workflow(&self, workflow: &Workflow) -> BoxFuture<'_, Result<bool>>;

    /// Removes the workflow and its runs. Returns false when no workflow matched.
    fn delete_workflow(&self, id: &str, user_id: &str) -> BoxFuture<'_, Result<bool>>;
}

/// Workflow runs and their execution snapshots.
pub trait RunStore: Send + Sync + 'static {
    fn insert_run(&self, run: &WorkflowRun) -> BoxFuture<'_, Result<()>>;

    fn load_run(&self, run_id: &str) -> BoxFuture<'_, Result<Option<WorkflowRun>>>;

    /// Atomically persist status and snapshot if the stored version still
    /// equals `run.version`. Returns the new version, or `Conflict`.
    fn save_run(&self, run: &WorkflowRun) -> BoxFuture<'_, Result<u64>>;

    /// Newest first. Returns the page and the user's total count.
    fn list_runs(
        &self,
        user_id: &str,
        skip: usize,
        limit: usize,
    ) -> BoxFuture<'_, Result<(Vec<WorkflowRun>, usize)>>;
}

/// Combined persistence collaborator used by the engine.
pub trait Store: WorkflowStore + RunStore {}

impl<T: WorkflowStore + RunStore> Store for T {}
