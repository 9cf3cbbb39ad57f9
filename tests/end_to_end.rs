use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};

use fibo_client::MockClient;
use fibo_core::api::Operation;
use fibo_core::run::{NodeStatus, RunStatus};
use fibo_core::workflow::WorkflowDefinition;
use fibo_engine::{Orchestrator, WorkflowService};
use fibo_store::SqliteStore;
use fibo_test_utils::ScriptedApi;

/// The editor's JSON shape: a prompt is expanded, reviewed, rendered, then refined.
fn storyboard() -> WorkflowDefinition {
    WorkflowDefinition::from_json(json!({
        "nodes": [
            {
                "id": "sp",
                "type": "StructuredPromptGenerateV2",
                "position": {"x": 0.0, "y": 0.0},
                "data": {"config": {"prompt": "a lighthouse in a storm"}, "label": "Expand"}
            },
            {
                "id": "img",
                "type": "ImageGenerateV2",
                "data": {"config": {"aspect_ratio": "16:9"}}
            },
            {
                "id": "fix",
                "type": "ImageRefineLiteV2",
                "data": {"config": {"refinement_prompt": "add a rainbow"}}
            }
        ],
        "edges": [
            {
                "id": "e1",
                "source": "sp",
                "target": "img",
                "sourceHandle": "structured_prompt",
                "targetHandle": "structured_prompt"
            },
            {"id": "e2", "source": "img", "target": "fix"}
        ]
    }))
    .expect("definition parses")
}

fn params(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[tokio::test]
async fn approval_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("fibo.db");
    let api = ScriptedApi::new();

    let run_id = {
        let store = Arc::new(SqliteStore::open(&db).unwrap());
        let workflows = WorkflowService::new(store.clone());
        let orchestrator = Orchestrator::new(store, api.clone());

        let wf = workflows
            .create_workflow("alice", "storm", Some("review before render".into()), storyboard())
            .await
            .unwrap();
        let run = orchestrator
            .create_run(&wf.id, "alice", params(json!({"seed": 11})))
            .await
            .unwrap();

        let run = orchestrator.execute_run(&run.id).await.unwrap();
        assert_eq!(run.status, RunStatus::WaitingApproval);
        assert_eq!(run.snapshot.execution_order, vec!["sp", "img", "fix"]);
        run.id
    };

    // A fresh process sees the parked run and finishes it.
    let store = Arc::new(SqliteStore::open(&db).unwrap());
    let orchestrator = Orchestrator::new(store, api.clone());

    let pending = orchestrator.list_pending_approvals(&run_id).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(
        pending[0].generated_prompt,
        Some(json!({"description": "a lighthouse in a storm"}))
    );

    let edited = json!({"description": "a lighthouse in a storm", "mood": "ominous"});
    assert!(orchestrator.approve(&run_id, "sp", edited.clone()).await.unwrap());

    let run = orchestrator.execute_run(&run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed, "{:?}", run.snapshot.error);
    assert!(run.snapshot.end_time.is_some());

    let sp = run.snapshot.node("sp").unwrap();
    assert_eq!(sp.status, NodeStatus::Completed);
    assert_eq!(sp.approved_prompt.as_ref(), Some(&edited));
    assert!(sp.approval_time.is_some());

    let img = run.snapshot.node("img").unwrap();
    let img_request = img.request.as_ref().unwrap();
    assert_eq!(img_request["structured_prompt"], edited);
    assert_eq!(img_request["aspect_ratio"], "16:9");
    assert_eq!(img_request["seed"], 11);

    let fix = run.snapshot.node("fix").unwrap();
    assert_eq!(fix.status, NodeStatus::Completed);
    let response = fix.response.as_ref().unwrap();
    assert_eq!(response["original_image_url"], "https://img.test/1.png");
    assert_eq!(response["refined_image_url"], "https://img.test/2.png");

    let operations: Vec<Operation> = api.calls().into_iter().map(|c| c.operation).collect();
    assert_eq!(
        operations,
        vec![
            Operation::StructuredPromptGenerate,
            Operation::ImageGenerate,
            Operation::StructuredPromptGenerateLite,
            Operation::ImageGenerateLite,
        ]
    );
}

#[tokio::test]
async fn rejection_fails_the_run_for_good() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let api = ScriptedApi::new();
    let workflows = WorkflowService::new(store.clone());
    let orchestrator = Orchestrator::new(store, api.clone());

    let wf = workflows
        .create_workflow("bob", "storm", None, storyboard())
        .await
        .unwrap();
    let run = orchestrator.create_run(&wf.id, "bob", Map::new()).await.unwrap();
    orchestrator.execute_run(&run.id).await.unwrap();

    assert!(orchestrator.reject(&run.id, "sp", "too dark").await.unwrap());

    let run = orchestrator.get_run(&run.id, "bob").await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(
        run.snapshot.error.as_deref(),
        Some("Structured prompt rejected for node sp: too dark")
    );
    assert_eq!(run.snapshot.node("sp").unwrap().status, NodeStatus::Rejected);
    assert!(orchestrator.execute_run(&run.id).await.is_err());
    assert_eq!(api.call_count(), 1);
}

#[tokio::test]
async fn mock_client_drives_a_full_run_offline() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let workflows = WorkflowService::new(store.clone());
    let orchestrator = Orchestrator::new(store, Arc::new(MockClient::new(Duration::ZERO)));

    let wf = workflows
        .create_workflow("carol", "offline", None, storyboard())
        .await
        .unwrap();
    let run = orchestrator.create_run(&wf.id, "carol", Map::new()).await.unwrap();

    let run = orchestrator.execute_run(&run.id).await.unwrap();
    assert_eq!(run.status, RunStatus::WaitingApproval);
    let generated = run
        .snapshot
        .node("sp")
        .and_then(|r| r.generated_prompt.clone())
        .unwrap();
    assert_eq!(generated["short_description"], "a lighthouse in a storm");

    assert!(orchestrator.approve(&run.id, "sp", generated).await.unwrap());
    let run = orchestrator.execute_run(&run.id).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed, "{:?}", run.snapshot.error);
    let fix = run.snapshot.response_of("fix").unwrap();
    let refined = fix["refined_image_url"].as_str().unwrap();
    assert!(refined.starts_with("https://mock.fibo.local/"), "{refined}");
    assert_eq!(fix["seed"], 42);
}
