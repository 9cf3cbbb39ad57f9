use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::{Map, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fibo_core::catalog::{catalog, Availability};
use fibo_core::config::AppConfig;
use fibo_core::event::RunEvent;
use fibo_core::run::WorkflowRun;
use fibo_core::workflow::WorkflowDefinition;
use fibo_engine::{Orchestrator, WorkflowService};
use fibo_store::SqliteStore;

#[derive(Parser)]
#[command(name = "fibo", version, about = "Image-generation workflow engine with human approval")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "fibo.toml")]
    config: PathBuf,

    /// User that owns workflows and runs
    #[arg(short, long, env = "FIBO_USER", default_value = "local")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the node catalogue
    Nodes,
    /// Manage workflows
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },
    /// Create, execute, and inspect runs
    Run {
        #[command(subcommand)]
        action: RunAction,
    },
    /// List nodes of a run awaiting approval
    Approvals {
        run_id: String,
    },
    /// Approve a generated structured prompt, optionally with edits
    Approve {
        run_id: String,
        node_id: String,
        /// Approved structured prompt as a JSON object
        #[arg(long)]
        prompt: String,
        /// Resume the run right away
        #[arg(long)]
        resume: bool,
    },
    /// Reject a generated structured prompt; the run fails
    Reject {
        run_id: String,
        node_id: String,
        #[arg(long, default_value = "Rejected by reviewer")]
        reason: String,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// Store a workflow from a definition JSON file
    Create {
        /// File with `{"nodes": [...], "edges": [...]}`
        file: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// List workflows, newest first
    List {
        #[arg(long, default_value = "0")]
        skip: usize,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Print a stored workflow
    Show { id: String },
    /// Validate a definition file without storing it
    Validate { file: PathBuf },
    /// Delete a workflow and all of its runs
    Delete { id: String },
}

#[derive(Subcommand)]
enum RunAction {
    /// Create a run of a workflow
    Start {
        workflow_id: String,
        /// Global input parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
        /// Execute immediately and stream progress
        #[arg(long)]
        execute: bool,
    },
    /// Execute or resume a run
    Execute { run_id: String },
    /// Print a run with its execution snapshot
    Show { run_id: String },
    /// List runs, newest first
    List {
        #[arg(long, default_value = "0")]
        skip: usize,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

/// Long-lived services shared by every command.
struct App {
    orchestrator: Orchestrator,
    workflows: WorkflowService,
}

impl App {
    fn build(config: &AppConfig) -> anyhow::Result<Self> {
        let db_path = config.store_path();
        let store = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("opening store at {}", db_path.display()))?,
        );
        let api = fibo_client::create_client(&config.api)?;
        Ok(Self {
            orchestrator: Orchestrator::new(store.clone(), api),
            workflows: WorkflowService::new(store),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "fibo", &mut std::io::stdout());
        return Ok(());
    }

    let config = AppConfig::load_or_default(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Nodes => print_catalogue(),
        Commands::Config => {
            let mut shown = config.clone();
            if shown.api.api_token.is_some() {
                shown.api.api_token = Some("********".into());
            }
            println!("{}", toml::to_string_pretty(&shown)?);
        }
        Commands::Workflow { action } => {
            if let WorkflowAction::Validate { file } = &action {
                let report = WorkflowService::validate(&read_definition(file)?);
                println!("{}", serde_json::to_string_pretty(&report)?);
                if !report.valid {
                    std::process::exit(1);
                }
                return Ok(());
            }
            let app = App::build(&config)?;
            handle_workflow(&app, &cli.user, action).await?;
        }
        Commands::Run { action } => {
            let app = App::build(&config)?;
            handle_run(app, &cli.user, action).await?;
        }
        Commands::Approvals { run_id } => {
            let app = App::build(&config)?;
            app.orchestrator.get_run(&run_id, &cli.user).await?;
            let pending = app.orchestrator.list_pending_approvals(&run_id).await?;
            if pending.is_empty() {
                println!("No pending approvals.");
            }
            for item in pending {
                println!("{}  ({})", item.node_id, item.node_type);
                if let Some(id) = &item.request_id {
                    println!("  request: {id}");
                }
                if let Some(prompt) = &item.generated_prompt {
                    println!("{}", serde_json::to_string_pretty(prompt)?);
                }
            }
        }
        Commands::Approve {
            run_id,
            node_id,
            prompt,
            resume,
        } => {
            let app = App::build(&config)?;
            app.orchestrator.get_run(&run_id, &cli.user).await?;
            let payload: Value =
                serde_json::from_str(&prompt).context("--prompt must be valid JSON")?;
            if !app.orchestrator.approve(&run_id, &node_id, payload).await? {
                anyhow::bail!(
                    "Node {node_id} of run {run_id} is not awaiting approval (or the prompt is not a JSON object)"
                );
            }
            println!("Approved {node_id}.");
            if resume {
                let run = execute_streaming(app, &run_id).await?;
                print_run_summary(&run);
            }
        }
        Commands::Reject {
            run_id,
            node_id,
            reason,
        } => {
            let app = App::build(&config)?;
            app.orchestrator.get_run(&run_id, &cli.user).await?;
            if !app.orchestrator.reject(&run_id, &node_id, &reason).await? {
                anyhow::bail!("Node {node_id} of run {run_id} is not awaiting approval");
            }
            println!("Rejected {node_id}; run {run_id} failed.");
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

async fn handle_workflow(app: &App, user: &str, action: WorkflowAction) -> anyhow::Result<()> {
    match action {
        WorkflowAction::Create {
            file,
            name,
            description,
        } => {
            let definition = read_definition(&file)?;
            let report = WorkflowService::validate(&definition);
            for warning in &report.warnings {
                eprintln!("warning: {warning}");
            }
            let workflow = app
                .workflows
                .create_workflow(user, &name, description, definition)
                .await?;
            println!("{}", workflow.id);
        }
        WorkflowAction::List { skip, limit } => {
            let (items, total) = app.workflows.list_workflows(user, skip, limit).await?;
            println!("{} of {total} workflows", items.len());
            for wf in items {
                println!(
                    "{}  v{}  {} nodes  {}",
                    wf.id,
                    wf.version,
                    wf.definition.nodes.len(),
                    wf.name
                );
            }
        }
        WorkflowAction::Show { id } => {
            let wf = app.workflows.get_workflow(&id, user).await?;
            println!("{}", serde_json::to_string_pretty(&wf)?);
        }
        WorkflowAction::Delete { id } => {
            app.workflows.delete_workflow(&id, user).await?;
            println!("Deleted {id}.");
        }
        WorkflowAction::Validate { .. } => {}
    }
    Ok(())
}

async fn handle_run(app: App, user: &str, action: RunAction) -> anyhow::Result<()> {
    match action {
        RunAction::Start {
            workflow_id,
            params,
            execute,
        } => {
            let params = match params {
                Some(raw) => parse_params(&raw)?,
                None => Map::new(),
            };
            let run = app.orchestrator.create_run(&workflow_id, user, params).await?;
            println!("{}", run.id);
            if execute {
                let run = execute_streaming(app, &run.id).await?;
                print_run_summary(&run);
            }
        }
        RunAction::Execute { run_id } => {
            app.orchestrator.get_run(&run_id, user).await?;
            let run = execute_streaming(app, &run_id).await?;
            print_run_summary(&run);
        }
        RunAction::Show { run_id } => {
            let run = app.orchestrator.get_run(&run_id, user).await?;
            println!("{}", serde_json::to_string_pretty(&run)?);
        }
        RunAction::List { skip, limit } => {
            let (items, total) = app.orchestrator.list_runs(user, skip, limit).await?;
            println!("{} of {total} runs", items.len());
            for run in items {
                println!(
                    "{}  {:<16}  workflow {}  {}",
                    run.id,
                    run.status,
                    run.workflow_id,
                    run.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
    }
    Ok(())
}

/// Execute a run while printing its events. Consumes the app so the event
/// stream closes once execution returns.
async fn execute_streaming(app: App, run_id: &str) -> anyhow::Result<WorkflowRun> {
    let mut rx = app.orchestrator.events().subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let result = app.orchestrator.execute_run(run_id).await;
    drop(app);
    let _ = printer.await;
    Ok(result?)
}

fn print_event(event: &RunEvent) {
    match event {
        RunEvent::RunStarted { execution_order, .. } => {
            println!("> run started: {}", execution_order.join(" -> "))
        }
        RunEvent::NodeStarted { node_id, node_type, .. } => {
            println!("  - {node_id} ({node_type}) ...")
        }
        RunEvent::NodeSkipped { node_id, .. } => println!("  - {node_id} already done"),
        RunEvent::NodeCompleted { node_id, elapsed_ms, .. } => {
            println!("  - {node_id} done in {elapsed_ms}ms")
        }
        RunEvent::NodeFailed { node_id, error, .. } => println!("  - {node_id} failed: {error}"),
        RunEvent::RunSuspended { node_id, .. } => {
            println!("> waiting for approval of {node_id}")
        }
        RunEvent::ApprovalResolved { node_id, approved, .. } => {
            println!("> {node_id} {}", if *approved { "approved" } else { "rejected" })
        }
        RunEvent::RunFinished { status, .. } => println!("> run {status}"),
    }
}

fn print_run_summary(run: &WorkflowRun) {
    println!("run {}: {}", run.id, run.status);
    if let Some(error) = &run.snapshot.error {
        println!("error: {error}");
    }
    for node_id in &run.snapshot.execution_order {
        let Some(record) = run.snapshot.node(node_id) else {
            continue;
        };
        let output = record
            .response
            .as_ref()
            .and_then(|r| r.get("refined_image_url").or_else(|| r.get("image_url")))
            .and_then(Value::as_str)
            .unwrap_or("");
        println!("  {node_id:<12} {:?}  {output}", record.status);
    }
}

fn print_catalogue() {
    for spec in catalog() {
        let availability = match spec.availability {
            Availability::Available => "",
            Availability::ComingSoon => " (coming soon)",
        };
        println!("{}{availability}", spec.kind);
        println!("  {}", spec.description);
        println!("  inputs:  {}", spec.inputs.join(", "));
        println!("  outputs: {}", spec.outputs.join(", "));
        let combos: Vec<String> = spec.combinations.iter().map(|c| c.join("+")).collect();
        if !combos.is_empty() {
            println!("  accepts: {}", combos.join(" | "));
        }
    }
}

fn read_definition(path: &Path) -> anyhow::Result<WorkflowDefinition> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", path.display()))?;
    info!(path = %path.display(), "Loaded workflow definition");
    Ok(WorkflowDefinition::from_json(value)?)
}

fn parse_params(raw: &str) -> anyhow::Result<Map<String, Value>> {
    match serde_json::from_str(raw).context("--params must be valid JSON")? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("--params must be a JSON object, got {other}"),
    }
}
