pub mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::engine::router::WorkflowDefinition;
use crate::engine::{
    GraphRuntime, Orchestrator, PollScheduler, RuntimeLimits, TaskCallback, TaskResult,
};
use crate::nodes::NodeRegistry;
use crate::storage::CheckpointStore;
use crate::storage::json_store::JsonCheckpointStore;
use crate::storage::memory_store::MemoryCheckpointStore;
use crate::storage::sqlite_store::SqliteCheckpointStore;
use crate::workers::{
    ChannelEventBus, DispatchMode, EventBus, HttpEventBus, HttpWorkerTransport, WorkerClient,
};

use self::config::{Overrides, RelayConfig, Settings, StoreKind};

#[derive(Parser)]
#[command(
    name = "taskrelay",
    version,
    about = "Checkpointed multi-agent task orchestrator"
)]
pub struct Cli {
    /// Path to a taskrelay.yaml config file (default: auto-detect in cwd)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to a .env file to load (default: auto-detect .env in cwd)
    #[arg(long, global = true)]
    dotenv: Option<PathBuf>,

    /// Dispatch mode (direct, poll, event)
    #[arg(long, global = true, env = "TASKRELAY_MODE")]
    mode: Option<DispatchMode>,

    /// Checkpoint store (memory, json, sqlite)
    #[arg(long, global = true, env = "TASKRELAY_STORE")]
    store: Option<StoreKind>,

    /// Directory for the JSON checkpoint store
    #[arg(long, global = true, env = "STORE_DIR")]
    store_dir: Option<PathBuf>,

    /// SQLite database url for the sqlite store
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Broker ingress url for event mode
    #[arg(long, global = true, env = "EVENT_BUS_URL")]
    event_bus_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST + JSON-RPC server
    Serve {
        /// Host to bind to
        #[arg(long, env = "HOST")]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long, env = "PORT")]
        port: Option<u16>,

        /// Maximum request body size in bytes (default: 1048576 = 1 MB)
        #[arg(long, env = "MAX_BODY")]
        max_body: Option<usize>,
    },

    /// Submit a task and drive it as far as it goes in this process
    Submit {
        /// Business identifier of the request, e.g. a case id
        correlation_id: String,

        /// Request payload as JSON string
        #[arg(short = 'd', long)]
        payload: Option<String>,
    },

    /// Show a task's status and trace
    Status {
        task_id: String,
    },

    /// Show a task's final result
    Result {
        task_id: String,
    },

    /// Answer the questions of a task awaiting human input
    Answer {
        task_id: String,
        answer: String,
    },

    /// Deliver a worker result by hand
    Callback {
        task_id: String,

        /// Worker name (e.g. agent_a)
        worker: String,

        /// Worker-reported status (e.g. step_a_done, failed)
        status: String,

        /// Result payload as JSON string
        #[arg(short, long)]
        result: Option<String>,

        /// Question for a human; repeat for several
        #[arg(long = "needs-info")]
        needs_info: Vec<String>,
    },

    /// List stored tasks
    List {
        /// Filter by status (e.g. completed, awaiting_human_input)
        #[arg(short, long)]
        status: Option<String>,

        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Delete a stored task
    Delete {
        task_id: String,
    },

    /// Print the route table and registered nodes
    Graph,
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Load .env file
    load_dotenv(cli.dotenv.as_deref());

    let file = RelayConfig::load(cli.config.as_deref())?;
    let mut overrides = Overrides {
        dispatch_mode: cli.mode,
        store: cli.store,
        store_dir: cli.store_dir,
        database_url: cli.database_url,
        event_bus_url: cli.event_bus_url,
        ..Overrides::default()
    };
    if let Commands::Serve {
        host,
        port,
        max_body,
    } = &cli.command
    {
        overrides.host = host.clone();
        overrides.port = *port;
        overrides.max_body = *max_body;
    }
    let settings = Settings::resolve(overrides, file);

    match cli.command {
        Commands::Serve { .. } => cmd_serve(&settings).await,
        Commands::Submit {
            correlation_id,
            payload,
        } => cmd_submit(&settings, correlation_id, payload).await,
        Commands::Status { task_id } => cmd_status(&settings, task_id).await,
        Commands::Result { task_id } => cmd_result(&settings, task_id).await,
        Commands::Answer { task_id, answer } => cmd_answer(&settings, task_id, answer).await,
        Commands::Callback {
            task_id,
            worker,
            status,
            result,
            needs_info,
        } => cmd_callback(&settings, task_id, worker, status, result, needs_info).await,
        Commands::List { status, format } => cmd_list(&settings, status, format).await,
        Commands::Delete { task_id } => cmd_delete(&settings, task_id).await,
        Commands::Graph => cmd_graph(&settings).await,
    }
}

/// Load environment variables from a .env file.
/// If an explicit path is given, load from that path (error if missing).
/// Otherwise, auto-detect .env in the current working directory (silently skip if absent).
fn load_dotenv(explicit_path: Option<&std::path::Path>) {
    match explicit_path {
        Some(path) => match dotenvy::from_path(path) {
            Ok(()) => info!("Loaded env from {}", path.display()),
            Err(e) => {
                eprintln!(
                    "Warning: Failed to load dotenv file '{}': {}",
                    path.display(),
                    e
                );
            }
        },
        None => match dotenvy::dotenv() {
            Ok(path) => info!("Loaded env from {}", path.display()),
            Err(dotenvy::Error::Io(_)) => {}
            Err(e) => {
                eprintln!("Warning: Failed to parse .env file: {}", e);
            }
        },
    }
}

/// Wire store, worker client, workflow and runtime together for `settings`.
pub async fn assemble(settings: &Settings) -> Result<Arc<Orchestrator>> {
    let store: Arc<dyn CheckpointStore> = match settings.store {
        StoreKind::Memory => Arc::new(MemoryCheckpointStore::new()),
        StoreKind::Json => Arc::new(JsonCheckpointStore::new(&settings.store_dir)),
        StoreKind::Sqlite => Arc::new(SqliteCheckpointStore::connect(&settings.database_url).await?),
    };

    let workers = Arc::new(worker_client(settings)?);
    let definition = Arc::new(WorkflowDefinition::travel(settings.dispatch_mode));
    let registry = Arc::new(NodeRegistry::with_builtins(&definition));

    let runtime = Arc::new(
        GraphRuntime::new(definition, registry, store, workers).with_limits(RuntimeLimits {
            max_steps: settings.max_steps,
            ..RuntimeLimits::default()
        }),
    );
    runtime.validate()?;

    let mut orchestrator =
        Orchestrator::new(runtime.clone()).with_dispatch_deadline(settings.dispatch_deadline);
    if settings.dispatch_mode == DispatchMode::Poll {
        let poller = PollScheduler::new(
            runtime,
            settings.poll_interval,
            settings.max_concurrent_polls,
        );
        orchestrator = orchestrator.with_poller(Arc::new(poller));
    }

    info!(
        mode = %settings.dispatch_mode,
        store = ?settings.store,
        "Orchestrator assembled"
    );
    Ok(Arc::new(orchestrator))
}

fn worker_client(settings: &Settings) -> Result<WorkerClient> {
    let retry = settings.retry.clone();
    let client = match settings.dispatch_mode {
        DispatchMode::Direct | DispatchMode::Poll => {
            let transport = Arc::new(HttpWorkerTransport::new(
                settings.workers.clone(),
                settings.http_timeout,
            )?);
            if settings.dispatch_mode == DispatchMode::Direct {
                WorkerClient::direct(transport, retry)
            } else {
                WorkerClient::poll(transport, retry)
            }
        }
        DispatchMode::Event => {
            let bus: Arc<dyn EventBus> = match &settings.event_bus_url {
                Some(url) => Arc::new(HttpEventBus::new(url, settings.http_timeout)?),
                None => {
                    let (bus, mut rx) = ChannelEventBus::new(256);
                    tokio::spawn(async move {
                        while let Some(event) = rx.recv().await {
                            info!(
                                event_id = %event.event_id,
                                detail_type = %event.detail_type,
                                task_id = %event.detail.task_id,
                                payload = %event.detail.payload,
                                "Dispatch event (no broker configured)"
                            );
                        }
                    });
                    Arc::new(bus)
                }
            };
            WorkerClient::event(bus, retry)
        }
    };
    Ok(client)
}

async fn cmd_serve(settings: &Settings) -> Result<()> {
    let orchestrator = assemble(settings).await?;
    orchestrator.recover().await?;
    crate::api::serve(
        orchestrator,
        &settings.host,
        settings.port,
        settings.max_body,
    )
    .await
}

async fn cmd_submit(
    settings: &Settings,
    correlation_id: String,
    payload_json: Option<String>,
) -> Result<()> {
    let payload: serde_json::Value = match payload_json {
        Some(json) => {
            serde_json::from_str(&json).with_context(|| "Failed to parse --payload JSON")?
        }
        None => serde_json::json!({}),
    };

    let orchestrator = assemble(settings).await?;
    let report = orchestrator.create_task(&correlation_id, payload).await?;

    println!("Task ID: {}", report.task_id);
    println!("Status:  {} ({})", report.status, report.phase);
    println!("Steps:   {}", report.steps);
    if settings.dispatch_mode == DispatchMode::Poll {
        println!("\nPolling continues only while `taskrelay serve` is running.");
    }
    Ok(())
}

async fn cmd_status(settings: &Settings, task_id: String) -> Result<()> {
    let orchestrator = assemble(settings).await?;
    let report = orchestrator
        .get_status(&task_id)
        .await
        .with_context(|| format!("Task '{}' not found", task_id))?;

    println!("Task:    {} ({})", report.task_id, report.correlation_id);
    println!("Status:  {} ({})", report.status, report.phase);

    if !report.pending.is_empty() {
        println!("\nPending:");
        for p in &report.pending {
            let flag = if p.overdue { "  OVERDUE" } else { "" };
            println!("  {} [{}] {:.1}s{}", p.worker, p.handle, p.elapsed_s, flag);
        }
    }
    if let Some(questions) = &report.needs_info {
        println!("\nNeeds info: {}", questions.join(", "));
    }

    println!("\nTrace:");
    for line in &report.trace {
        println!("  - {}", line);
    }
    Ok(())
}

async fn cmd_result(settings: &Settings, task_id: String) -> Result<()> {
    let orchestrator = assemble(settings).await?;
    match orchestrator.get_result(&task_id).await? {
        TaskResult::Completed { result, .. } => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        TaskResult::NotReady { status, .. } => println!("Not ready yet (status: {})", status),
        TaskResult::Failed { status, error, .. } => {
            println!("Failed: {}", status);
            if let Some(error) = error {
                println!("  {}", error);
            }
        }
    }
    Ok(())
}

async fn cmd_answer(settings: &Settings, task_id: String, answer: String) -> Result<()> {
    let orchestrator = assemble(settings).await?;
    let report = orchestrator.submit_human_answer(&task_id, &answer).await?;
    println!("Status: {} ({})", report.status, report.phase);
    Ok(())
}

async fn cmd_callback(
    settings: &Settings,
    task_id: String,
    worker: String,
    status: String,
    result_json: Option<String>,
    needs_info: Vec<String>,
) -> Result<()> {
    let result = match result_json {
        Some(json) => serde_json::from_str(&json).with_context(|| "Failed to parse --result JSON")?,
        None => serde_json::Value::Null,
    };

    let orchestrator = assemble(settings).await?;
    let ack = orchestrator
        .deliver_callback(TaskCallback {
            task_id,
            worker_name: worker,
            status,
            result,
            needs_info: (!needs_info.is_empty()).then_some(needs_info),
        })
        .await?;
    println!("{}", serde_json::to_string_pretty(&ack)?);
    Ok(())
}

async fn cmd_list(settings: &Settings, status: Option<String>, format: String) -> Result<()> {
    let orchestrator = assemble(settings).await?;
    let tasks = orchestrator.list_tasks(status.as_deref()).await?;

    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }

    println!(
        "{:<38} {:<16} {:<22} {:<24}",
        "TASK ID", "CORRELATION", "STATUS", "CREATED"
    );
    println!("{}", "-".repeat(100));

    for task in &tasks {
        println!(
            "{:<38} {:<16} {:<22} {:<24}",
            task.task_id,
            task.correlation_id,
            task.status,
            task.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!("\nTotal: {} task(s)", tasks.len());
    Ok(())
}

async fn cmd_delete(settings: &Settings, task_id: String) -> Result<()> {
    let orchestrator = assemble(settings).await?;
    orchestrator.delete_task(&task_id).await?;
    println!("Deleted {}", task_id);
    Ok(())
}

async fn cmd_graph(settings: &Settings) -> Result<()> {
    let orchestrator = assemble(settings).await?;
    let runtime = orchestrator.runtime();
    let definition = runtime.definition();

    println!("Workflow: {} (entry: {})", definition.name, definition.entry_status);
    println!("\n{:<24} NEXT", "STATUS");
    println!("{}", "-".repeat(50));
    for (status, route) in definition.routes.entries() {
        let next = match route {
            crate::engine::Route::Node(node) => {
                if definition.interrupts_after(node) {
                    format!("{} (interrupt after)", node)
                } else {
                    node.clone()
                }
            }
            crate::engine::Route::Wait => "wait for result".to_string(),
            crate::engine::Route::Terminal => "end".to_string(),
        };
        println!("{:<24} {}", status, next);
    }

    println!("\n{:<24} DESCRIPTION", "NODE");
    println!("{}", "-".repeat(60));
    for (name, desc) in runtime.registry().list() {
        println!("{:<24} {}", name, desc);
    }
    Ok(())
}
