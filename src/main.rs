//! # Planloom CLI (`plm`)
//!
//! The `plm` binary is the primary interface for Planloom. It provides
//! commands for database initialization, artifact ingestion, retrieval,
//! roadmap graph editing, and agent run management.
//!
//! ## Usage
//!
//! ```bash
//! plm --config ./config/plm.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `plm init` | Create the SQLite database and run schema migrations |
//! | `plm submit <path>` | Ingest a file as an artifact and process the job |
//! | `plm job status <id>` | Show an ingest job |
//! | `plm job cancel <id>` | Request cancellation of an ingest job |
//! | `plm retrieve "<query>"` | Retrieve top-k chunks for a query |
//! | `plm node add <title>` | Create a roadmap node |
//! | `plm node status <id> <status>` | Move a node through its state machine |
//! | `plm edge add <from> <to>` | Create a dependency edge (cycle-checked) |
//! | `plm resolve <node> <option>` | Resolve a decision node |
//! | `plm activate` | Activate all ready roadmap nodes |
//! | `plm run start` | Start an agent run against a node or query |
//! | `plm run get <id>` | Show a run's transcript |
//! | `plm run cancel <id>` | Request cancellation of a run |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use planloom::capability::Capabilities;
use planloom::config::{self, Config};
use planloom::graph::GraphEngine;
use planloom::index::SqliteIndex;
use planloom::ingest::IngestPipeline;
use planloom::models::{Artifact, DecisionOption, NodeKind, NodeStatus, RunTarget, SourceKind};
use planloom::retrieval::Retriever;
use planloom::scheduler::Scheduler;
use planloom::store::{SqliteStore, Store};
use planloom::{db, migrate};

/// Planloom CLI — turn personal knowledge into graph-structured roadmaps.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/plm.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "plm",
    about = "Planloom — a local-first knowledge-to-roadmap orchestration engine",
    version,
    long_about = "Planloom ingests documents, chat exports, and code into a searchable chunk \
    corpus, assembles budgeted context for reasoning steps, and drives agent runs that grow a \
    project roadmap DAG with decision nodes and branch expansion."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/plm.toml")]
    config: PathBuf,

    /// Project the command operates on.
    #[arg(long, global = true, default_value = "default")]
    project: String,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Ingest a file as an artifact.
    ///
    /// Reads the file, stores it as an artifact, and drives the ingest job
    /// to completion: extract, chunk, dedup, embed, index.
    Submit {
        /// Path to the file to ingest.
        path: PathBuf,

        /// Source kind: `document`, `chat_export`, `code`, or `image`.
        /// Inferred from the file extension when omitted.
        #[arg(long)]
        kind: Option<String>,

        /// Artifact ID to submit under. Reusing the ID of an earlier
        /// submission re-ingests that artifact (already-seen chunks are
        /// deduplicated). A fresh ID is generated when omitted.
        #[arg(long)]
        artifact_id: Option<String>,
    },

    /// Inspect or cancel ingest jobs.
    Job {
        #[command(subcommand)]
        action: JobAction,
    },

    /// Retrieve the top-k chunks for a query.
    Retrieve {
        /// The query string.
        query: String,

        /// Number of chunks to return.
        #[arg(long)]
        k: Option<usize>,
    },

    /// Manage roadmap nodes.
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },

    /// Manage roadmap dependency edges.
    Edge {
        #[command(subcommand)]
        action: EdgeAction,
    },

    /// Resolve a decision node by choosing one of its options.
    ///
    /// Marks the decision done and materializes the chosen option's branch
    /// as new task nodes depending on the decision.
    Resolve {
        /// Decision node ID.
        node_id: String,
        /// Label of the option to choose.
        option: String,
    },

    /// Activate every pending node whose prerequisites are all done.
    Activate,

    /// Manage agent runs.
    Run {
        #[command(subcommand)]
        action: RunAction,
    },
}

/// Ingest job subcommands.
#[derive(Subcommand)]
enum JobAction {
    /// Show a job's status and error detail.
    Status {
        /// Job ID.
        id: String,
    },
    /// Request cooperative cancellation of a job.
    Cancel {
        /// Job ID.
        id: String,
    },
}

/// Roadmap node subcommands.
#[derive(Subcommand)]
enum NodeAction {
    /// Create a node.
    Add {
        /// Node title.
        title: String,

        /// Node kind: `task`, `decision`, or `milestone`.
        #[arg(long, default_value = "task")]
        kind: String,

        /// Decision options as JSON, e.g.
        /// `[{"label":"self-host","branch":["provision server"]}]`.
        /// Required for decision nodes, rejected otherwise.
        #[arg(long)]
        options: Option<String>,
    },
    /// List the project's nodes.
    List,
    /// Move a node to a new status (`active`, `blocked`, `done`, `abandoned`).
    Status {
        /// Node ID.
        id: String,
        /// Target status.
        status: String,
    },
}

/// Roadmap edge subcommands.
#[derive(Subcommand)]
enum EdgeAction {
    /// Create a dependency edge: `to` waits for `from`.
    ///
    /// Fails with a cycle error, leaving the graph unchanged, if the edge
    /// would make the graph cyclic.
    Add {
        /// Prerequisite node ID.
        from: String,
        /// Dependent node ID.
        to: String,
    },
}

/// Agent run subcommands.
#[derive(Subcommand)]
enum RunAction {
    /// Start a run and execute it to completion.
    ///
    /// Exactly one of `--node` or `--query` selects the target. The default
    /// plan is a retrieval step followed by a reasoning step.
    Start {
        /// Target roadmap node ID.
        #[arg(long)]
        node: Option<String>,

        /// Ad-hoc target query.
        #[arg(long)]
        query: Option<String>,
    },
    /// Show a run's status and step transcript.
    Get {
        /// Run ID.
        id: String,
    },
    /// Request cooperative cancellation of a run.
    Cancel {
        /// Run ID.
        id: String,
    },
}

/// Everything the non-init commands need, wired from one config.
struct Engine {
    store: Arc<SqliteStore>,
    pipeline: Arc<IngestPipeline>,
    retriever: Arc<Retriever>,
    graph: GraphEngine,
    scheduler: Scheduler,
}

async fn build_engine(cfg: &Config) -> anyhow::Result<Engine> {
    let pool = db::connect(cfg).await?;
    let store = Arc::new(SqliteStore::new(pool.clone()));
    let index = Arc::new(SqliteIndex::new(pool));
    let capabilities = Capabilities::from_config(cfg)?;

    let pipeline = Arc::new(IngestPipeline::new(
        store.clone(),
        index.clone(),
        capabilities.clone(),
        cfg.chunking.clone(),
    ));
    let retriever = Arc::new(Retriever::new(
        store.clone(),
        index,
        capabilities.clone(),
    ));
    let graph = GraphEngine::new(store.clone());
    let scheduler = Scheduler::new(
        store.clone(),
        retriever.clone(),
        capabilities,
        cfg.retrieval.top_k,
        cfg.retrieval.budget_capacity,
    );

    Ok(Engine {
        store,
        pipeline,
        retriever,
        graph,
        scheduler,
    })
}

fn infer_kind(path: &PathBuf) -> SourceKind {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase()
        .as_str()
    {
        "json" => SourceKind::ChatExport,
        "rs" | "py" | "js" | "ts" | "go" | "java" | "c" | "cpp" | "h" | "sh" | "toml" | "yaml"
        | "yml" => SourceKind::Code,
        "png" | "jpg" | "jpeg" | "gif" | "webp" => SourceKind::Image,
        _ => SourceKind::Document,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let project = cli.project.as_str();

    if let Commands::Init = cli.command {
        let pool = db::connect(&cfg).await?;
        migrate::run_migrations(&pool).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let engine = build_engine(&cfg).await?;

    match cli.command {
        Commands::Init => unreachable!(),
        Commands::Submit {
            path,
            kind,
            artifact_id,
        } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let kind = match kind {
                Some(raw) => SourceKind::parse(&raw)
                    .ok_or_else(|| anyhow::anyhow!("unknown source kind: {}", raw))?,
                None => infer_kind(&path),
            };
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("artifact")
                .to_string();
            let artifact = Artifact {
                id: artifact_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                project_id: project.to_string(),
                kind,
                name,
                bytes,
                created_at: Utc::now().timestamp(),
                ingested_at: None,
            };
            let artifact_id = artifact.id.clone();
            let job_id = engine.pipeline.submit(artifact).await?;
            let job = engine.pipeline.process(&job_id).await?;
            println!("artifact: {}", artifact_id);
            println!("job:      {} ({})", job.id, job.status.as_str());
            if let Some(detail) = job.error_detail {
                println!("error:    {}", detail);
            }
        }
        Commands::Job { action } => match action {
            JobAction::Status { id } => {
                let job = engine.pipeline.status(&id).await?;
                println!("{}", serde_json::to_string_pretty(&job)?);
            }
            JobAction::Cancel { id } => {
                engine.pipeline.cancel(&id).await?;
                println!("Cancellation requested for job {}.", id);
            }
        },
        Commands::Retrieve { query, k } => {
            let k = k.unwrap_or(cfg.retrieval.top_k);
            let results = engine.retriever.retrieve(&query, project, k).await?;
            if results.is_empty() {
                println!("No results.");
            }
            for (i, result) in results.iter().enumerate() {
                let preview: String = result.chunk.text.chars().take(120).collect();
                println!(
                    "{:>2}. [{:.4}] {} ({}..{})",
                    i + 1,
                    result.score,
                    result.chunk.id,
                    result.chunk.start,
                    result.chunk.end
                );
                println!("    {}", preview.replace('\n', " "));
            }
        }
        Commands::Node { action } => match action {
            NodeAction::Add {
                title,
                kind,
                options,
            } => {
                let kind = NodeKind::parse(&kind)
                    .ok_or_else(|| anyhow::anyhow!("unknown node kind: {}", kind))?;
                let options: Vec<DecisionOption> = match options {
                    Some(json) => serde_json::from_str(&json)
                        .context("Failed to parse --options as a JSON option list")?,
                    None => Vec::new(),
                };
                let node = engine.graph.create_node(project, kind, &title, options).await?;
                println!("{}", node.id);
            }
            NodeAction::List => {
                for node in engine.graph.nodes(project).await? {
                    println!(
                        "{}  {:<9} {:<9} {}",
                        node.id,
                        node.kind.as_str(),
                        node.status.as_str(),
                        node.title
                    );
                }
            }
            NodeAction::Status { id, status } => {
                let status = NodeStatus::parse(&status)
                    .ok_or_else(|| anyhow::anyhow!("unknown node status: {}", status))?;
                let node = engine.graph.set_status(&id, status).await?;
                println!("{} -> {}", node.id, node.status.as_str());
            }
        },
        Commands::Edge { action } => match action {
            EdgeAction::Add { from, to } => {
                engine.graph.create_edge(project, &from, &to).await?;
                println!("{} -> {}", from, to);
            }
        },
        Commands::Resolve { node_id, option } => {
            let expansion = engine.graph.resolve_decision(&node_id, &option).await?;
            println!(
                "Resolved. {} new node(s), {} new edge(s).",
                expansion.nodes.len(),
                expansion.edges.len()
            );
            for node in expansion.nodes {
                println!("  {}  {}", node.id, node.title);
            }
        }
        Commands::Activate => {
            let activated = engine.graph.activate_ready_nodes(project).await?;
            println!("{} node(s) activated.", activated.len());
            for id in activated {
                println!("  {}", id);
            }
        }
        Commands::Run { action } => match action {
            RunAction::Start { node, query } => {
                let target = match (node, query) {
                    (Some(node_id), None) => RunTarget::Node(node_id),
                    (None, Some(query)) => RunTarget::Query(query),
                    _ => bail!("exactly one of --node or --query is required"),
                };
                let run_id = engine.scheduler.start(project, target).await?;
                let run = engine.scheduler.execute(&run_id).await?;
                println!("run: {} ({})", run.id, run.status.as_str());
                for step in &run.steps {
                    println!("  step {} [{}]", step.seq, step.kind.as_str());
                }
                if let Some(last) = run.steps.last() {
                    println!("---\n{}", last.output);
                }
            }
            RunAction::Get { id } => {
                let run = engine.store.get_run(&id).await?;
                println!("{}", serde_json::to_string_pretty(&run)?);
            }
            RunAction::Cancel { id } => {
                engine.scheduler.cancel(&id).await?;
                println!("Cancellation requested for run {}.", id);
            }
        },
    }

    Ok(())
}
