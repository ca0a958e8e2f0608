use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weft_core::config::AppConfig;
use weft_core::directory::AgentCatalog;
use weft_core::event::EventBus;
use weft_core::traits::{AgentDirectory, PersistenceAdapter};
use weft_core::types::{Graph, Mission, MissionEvent, MissionPatch, SubTaskStatus};

use weft_graph::{dag, EditingSession, GraphModel};
use weft_mission::{plan_mission, MissionExecutor};
use weft_store::SqliteStore;

#[derive(Parser)]
#[command(name = "weft", version, about = "Agent workflow graphs and mission runs")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "weft.toml", env = "WEFT_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a graph file for structural errors and cycles
    Validate {
        /// Graph JSON file
        file: PathBuf,
    },
    /// Validate a graph file and save it to the store
    Import {
        /// Graph JSON file
        file: PathBuf,
    },
    /// List stored workflows
    Workflows,
    /// Show the sub-tasks a mission over a workflow would get
    Plan {
        #[arg(long)]
        workflow: String,
        #[arg(long)]
        description: Option<String>,
        /// Leader agent type
        #[arg(long)]
        leader: Option<String>,
    },
    /// Create a mission and run it to the end
    Run {
        #[arg(long)]
        workflow: String,
        #[arg(long)]
        description: String,
        /// Leader agent type
        #[arg(long)]
        leader: Option<String>,
        /// Skip the execution stream and run locally
        #[arg(long)]
        simulate: bool,
    },
    /// List missions of a workflow
    Missions {
        #[arg(long)]
        workflow: String,
    },
    /// Start the HTTP gateway
    Serve,
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("weft=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "weft", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = AppConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let directory: Arc<dyn AgentDirectory> = Arc::new(AgentCatalog::with_overrides(&config.agents));

    match cli.command {
        Commands::Validate { file } => {
            let graph = read_graph(&file)?;
            let model = GraphModel::import(graph)?;
            dag::validate(model.graph())?;
            let order = dag::topological_order(model.nodes(), model.edges()).unwrap_or_default();
            println!(
                "{}: {} nodes, {} edges, acyclic",
                model.graph().id,
                model.nodes().len(),
                model.edges().len()
            );
            if !order.is_empty() {
                println!("order: {}", order.join(" -> "));
            }
        }
        Commands::Import { file } => {
            let store = open_store(&config)?;
            let graph = read_graph(&file)?;
            let mut session = EditingSession::import(graph, config.editor.clone(), directory)?;
            let saved = session.save(store.as_ref()).await?;
            println!(
                "Imported {} ({}): {} nodes, {} edges",
                saved.id,
                saved.name,
                saved.nodes.len(),
                saved.edges.len()
            );
        }
        Commands::Workflows => {
            let store = open_store(&config)?;
            let graphs = store.list_graphs()?;
            if graphs.is_empty() {
                println!("No workflows stored.");
            }
            for (id, name) in graphs {
                println!("{:<36} {}", id, name);
            }
        }
        Commands::Plan {
            workflow,
            description,
            leader,
        } => {
            let store = open_store(&config)?;
            let graph = store.load_graph(&workflow).await?;
            let description = description.unwrap_or_default();
            let leader = leader.unwrap_or_else(|| config.mission.default_leader.clone());
            let plan = plan_mission(&graph, &description, &leader, directory.as_ref());
            println!("Leader: {}", plan.leader_name);
            for (i, task) in plan.sub_tasks.iter().enumerate() {
                println!("{:>3}. {} ({})", i + 1, task.title, task.agent_name);
            }
        }
        Commands::Run {
            workflow,
            description,
            leader,
            simulate,
        } => {
            if simulate {
                config.execution.streaming = false;
            }
            let store = open_store(&config)?;
            let graph = store.load_graph(&workflow).await?;
            let mission = run_mission(
                &config,
                store.clone(),
                directory,
                &workflow,
                &graph,
                &description,
                leader.as_deref(),
            )
            .await?;
            if let Some(result) = &mission.result {
                println!("\n{}", result);
            }
        }
        Commands::Missions { workflow } => {
            let store = open_store(&config)?;
            let missions = match store.list_missions(&workflow).await {
                Ok(missions) => missions,
                Err(e) => {
                    warn!(workflow_id = %workflow, error = %e, "Could not list missions");
                    Vec::new()
                }
            };
            if missions.is_empty() {
                println!("No missions for {}.", workflow);
            }
            for m in missions {
                println!(
                    "{}  {:<9} {}/{}  {}",
                    m.id,
                    m.status.to_string(),
                    m.progress.current,
                    m.progress.total,
                    m.description
                );
            }
        }
        Commands::Serve => {
            let store = open_store(&config)?;
            let gateway_config = config.gateway.clone().unwrap_or_default();
            info!(bind = %gateway_config.bind, "Starting gateway");
            let server = weft_gateway::GatewayServer::new(
                gateway_config,
                store,
                directory,
                config.mission.default_leader.clone(),
            );
            let cancel = tokio_util::sync::CancellationToken::new();
            let cancel_clone = cancel.clone();

            // Graceful shutdown on Ctrl-C
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down gateway...");
                cancel_clone.cancel();
            });

            server.run(cancel).await?;
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

fn open_store(config: &AppConfig) -> anyhow::Result<Arc<SqliteStore>> {
    let path = config.store_path();
    let store = SqliteStore::open(&path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Arc::new(store))
}

fn read_graph(path: &Path) -> anyhow::Result<Graph> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let graph = serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    Ok(graph)
}

/// Create a mission, run it while printing progress, and return its final state.
///
/// Ctrl-C cancels the mission.
async fn run_mission(
    config: &AppConfig,
    store: Arc<SqliteStore>,
    directory: Arc<dyn AgentDirectory>,
    workflow: &str,
    graph: &Graph,
    description: &str,
    leader: Option<&str>,
) -> anyhow::Result<Mission> {
    let bus = Arc::new(EventBus::default());
    let executor = MissionExecutor::new(config, store.clone(), directory, bus);
    let mission = executor.create(workflow, graph, description, leader).await?;
    let id = mission.id.clone();

    let mut events = executor.bus().subscribe_mission(&id);
    let titles: Vec<String> = mission.sub_tasks.iter().map(|t| t.title.clone()).collect();
    let print_id = id.clone();
    let print_handle = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match &event {
                MissionEvent::Started { total, .. } => {
                    eprintln!("[mission {}] {} steps", print_id, total);
                }
                MissionEvent::StepStarted { step, title, .. } => {
                    eprintln!("[{}/{}] {}", step + 1, titles.len(), title);
                }
                MissionEvent::StepCompleted {
                    step, duration_ms, ..
                } => {
                    let title = titles.get(*step).map(String::as_str).unwrap_or("step");
                    eprintln!("[{}/{}] {}: done in {} ms", step + 1, titles.len(), title, duration_ms);
                }
                MissionEvent::StepFailed { step, error, .. } => {
                    eprintln!("[{}/{}] FAILED: {}", step + 1, titles.len(), error);
                }
                MissionEvent::RunnerFallback { reason, .. } => {
                    eprintln!("[stream unavailable, running locally: {}]", reason);
                }
                MissionEvent::SyncFailed { error, .. } => {
                    eprintln!("[store sync failed: {}]", error);
                }
                MissionEvent::Completed { .. } => eprintln!("[completed]"),
                MissionEvent::Failed { reason, .. } => eprintln!("[failed: {}]", reason),
                MissionEvent::Cancelled { .. } => eprintln!("[cancelled]"),
            }
            if event.is_final() {
                break;
            }
        }
    });

    executor.start(&id).await?;
    tokio::select! {
        _ = executor.wait(&id) => {}
        _ = tokio::signal::ctrl_c() => {
            executor.cancel(&id).await?;
        }
    }
    executor.shutdown().await;
    let finished = executor.snapshot(&id).await.unwrap_or(mission);

    // The printer exits on the final event or once every bus sender is gone.
    drop(executor);
    let _ = print_handle.await;

    if finished.sub_tasks.iter().any(|t| t.status == SubTaskStatus::Failed) {
        warn!(mission_id = %id, "Mission finished with failed steps");
    }
    store
        .update_mission(workflow, &id, MissionPatch::snapshot(&finished))
        .await?;
    Ok(finished)
}
