//! `sqrl`: the command-line entry point for the memory service (§6).

mod config;

use clap::{Parser, Subcommand};
use config::ServiceConfig;
use sqrl_core::embeddings::{Embedder, MockEmbedder, RetryConfig, RetryingEmbedder};
use sqrl_core::episode::chunk_episodes;
use sqrl_core::evaluator::evaluate;
use sqrl_core::policy::load_policy;
use sqrl_core::store::{MemoryFilters, Store};
use sqrl_core::types::{Event, MemoryStatus};
use sqrl_ipc::handlers::AppState;
use sqrl_ipc::server::{shutdown_signal, IpcServer, ServerConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "sqrl")]
#[command(about = "Local-first memory service for coding agents")]
#[command(version)]
struct Cli {
    /// Enable debug-level logging regardless of RUST_LOG.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs the JSON-RPC server over a Unix domain socket.
    Serve {
        /// Overrides SQRL_SOCKET_PATH / the §6 default.
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    /// Prints the binary's version and exits.
    Version,
    /// Chunks a JSON array of events into episodes and prints them (no
    /// extractor call: the LLM step stays out of scope here).
    Extract {
        /// Path to a JSON file containing an array of events.
        events_file: PathBuf,
    },
    /// Reports memory and episode counts for a project's store.
    Status {
        #[arg(long)]
        project: Option<PathBuf>,
    },
    /// Runs the evaluator over a project's active memories and applies
    /// resulting decisions.
    Sync {
        #[arg(long)]
        project: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();
}

fn project_root(project: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    match project {
        Some(path) => Ok(path),
        None => Ok(std::env::current_dir()?),
    }
}

fn open_project_store(root: &Path) -> anyhow::Result<Store> {
    let db_path = config::project_db_path(root);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Store::open(&db_path)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Serve { socket } => run_serve(socket).await,
        Commands::Version => run_version(),
        Commands::Extract { events_file } => run_extract(&events_file),
        Commands::Status { project } => run_status(project),
        Commands::Sync { project } => run_sync(project),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        std::process::exit(1);
    }
    Ok(())
}

async fn run_serve(socket: Option<PathBuf>) -> anyhow::Result<()> {
    let service_config = ServiceConfig::from_env();
    let socket_path = socket.unwrap_or(service_config.socket_path.clone());

    let root = project_root(None)?;
    let store = Arc::new(open_project_store(&root)?);
    let policy = load_policy(Some(&root))?;

    let retry_config = RetryConfig {
        max_retries: service_config.embedding_max_retries,
        base_delay: std::time::Duration::from_secs_f64(service_config.embedding_retry_delay_secs),
        max_delay: std::time::Duration::from_secs(30),
        backoff_multiplier: service_config.embedding_retry_backoff,
    };
    let embedder: Arc<dyn Embedder> = Arc::new(RetryingEmbedder::new(
        MockEmbedder::new(service_config.embedding_dims),
        retry_config,
    ));

    let state = AppState {
        store,
        embedder: Some(embedder),
        extractor: None,
        policy,
        max_memories_per_episode: service_config.max_memories_per_episode,
    };

    let server = IpcServer::new(ServerConfig { socket_path }, state);
    server.run(shutdown_signal()).await?;
    Ok(())
}

fn run_version() -> anyhow::Result<()> {
    println!("sqrl {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}

fn run_extract(events_file: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(events_file)?;
    let events: Vec<Event> = serde_json::from_str(&raw)?;
    let episodes = chunk_episodes(None, events);
    println!("{}", serde_json::to_string_pretty(&episodes)?);
    Ok(())
}

fn run_status(project: Option<PathBuf>) -> anyhow::Result<()> {
    let root = project_root(project)?;
    let store = open_project_store(&root)?;

    let active = store.get_active_memories(&MemoryFilters::default(), u32::MAX)?;
    let provisional = active.iter().filter(|m| m.status == MemoryStatus::Provisional).count();
    let unprocessed_episodes = store.get_unprocessed_episodes(None, u32::MAX)?.len();

    println!("project: {}", root.display());
    println!("active memories: {}", active.len() - provisional);
    println!("provisional memories: {provisional}");
    println!("unprocessed episodes: {unprocessed_episodes}");
    Ok(())
}

fn run_sync(project: Option<PathBuf>) -> anyhow::Result<()> {
    let root = project_root(project)?;
    let store = open_project_store(&root)?;
    let policy = load_policy(Some(&root))?;

    let memories = store.get_active_memories(&MemoryFilters::default(), u32::MAX)?;
    let now = chrono::Utc::now();

    let mut promoted = 0;
    let mut deprecated = 0;
    let mut unchanged = 0;

    for memory in &memories {
        let Some(metrics) = store.get_metrics(memory.id)? else {
            continue;
        };
        let decision = evaluate(memory, &metrics, now, &policy);
        match decision.result {
            sqrl_core::types::EvalResult::NoChange => unchanged += 1,
            sqrl_core::types::EvalResult::Promote => promoted += 1,
            sqrl_core::types::EvalResult::Deprecate => deprecated += 1,
        }
        store.apply_decision(&decision)?;
    }

    println!("evaluated {} memories", memories.len());
    println!("promoted: {promoted}");
    println!("deprecated: {deprecated}");
    println!("unchanged: {unchanged}");
    Ok(())
}
