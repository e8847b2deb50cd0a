use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use cache::{SerialStore, ValidatedCache};
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};

use rtr_server::{ServerConfig, apply_export, load_export, run_source_task, start_server};

#[derive(Parser)]
#[command(author, version, about = "RPKI-to-Router cache server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve validated data to routers.
    Run(RunArgs),
    /// Parse a JSON export and print what it contains.
    CheckSource {
        /// Path to the export file
        #[arg(long)]
        path: PathBuf,
    },
}

#[derive(Args, Clone, Debug, Default)]
struct RunArgs {
    /// Optional path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to accept router connections on (overrides config file).
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// JSON export to load validated data from (overrides config file).
    #[arg(long)]
    source: Option<PathBuf>,

    /// Number of deltas kept for incremental updates (overrides config file).
    #[arg(long)]
    history_depth: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_server(args).await?,
        Commands::CheckSource { path } => {
            let sets = load_export(&path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            for (trust_anchor, set) in &sets {
                info!(
                    trust_anchor = %trust_anchor,
                    roa_prefixes = set.route_origins.len(),
                    router_certificates = set.router_certificates.len(),
                    "trust anchor"
                );
            }
        }
    }
    Ok(())
}

async fn run_server(args: RunArgs) -> anyhow::Result<()> {
    let mut config = ServerConfig::load(args.config.as_deref())?;

    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(source) = args.source {
        config.source_path = Some(source);
    }
    if let Some(depth) = args.history_depth {
        config.history_depth = depth;
    }

    let store = Arc::new(SerialStore::new(config.history_depth));
    let cache = Arc::new(ValidatedCache::new(Arc::clone(&store)));

    let source_task = match &config.source_path {
        Some(path) => {
            match load_export(path) {
                Ok(sets) => {
                    let summary = apply_export(&cache, sets);
                    info!(
                        path = %path.display(),
                        trust_anchors = summary.updated,
                        "loaded initial source"
                    );
                }
                Err(err) => warn!(path = %path.display(), error = %err, "initial source load failed"),
            }
            Some(tokio::spawn(run_source_task(
                Arc::clone(&cache),
                path.clone(),
                config.source_reload_interval,
            )))
        }
        None => {
            warn!("no source configured, routers will receive no data");
            None
        }
    };

    let server = start_server(&config, Arc::clone(&cache)).await?;
    info!(
        rtr = %server.local_addr(),
        session_id = store.current_session_id(),
        "cache server started"
    );

    signal::ctrl_c().await?;
    info!("shutdown signal received");

    server.shutdown();
    if let Some(task) = source_task {
        task.abort();
    }
    Ok(())
}
