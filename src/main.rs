//! model-verifier — checks which configured LLM models work and scores them.
//!
//! `run` performs one verification pass and stores every result; the
//! other subcommands read the store.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use model_verifier::config::{default_config_path, Config};
use model_verifier::{
    AdapterRegistry, MetadataCatalog, ModelRef, ResultStore, SqliteStore, VerificationExecutor,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file. Defaults to ~/.model-verifier/config.yaml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover, probe and score every active provider once.
    Run,
    /// Models whose latest score lies in [min, max], best first.
    Scores {
        #[arg(long, default_value_t = 0.0)]
        min: f64,
        #[arg(long, default_value_t = 10.0)]
        max: f64,
    },
    /// Latest verification result and score for one model.
    Latest { provider: String, model: String },
    /// Configured providers and whether they are active.
    Providers,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "model_verifier=info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let config_path = match args.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    match args.command {
        Command::Run => run(&config).await,
        Command::Scores { min, max } => scores(&config, min, max),
        Command::Latest { provider, model } => latest(&config, ModelRef::new(provider, model)),
        Command::Providers => providers(&config),
    }
}

fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let db_path = config.database_path()?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory {}", parent.display()))?;
    }
    let store = SqliteStore::open(&db_path).context("Failed to open result store")?;
    Ok(Arc::new(store))
}

async fn run(config: &Config) -> Result<()> {
    info!("📡 model-verifier v{}", env!("CARGO_PKG_VERSION"));

    let catalog = Arc::new(config.build_catalog()?);
    if catalog.active().next().is_none() {
        warn!("No active providers — nothing to verify");
        return Ok(());
    }

    let metadata = match &config.metadata_file {
        Some(path) => MetadataCatalog::load(path).context("Failed to load model metadata")?,
        None => MetadataCatalog::empty(),
    };
    info!(entries = metadata.len(), "Model metadata loaded");

    let store = open_store(config)?;
    let executor = VerificationExecutor::new(catalog, Arc::new(AdapterRegistry::with_defaults()), store)
        .with_metadata(Arc::new(metadata))
        .with_probe_options(config.probe_options())
        .with_max_concurrent_providers(config.max_concurrent_providers);

    // ── Ctrl-C ──────────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted — cancelling run");
            on_signal.cancel();
        }
    });

    let summary = executor.run(&cancel).await;
    if summary.cancelled {
        anyhow::bail!("run {} cancelled", summary.run_id);
    }
    Ok(())
}

fn scores(config: &Config, min: f64, max: f64) -> Result<()> {
    let store = open_store(config)?;
    for scored in store.list_models_by_score_range(min, max)? {
        println!(
            "{:>5.1}  {:<50} {}",
            scored.score.overall_score,
            scored.score.model.to_string(),
            if scored.model.is_active { "" } else { "(inactive)" }
        );
    }
    Ok(())
}

fn latest(config: &Config, model: ModelRef) -> Result<()> {
    let store = open_store(config)?;
    let Some(stored) = store.latest_result(&model)? else {
        anyhow::bail!("no verification results for {}", model);
    };
    let score = store.latest_score(&model)?;
    let out = serde_json::json!({
        "seq": stored.seq,
        "result": stored.result,
        "score": score,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn providers(config: &Config) -> Result<()> {
    let catalog = config.build_catalog()?;
    for provider in catalog.all() {
        println!(
            "{:<20} {:<10} {:<8} {}",
            provider.id,
            provider.family.as_str(),
            if provider.is_active { "active" } else { "inactive" },
            provider.base_url
        );
    }
    Ok(())
}
