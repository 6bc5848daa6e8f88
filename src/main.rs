use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use versepipe::config::{Config, EmbeddingProvider};
use versepipe::embedding::{
    EmbeddingCache, EmbeddingClient, EmbeddingService, HashingEmbeddingClient, OllamaClient,
};
use versepipe::logging;
use versepipe::metrics::PipelineMetrics;
use versepipe::pipeline::stages::default_stages;
use versepipe::pipeline::{
    Collection, CollectionConfig, PipelineOrchestrator, PipelineResult, RunControl, RunOptions,
};
use versepipe::store::{ArtifactStore, CollectionManager};

#[derive(Parser)]
#[command(name = "versepipe", about = "Ingest, clean, embed and index document collections")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a collection from a JSON config file.
    Register { config: PathBuf },
    /// Run the pipeline for a registered collection.
    Run {
        name: String,
        /// Continue after the last completed stage of the previous run.
        #[arg(long)]
        resume: bool,
    },
    /// Show a collection's state and its latest run.
    Status { name: String },
    /// List registered collections.
    List,
}

#[derive(Serialize)]
struct StatusReport {
    collection: Collection,
    latest_result: Option<PipelineResult>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    logging::init_tracing();
    let config = Config::load().context("failed to load configuration")?;

    let store = Arc::new(ArtifactStore::new(&config.artifact_dir, &config.temp_dir));
    let manager = CollectionManager::new(Arc::clone(&store));

    match cli.command {
        Command::Register { config: path } => {
            let collection_config = read_collection_config(&path, &config).await?;
            let collection = manager
                .register(&collection_config)
                .await
                .with_context(|| format!("failed to register {}", collection_config.name))?;
            print_json(&collection)
        }
        Command::Run { name, resume } => {
            let result = run_collection(&config, store, manager, &name, resume).await?;
            print_json(&result)?;
            if !result.status.is_success() {
                bail!("run {} finished with status {}", result.run_id, result.status);
            }
            Ok(())
        }
        Command::Status { name } => {
            let report = StatusReport {
                collection: manager.load_collection(&name).await?,
                latest_result: manager.latest_result(&name).await?,
            };
            print_json(&report)
        }
        Command::List => {
            for name in manager.list().await? {
                println!("{name}");
            }
            Ok(())
        }
    }
}

async fn read_collection_config(path: &Path, config: &Config) -> Result<CollectionConfig> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut collection_config: CollectionConfig = serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    if collection_config.embedding_model.trim().is_empty() {
        collection_config.embedding_model = config.embedding_model.clone();
    }
    Ok(collection_config)
}

async fn run_collection(
    config: &Config,
    store: Arc<ArtifactStore>,
    manager: CollectionManager,
    name: &str,
    resume: bool,
) -> Result<PipelineResult> {
    let collection_config = manager
        .load_config(name)
        .await
        .with_context(|| format!("collection {name} is not registered"))?;

    let cache_path = store.embedding_cache_path();
    let cache = Arc::new(EmbeddingCache::load(&cache_path).await?);
    let service = Arc::new(EmbeddingService::new(
        build_client(config)?,
        Arc::clone(&cache),
        config.embedding_settings(),
    ));

    let metrics = Arc::new(PipelineMetrics::new());
    let orchestrator = PipelineOrchestrator::new(
        default_stages(config.stage_settings(), Arc::clone(&service)),
        manager,
        config.orchestrator_settings(),
        Arc::clone(&metrics),
    )?;

    let control = RunControl::new();
    let signal_control = control.clone();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; cancelling after the current stage");
            signal_control.cancel();
        }
    });

    let outcome = orchestrator
        .run(&collection_config, RunOptions { resume, control })
        .await;
    signal.abort();

    if let Err(err) = cache.save(&cache_path).await {
        tracing::warn!(error = %err, "Failed to persist embedding cache");
    }

    let result = outcome?;
    let stats = service.stats();
    tracing::info!(
        run_id = %result.run_id,
        status = %result.status,
        cache_hits = stats.cache_hits,
        cache_misses = stats.cache_misses,
        metrics = ?metrics.snapshot(),
        "Run finished"
    );
    Ok(result)
}

fn build_client(config: &Config) -> Result<Arc<dyn EmbeddingClient>> {
    let client: Arc<dyn EmbeddingClient> = match config.embedding_provider {
        EmbeddingProvider::Hashing => {
            Arc::new(HashingEmbeddingClient::new(config.embedding_dimension))
        }
        EmbeddingProvider::Ollama => Arc::new(
            OllamaClient::new(&config.ollama_url, config.embedding_timeout)
                .context("failed to build Ollama client")?,
        ),
    };
    Ok(client)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
