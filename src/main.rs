//! # CloudOps Assistant CLI (`cloudops`)
//!
//! ## Usage
//!
//! ```bash
//! cloudops --config ./config/cloudops.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cloudops build` | Load, embed, and index the docs directory |
//! | `cloudops query "<question>"` | Answer one question and print the sources |
//! | `cloudops serve` | Start the HTTP query service |
//!
//! Logs go to stderr and honour `RUST_LOG`; answers go to stdout.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use cloudops_assistant::builder::{build_index, load_or_empty};
use cloudops_assistant::completion::{
    create_completion, fallback_answer, CompletionProvider, DisabledCompletion,
};
use cloudops_assistant::config::{load_config, Config};
use cloudops_assistant::embedding::create_provider;
use cloudops_assistant::error::QueryError;
use cloudops_assistant::models::RetrievedChunk;
use cloudops_assistant::progress::default_reporter;
use cloudops_assistant::query::{QueryOptions, QueryService};
use cloudops_assistant::server::run_server;
use cloudops_assistant::store::SharedIndex;

/// CloudOps Assistant: answers Cloud & DevOps questions from your own docs.
#[derive(Parser)]
#[command(name = "cloudops", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cloudops.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the index from the docs directory.
    ///
    /// Always a full rebuild. The previous index files are replaced only
    /// after every chunk has been embedded.
    Build,

    /// Answer a single question against the persisted index.
    Query {
        question: String,

        /// Number of chunks to retrieve (defaults to `[retrieval].top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Start the HTTP query service on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.command {
        Commands::Build => run_build(&cfg).await?,
        Commands::Query { question, top_k } => run_query(&cfg, &question, top_k).await?,
        Commands::Serve => {
            let service = query_service(&cfg)?;
            run_server(Arc::new(cfg), Arc::new(service)).await?;
        }
    }

    Ok(())
}

async fn run_build(cfg: &Config) -> anyhow::Result<()> {
    let provider = create_provider(&cfg.embedding).context("Failed to create embedding provider")?;
    let reporter = default_reporter();
    let (_, report) = build_index(cfg, provider.as_ref(), reporter.as_ref()).await?;

    println!(
        "Indexed {} chunks from {} documents ({} dims, model {}).",
        report.chunks, report.documents, report.dims, report.model
    );
    println!(
        "  changed: {}  removed: {}  elapsed: {:.2}s",
        report.changed,
        report.removed,
        report.elapsed.as_secs_f64()
    );
    println!("  written to {}", cfg.index.dir.display());
    Ok(())
}

fn query_service(cfg: &Config) -> anyhow::Result<QueryService> {
    let embedder = create_provider(&cfg.embedding).context("Failed to create embedding provider")?;
    let completer: Arc<dyn CompletionProvider> = match create_completion(&cfg.completion) {
        Ok(completer) => completer,
        Err(e) => {
            tracing::warn!(error = %e, "completion unavailable; answers will be context-only");
            Arc::new(DisabledCompletion)
        }
    };
    let kb = load_or_empty(&cfg.index.dir)?;

    if !kb.is_empty() && kb.model_name() != embedder.model_name() {
        tracing::warn!(
            index_model = kb.model_name(),
            provider_model = embedder.model_name(),
            "index was built with a different embedding model; rebuild it"
        );
    }

    Ok(QueryService::new(
        embedder,
        completer,
        SharedIndex::new(kb),
        QueryOptions::from_config(cfg),
    ))
}

async fn run_query(cfg: &Config, question: &str, top_k: Option<usize>) -> anyhow::Result<()> {
    let service = query_service(cfg)?;
    let k = top_k.unwrap_or(service.options().top_k);
    if k == 0 {
        anyhow::bail!("--top-k must be at least 1");
    }

    let (answer, retrieved) = match service.query_with_k(question, k).await {
        Ok(result) => (result.answer, result.retrieved),
        Err(QueryError::Completion { message, retrieved }) => {
            tracing::warn!(error = %message, "answering from context only");
            (fallback_answer(question.trim(), &retrieved), retrieved)
        }
        Err(e) => return Err(e.into()),
    };

    println!("{}", answer);
    print_sources(&retrieved);
    Ok(())
}

fn print_sources(retrieved: &[RetrievedChunk]) {
    if retrieved.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for r in retrieved {
        println!("  {}. [{:.3}] {}", r.rank, r.score, r.chunk.id);
    }
}
