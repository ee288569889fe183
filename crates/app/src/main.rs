use anyhow::Context as _;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use solar_rag_core::config::EmbeddingProvider;
use solar_rag_core::{
    CharacterNgramEmbedder, ChromaStore, DocumentExtractor, Embedder, Expertise, IngestionManager,
    JsonFileDocumentStore, Metadata, OllamaEmbedder, RagPipeline, Reranker, Retriever, Settings,
    TtlCache, UserContext,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "solar-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML settings file. Falls back to SOLAR_RAG_CONFIG, then ./solar-rag.toml.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a file, or every supported file below a directory.
    Ingest {
        #[arg(long)]
        path: PathBuf,
        /// Re-index even when the file was already ingested.
        #[arg(long, default_value_t = false)]
        force: bool,
        /// Extra metadata attached to every chunk, as key=value.
        #[arg(long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
    },
    /// Show the ingestion status of a document.
    Status {
        #[arg(long)]
        document_id: String,
    },
    /// Delete a document and its chunks.
    Delete {
        #[arg(long)]
        document_id: String,
    },
    /// List every known document.
    List,
    /// Print the stored chunks of a document.
    Chunks {
        #[arg(long)]
        document_id: String,
    },
    /// Retrieve and re-rank chunks for a query.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long)]
        max_chunks: Option<usize>,
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        collection: Option<String>,
    },
    /// Assemble the grounded prompt block and citations for a query.
    Context {
        #[arg(long)]
        query: String,
        #[arg(long, value_enum, default_value_t = ExpertiseArg::Beginner)]
        expertise: ExpertiseArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExpertiseArg {
    Beginner,
    Intermediate,
    Expert,
}

impl From<ExpertiseArg> for Expertise {
    fn from(value: ExpertiseArg) -> Self {
        match value {
            ExpertiseArg::Beginner => Expertise::Beginner,
            ExpertiseArg::Intermediate => Expertise::Intermediate,
            ExpertiseArg::Expert => Expertise::Expert,
        }
    }
}

fn parse_meta(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(key, _)| !key.trim().is_empty())
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))
}

fn build_embedder(settings: &Settings) -> Arc<dyn Embedder> {
    match settings.embedding.provider {
        EmbeddingProvider::Ngram => Arc::new(CharacterNgramEmbedder::new(settings.embedding.dimensions)),
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbedder::new(settings.ollama_config())),
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        collection = %settings.retrieval.collection,
        "solar-rag boot"
    );

    let embedder = build_embedder(&settings);
    let vectors = Arc::new(ChromaStore::new(&settings.stores.chroma_url)?);
    let documents = Arc::new(
        JsonFileDocumentStore::open(settings.stores.documents_path.clone())
            .await
            .with_context(|| format!("opening {}", settings.stores.documents_path.display()))?,
    );
    let cache = Arc::new(TtlCache::new(settings.cache.capacity));

    let manager = IngestionManager::new(
        DocumentExtractor::new(settings.extractor_config()),
        embedder.clone(),
        vectors.clone(),
        documents,
        settings.ingestion_config(),
    )
    .with_cache(cache.clone());

    let pipeline = RagPipeline::new(
        Retriever::new(embedder, vectors, settings.retrieval.clone()).with_cache(cache),
        Reranker::new(settings.rerank),
        settings.context,
    );

    match cli.command {
        Command::Ingest { path, force, meta } => {
            let metadata: Metadata = meta
                .into_iter()
                .map(|(key, value)| (key, Value::from(value)))
                .collect();

            if Path::new(&path).is_dir() {
                let report = manager.ingest_directory(&path, metadata, force).await?;
                print_json(&report)?;
            } else {
                let result = manager.ingest_document(&path, metadata, force).await?;
                print_json(&result)?;
            }
        }
        Command::Status { document_id } => {
            print_json(&manager.get_document_status(&document_id).await)?;
        }
        Command::Delete { document_id } => {
            print_json(&manager.delete_document(&document_id).await)?;
        }
        Command::List => {
            print_json(&manager.list_documents().await)?;
        }
        Command::Chunks { document_id } => {
            print_json(&manager.get_document_chunks(&document_id).await)?;
        }
        Command::Search {
            query,
            max_chunks,
            threshold,
            collection,
        } => {
            let collection = collection.unwrap_or_else(|| settings.retrieval.collection.clone());
            let max_chunks = max_chunks.unwrap_or(settings.retrieval.max_chunks);
            let threshold = threshold.unwrap_or(settings.retrieval.similarity_threshold);

            let chunks = pipeline
                .retrieve_relevant_chunks(&query, &collection, max_chunks, threshold)
                .await;

            println!("query: {query}");
            for chunk in chunks {
                println!(
                    "[{}] score={:.4} similarity={:.4} chunk={} source={}",
                    chunk.rank,
                    chunk.rerank_score.unwrap_or(chunk.similarity),
                    chunk.similarity,
                    chunk.chunk_id,
                    chunk.source().unwrap_or("unknown"),
                );
                println!("  chunk_text:\n{}", chunk.text);
            }
        }
        Command::Context { query, expertise } => {
            let user = UserContext {
                expertise: expertise.into(),
            };
            let prepared = pipeline.prepare_context(&query, Some(&user)).await;

            println!(
                "processed_query: {} (max_chunks={} threshold={:.2})",
                prepared.processed_query, prepared.params.max_chunks, prepared.params.similarity_threshold
            );
            println!("{}", prepared.prompt.system);
            print!("{}", prepared.citations);
        }
    }

    Ok(())
}
