//! docqa - retrieve context passages from documents and manage the vector store.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use docqa_core::config::{Config, Settings};
use docqa_core::source::FileSource;
use docqa_core::{ChunkingConfig, DocumentSource, Filter, Health, MetaValue, Metadata, VectorStore};
use docqa_embed::embedder_from_settings;
use docqa_engine::{IngestRequest, QueryEngine, StoreQuery};
use docqa_vector::store_from_settings;

#[derive(Parser, Debug)]
#[command(name = "docqa")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Best matching passages of one document for each question
    Retrieve {
        /// Plain-text document
        file: PathBuf,
        /// Question to answer from the document (repeatable)
        #[arg(short, long = "question", required = true)]
        questions: Vec<String>,
        #[arg(long)]
        chunk_size: Option<usize>,
        #[arg(long)]
        overlap: Option<usize>,
        /// Passages per question
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Chunk, embed and store every .txt file under a directory
    Ingest {
        dir: PathBuf,
        /// Target collection (defaults to store.collection)
        #[arg(long)]
        collection: Option<String>,
    },
    /// Similarity search over the stored collection
    Search {
        query: String,
        #[arg(long, default_value_t = 5)]
        top_k: usize,
        /// Metadata condition `field=value` (repeatable)
        #[arg(long = "filter")]
        filters: Vec<String>,
        #[arg(long)]
        collection: Option<String>,
    },
    /// Check that the vector store is reachable
    Health,
}

fn progress(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files ({percent}%) {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

fn engine(settings: &Settings, retrieval: docqa_core::config::RetrievalConfig) -> Result<QueryEngine> {
    let embedder = embedder_from_settings(&settings.embed)?;
    Ok(QueryEngine::new(embedder, retrieval)?.with_store_metric(settings.store.metric))
}

async fn retrieve(
    settings: &Settings,
    file: &Path,
    questions: Vec<String>,
    chunking: ChunkingConfig,
    top_k: usize,
    json: bool,
) -> Result<()> {
    let text = FileSource::new()
        .fetch(&file.to_string_lossy())
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let mut retrieval = settings.retrieval.clone();
    retrieval.chunking = chunking;
    retrieval.top_k = top_k;
    let engine = engine(settings, retrieval)?;
    let hits = engine.retrieve(&text, &questions).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }
    for (question, hits) in questions.iter().zip(&hits) {
        println!("Q: {question}");
        if hits.is_empty() {
            println!("   (no context)");
        }
        for hit in hits {
            println!("   [{}] {:.4}  {}", hit.chunk_index, hit.distance, hit.text);
        }
    }
    Ok(())
}

async fn ingest(settings: &Settings, base: &Path, dir: &Path, collection: &str) -> Result<()> {
    let files = FileSource::list_txt_files(dir);
    if files.is_empty() {
        println!("No .txt files under {}", dir.display());
        return Ok(());
    }
    let store = store_from_settings(&settings.store, base).await?;
    let engine = engine(settings, settings.retrieval.clone())?;
    let source = FileSource::new();
    let pb = progress(files.len() as u64);
    let mut total = 0usize;
    for path in &files {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        pb.set_message(name.clone());
        let text = source.fetch(&path.to_string_lossy()).await?;
        let mut metadata = Metadata::new();
        metadata.insert("filename".into(), MetaValue::Str(name));
        let request = IngestRequest { source_document_id: path.to_string_lossy().into_owned(), text, metadata };
        total += engine.ingest(&store, collection, request).await?.len();
        pb.inc(1);
    }
    pb.finish_with_message("done");
    println!("Ingested {} files into '{collection}' ({total} chunks)", files.len());
    Ok(())
}

async fn search(
    settings: &Settings,
    base: &Path,
    query: String,
    top_k: usize,
    filters: &[String],
    collection: &str,
    json: bool,
) -> Result<()> {
    let filter = Filter::parse_pairs(filters)?;
    let store = store_from_settings(&settings.store, base).await?;
    let engine = engine(settings, settings.retrieval.clone())?;
    let query = StoreQuery { text: query, top_k, filter: (!filter.is_empty()).then_some(filter) };
    let results = engine.search_store(&store, collection, query).await?;
    if json {
        let rows: Vec<serde_json::Value> = results
            .iter()
            .map(|r| serde_json::json!({ "id": r.chunk_id, "score": r.score, "text": r.text, "metadata": r.metadata }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    println!("Found {} results", results.len());
    for (i, r) in results.iter().enumerate() {
        let filename = r.metadata.get("filename").map(ToString::to_string).unwrap_or_default();
        println!("{}. [{:.4}] {} ({})", i + 1, r.score, r.text, filename);
    }
    Ok(())
}

async fn health(settings: &Settings, base: &Path) -> Result<()> {
    let store = store_from_settings(&settings.store, base).await?;
    match store.health().await {
        Health::Healthy => {
            println!("store at {} is healthy", store.uri());
            Ok(())
        }
        Health::Unhealthy(reason) => bail!("store at {} is unhealthy: {reason}", store.uri()),
        Health::Unreachable(reason) => bail!("store at {} is unreachable: {reason}", store.uri()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;
    let settings = config.settings()?;
    let base = std::env::current_dir()?;
    tracing::debug!(?settings, "loaded configuration");

    match cli.command {
        Commands::Retrieve { file, questions, chunk_size, overlap, top_k } => {
            let defaults = settings.retrieval.chunking;
            let chunking = ChunkingConfig::new(
                chunk_size.unwrap_or(defaults.chunk_size),
                overlap.unwrap_or(defaults.overlap),
            );
            let top_k = top_k.unwrap_or(settings.retrieval.top_k);
            retrieve(&settings, &file, questions, chunking, top_k, cli.json).await
        }
        Commands::Ingest { dir, collection } => {
            let collection = collection.unwrap_or_else(|| settings.store.collection.clone());
            ingest(&settings, &base, &dir, &collection).await
        }
        Commands::Search { query, top_k, filters, collection } => {
            let collection = collection.unwrap_or_else(|| settings.store.collection.clone());
            search(&settings, &base, query, top_k, &filters, &collection, cli.json).await
        }
        Commands::Health => health(&settings, &base).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repeated_questions_and_filters() {
        let cli = Cli::parse_from(["docqa", "retrieve", "policy.txt", "-q", "What is the deductible?", "-q", "When?"]);
        match cli.command {
            Commands::Retrieve { questions, top_k, .. } => {
                assert_eq!(questions.len(), 2);
                assert_eq!(top_k, None);
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::parse_from(["docqa", "--json", "search", "deductible", "--filter", "filename=policy.pdf"]);
        assert!(cli.json);
        match cli.command {
            Commands::Search { filters, top_k, .. } => {
                assert_eq!(filters, vec!["filename=policy.pdf".to_string()]);
                assert_eq!(top_k, 5);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
