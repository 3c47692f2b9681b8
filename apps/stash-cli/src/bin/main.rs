use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use stash_core::config::{Config, Settings};
use stash_core::traits::Embedder;
use stash_embed::embedder_from_settings;
use stash_hybrid::{EngineOptions, HybridSearchEngine, IndexReport, IndexingPipeline, SearchRequest};
use stash_text::{TantivyIndexer, TantivyKeywordRetriever};
use stash_vector::{open_db, LanceDbIndexer, LanceVectorRetriever};

/// Hybrid keyword + semantic search over analysed items
#[derive(Parser, Debug)]
#[command(name = "stash")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Directory holding config.toml and its environment overlays
    #[arg(long, global = true, default_value = ".", env = "STASH_CONFIG_DIR")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index analysis records from a .jsonl/.json file or a directory of them
    Ingest {
        path: PathBuf,
    },
    /// Run a hybrid search
    Query(QueryArgs),
}

#[derive(clap::Args, Debug)]
struct QueryArgs {
    query: String,
    #[arg(long)]
    tenant: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    top_k: Option<usize>,
    /// Minimum BM25 score of the best keyword hit
    #[arg(long)]
    min_relevance: Option<f32>,
    /// Minimum cosine similarity in [0, 1] per vector hit
    #[arg(long)]
    min_similarity: Option<f32>,
    #[arg(long)]
    weight_keyword: Option<f32>,
    #[arg(long)]
    weight_vector: Option<f32>,
    #[arg(long)]
    rank_offset: Option<f32>,
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Config::load_from(&args.config_dir).context("loading configuration")?;
    let settings = config.settings().context("invalid configuration")?;
    let embedder = embedder_from_settings(&settings.embedding, config.base_dir()).context("initializing embedding provider")?;
    info!(embedder = embedder.id(), dim = embedder.dim(), "embedding provider ready");

    match args.command {
        Command::Ingest { path } => ingest(&config, &settings, embedder, &path).await,
        Command::Query(query) => run_query(&config, &settings, embedder, query).await,
    }
}

async fn ingest(config: &Config, settings: &Settings, embedder: Arc<dyn Embedder>, path: &Path) -> anyhow::Result<()> {
    let files = collect_input_files(path)?;
    if files.is_empty() {
        bail!("no .jsonl or .json files under {}", path.display());
    }

    let text_dir = settings.storage.text_index_path(config.base_dir());
    let text = TantivyIndexer::open_or_create(&text_dir).with_context(|| format!("opening text index {}", text_dir.display()))?;
    let db_path = settings.storage.vector_db_path(config.base_dir());
    fs::create_dir_all(&db_path)?;
    let conn = open_db(&db_path.to_string_lossy()).await?;
    let vector = LanceDbIndexer::open(conn, &settings.storage.vector_table, embedder.dim()).await?;
    let pipeline = IndexingPipeline::new(text, vector, embedder, settings.indexing.policy);

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} files {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let mut total = IndexReport::default();
    for file in &files {
        pb.set_message(file.display().to_string());
        let (values, unreadable) = read_records(file)?;
        total.skipped_malformed += unreadable;
        for batch in values.chunks(settings.indexing.batch_size.max(1)) {
            let report = pipeline.index_values(batch.to_vec()).await?;
            total.merge(report);
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    println!(
        "Indexed {} items from {} files ({} malformed, {} empty, {} superseded)",
        total.indexed,
        files.len(),
        total.skipped_malformed,
        total.skipped_empty,
        total.superseded
    );
    Ok(())
}

async fn run_query(config: &Config, settings: &Settings, embedder: Arc<dyn Embedder>, args: QueryArgs) -> anyhow::Result<()> {
    let text_dir = settings.storage.text_index_path(config.base_dir());
    let keyword = TantivyKeywordRetriever::open(&text_dir)
        .with_context(|| format!("opening text index {} (run `stash ingest` first)", text_dir.display()))?;
    let conn = open_db(&settings.storage.vector_db_path(config.base_dir()).to_string_lossy()).await?;
    let vector = LanceVectorRetriever::open(conn, &settings.storage.vector_table, embedder).await?;
    let engine = HybridSearchEngine::new(keyword, vector, EngineOptions::from_settings(&settings.search));

    let request = SearchRequest {
        query: args.query,
        tenant_id: args.tenant,
        category: args.category,
        top_k: args.top_k,
        min_relevance_score: args.min_relevance,
        min_similarity_score: args.min_similarity,
        weight_keyword: args.weight_keyword,
        weight_vector: args.weight_vector,
        rank_offset_constant: args.rank_offset,
        per_source_fetch_k: None,
    };
    let results = engine.search(&request).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if let Some(source) = results.degraded {
        println!("(degraded: {source} retriever unavailable)");
    }
    if results.hits.is_empty() {
        println!("No results.");
    }
    for (rank, hit) in results.hits.iter().enumerate() {
        println!("{:>3}. {:<40} {:.5}", rank + 1, hit.item_id, hit.score);
    }
    Ok(())
}

fn is_record_file(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("jsonl" | "json"))
}

/// A single file, or every record file under a directory in path order.
fn collect_input_files(path: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        bail!("{} does not exist", path.display());
    }
    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_record_file(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    Ok(files)
}

/// Raw JSON values from one file plus the number of lines that were not JSON.
///
/// `.jsonl` holds one record per line; `.json` holds one record or an array.
fn read_records(path: &Path) -> anyhow::Result<(Vec<serde_json::Value>, usize)> {
    let content = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        return match serde_json::from_str::<serde_json::Value>(&content) {
            Ok(serde_json::Value::Array(items)) => Ok((items, 0)),
            Ok(value) => Ok((vec![value], 0)),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping unparsable file");
                Ok((Vec::new(), 1))
            }
        };
    }
    let mut values = Vec::new();
    let mut unreadable = 0usize;
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(value) => values.push(value),
            Err(e) => {
                warn!(file = %path.display(), line = line_no + 1, error = %e, "skipping unparsable line");
                unreadable += 1;
            }
        }
    }
    Ok((values, unreadable))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonl_lines_are_read_and_bad_lines_counted() {
        let tmp = tempfile::tempdir().expect("tmp");
        let file = tmp.path().join("batch.jsonl");
        fs::write(&file, "{\"item_id\":\"a\"}\n\nnot json\n{\"item_id\":\"b\"}\n").expect("write");
        let (values, unreadable) = read_records(&file).expect("read");
        assert_eq!(values.len(), 2);
        assert_eq!(unreadable, 1);
    }

    #[test]
    fn json_arrays_expand_to_records() {
        let tmp = tempfile::tempdir().expect("tmp");
        let file = tmp.path().join("batch.json");
        fs::write(&file, "[{\"item_id\":\"a\"},{\"item_id\":\"b\"}]").expect("write");
        assert_eq!(read_records(&file).expect("read").0.len(), 2);
    }

    #[test]
    fn directories_are_walked_for_record_files() {
        let tmp = tempfile::tempdir().expect("tmp");
        fs::create_dir_all(tmp.path().join("nested")).expect("mkdir");
        fs::write(tmp.path().join("b.jsonl"), "").expect("write");
        fs::write(tmp.path().join("nested/a.json"), "{}").expect("write");
        fs::write(tmp.path().join("notes.txt"), "").expect("write");
        let files = collect_input_files(tmp.path()).expect("collect");
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| is_record_file(f)));
    }
}
