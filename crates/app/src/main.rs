use anyhow::Context;
use casedoc_core::{
    digest_bytes, discover_case_files, CharacterNgramEmbedder, Citation, DocumentFormat,
    DocumentRegistry, Embedder, FsBlobStore, HttpEmbedder, HttpOcrEngine, HybridRetriever,
    IngestError, IngestionPipeline, LexicalIndex, MemoryIndex, NewDocument, OcrEngine,
    OcrPageText, OpenSearchStore, PipelineConfig, ProcessingStatus, QdrantStore, QueryFilters,
    RetrievalConfig, SearchQuery, VectorIndex,
};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "casedoc", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Index backend: in-process memory or remote OpenSearch + Qdrant.
    #[arg(long, value_enum, default_value = "remote")]
    backend: Backend,

    /// OpenSearch base URL (lexical index).
    #[arg(long, default_value = "http://localhost:9200", env = "CASEDOC_OPENSEARCH_URL")]
    opensearch_url: String,

    /// OpenSearch index name.
    #[arg(long, default_value = "casedoc_chunks")]
    opensearch_index: String,

    /// Qdrant base URL (dense index).
    #[arg(long, default_value = "http://localhost:6333", env = "CASEDOC_QDRANT_URL")]
    qdrant_url: String,

    /// Qdrant collection name.
    #[arg(long, default_value = "casedoc_chunks")]
    qdrant_collection: String,

    /// OCR service endpoint. Without one, OCR fallback is disabled and
    /// image-only pages stay unsearchable.
    #[arg(long, env = "CASEDOC_OCR_URL")]
    ocr_url: Option<String>,

    /// Bearer token for the OCR service.
    #[arg(long, env = "CASEDOC_OCR_API_KEY")]
    ocr_api_key: Option<String>,

    /// Remote embedding service endpoint; defaults to the offline
    /// character-ngram embedder.
    #[arg(long, env = "CASEDOC_EMBEDDING_URL")]
    embedding_url: Option<String>,

    /// Embedding model identifier (remote embedder only).
    #[arg(long, default_value = "bge-small-en-v1.5")]
    embedding_model: String,

    /// Embedding vector dimensionality.
    #[arg(long, default_value = "384")]
    embedding_dims: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Memory,
    Remote,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a case folder and ingest every supported document.
    Ingest {
        /// Folder containing client files (searched recursively).
        #[arg(long)]
        folder: String,
        /// Case the documents belong to; derived from the folder path
        /// when omitted.
        #[arg(long)]
        case_id: Option<Uuid>,
        /// Run this query against the fresh index once ingestion is done.
        #[arg(long)]
        query: Option<String>,
        /// Number of results for the post-ingest query.
        #[arg(long, default_value = "5")]
        top_k: usize,
    },
    /// Hybrid search over indexed chunks, printed with citations.
    Search {
        /// Search query.
        #[arg(long)]
        query: String,
        /// Number of results to return.
        #[arg(long, default_value = "10")]
        top_k: usize,
        /// Restrict to one case.
        #[arg(long)]
        case_id: Option<Uuid>,
        /// Restrict to documents carrying any of these tags.
        #[arg(long)]
        tag: Vec<String>,
    },
}

/// Stands in when no OCR service is configured; the pipeline's OCR config
/// is disabled alongside, so this never fires on the happy path.
struct DisabledOcr;

#[async_trait::async_trait]
impl OcrEngine for DisabledOcr {
    async fn recognize_page(
        &self,
        _source: &[u8],
        _format: DocumentFormat,
        _page_number: u32,
        _dpi: u32,
    ) -> Result<OcrPageText, IngestError> {
        Err(IngestError::OcrUnavailable)
    }
}

fn stable_uuid(input: &str) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

fn build_indexes(cli: &Cli) -> (Arc<dyn VectorIndex>, Arc<dyn LexicalIndex>) {
    match cli.backend {
        Backend::Memory => {
            let index = Arc::new(MemoryIndex::new());
            (index.clone(), index)
        }
        Backend::Remote => (
            Arc::new(QdrantStore::new(
                &cli.qdrant_url,
                &cli.qdrant_collection,
                cli.embedding_dims,
            )),
            Arc::new(OpenSearchStore::new(
                &cli.opensearch_url,
                &cli.opensearch_index,
            )),
        ),
    }
}

fn build_embedder(cli: &Cli) -> anyhow::Result<Arc<dyn Embedder>> {
    match &cli.embedding_url {
        Some(endpoint) => Ok(Arc::new(
            HttpEmbedder::new(
                endpoint,
                cli.embedding_model.clone(),
                cli.embedding_dims,
                "",
                Duration::from_secs(120),
            )
            .map_err(|error| anyhow::anyhow!(error.to_string()))?,
        )),
        None => Ok(Arc::new(CharacterNgramEmbedder::new(cli.embedding_dims))),
    }
}

fn build_ocr(cli: &Cli) -> anyhow::Result<(Arc<dyn OcrEngine>, bool)> {
    match &cli.ocr_url {
        Some(endpoint) => {
            let engine = HttpOcrEngine::new(
                endpoint,
                cli.ocr_api_key.clone(),
                Duration::from_secs(120),
            )
            .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            Ok((Arc::new(engine), true))
        }
        None => Ok((Arc::new(DisabledOcr), false)),
    }
}

fn print_citation(citation: &Citation) {
    let ocr_marker = if citation.is_ocr { " (ocr)" } else { "" };
    println!(
        "[{}] score={:.4} {} pages {}-{}{}",
        citation.rank,
        citation.relevance_score,
        citation.document_filename,
        citation.page_start,
        citation.page_end,
        ocr_marker
    );
    let preview: String = citation.snippet.chars().take(200).collect();
    println!("  {preview}");
}

async fn run_query(
    retriever: &HybridRetriever,
    text: &str,
    top_k: usize,
    filters: QueryFilters,
) -> anyhow::Result<()> {
    let query = SearchQuery {
        text: text.to_string(),
        top_k,
        filters,
    };
    let citations = retriever
        .cite(&query)
        .await
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;

    println!("query: {text}");
    if citations.is_empty() {
        println!("no matching chunks");
    }
    for citation in &citations {
        print_citation(citation);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let app_version = env!("CARGO_PKG_VERSION");
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "casedoc boot"
    );

    let registry = Arc::new(DocumentRegistry::new());
    let (vectors, lexical) = build_indexes(&cli);
    let embedder = build_embedder(&cli)?;
    let (ocr_engine, ocr_enabled) = build_ocr(&cli)?;

    let mut pipeline_config = PipelineConfig::default();
    pipeline_config.ocr.enabled = ocr_enabled;

    match &cli.command {
        Command::Ingest {
            folder,
            case_id,
            query,
            top_k,
        } => {
            let root = Path::new(folder);
            let files = discover_case_files(root);
            if files.is_empty() {
                anyhow::bail!("no supported documents found in {folder}");
            }

            let case_id = case_id.unwrap_or_else(|| stable_uuid(folder));
            let pipeline = IngestionPipeline::new(
                registry.clone(),
                Arc::new(FsBlobStore::new(root)),
                ocr_engine,
                embedder.clone(),
                vectors.clone(),
                lexical.clone(),
                pipeline_config,
            )
            .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            let mut ready = 0usize;
            let mut failed = Vec::new();

            for (path, format) in files {
                let storage_ref = path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .to_string();
                let bytes = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                let filename = path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_else(|| storage_ref.clone());

                let receipt = pipeline
                    .notify_arrived(NewDocument {
                        document_id: stable_uuid(&path.to_string_lossy()),
                        case_id,
                        filename: filename.clone(),
                        storage_ref,
                        format,
                        byte_size: bytes.len() as u64,
                        content_hash: digest_bytes(&bytes),
                        tags: Vec::new(),
                    })
                    .await;

                match receipt.status {
                    ProcessingStatus::Ready => {
                        ready += 1;
                        println!(
                            "{filename}: ready ({} pages, {} chunks{})",
                            receipt.page_count.unwrap_or(0),
                            receipt.chunk_count,
                            if receipt.is_ocr { ", ocr" } else { "" }
                        );
                    }
                    status => {
                        let reason = receipt
                            .failure_reason
                            .unwrap_or_else(|| status.to_string());
                        failed.push((filename, reason));
                    }
                }
            }

            if !failed.is_empty() {
                warn!(failed = failed.len(), "some documents did not reach ready");
                for (filename, reason) in &failed {
                    warn!(file = %filename, reason = %reason, "ingestion failed");
                }
            }
            println!(
                "{ready} documents ready, {} failed at {}",
                failed.len(),
                Utc::now().to_rfc3339()
            );

            if let Some(text) = query {
                let retriever = HybridRetriever::new(
                    registry,
                    vectors,
                    lexical,
                    embedder,
                    RetrievalConfig::default(),
                );
                run_query(&retriever, text, *top_k, QueryFilters::default()).await?;
            }
        }
        Command::Search {
            query,
            top_k,
            case_id,
            tag,
        } => {
            let retriever = HybridRetriever::new(
                registry,
                vectors,
                lexical,
                embedder,
                RetrievalConfig::default(),
            );
            let filters = QueryFilters {
                case_id: *case_id,
                document_ids: Vec::new(),
                tags: tag.clone(),
            };
            run_query(&retriever, query, *top_k, filters).await?;
        }
    }

    Ok(())
}
