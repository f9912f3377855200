use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use pdf_chat_core::{
    ingest_path, Answer, CharacterNgramEmbedder, ChatCompletionSynthesizer, Embedder,
    EmbedderBackend, EmbeddingEndpointConfig, FlatIndex, HttpEmbedder, IndexBackend,
    PipelineOptions, QdrantStore, Retrieval, RetrievalPipeline, SearchError, SynthesizerConfig,
    VectorIndex, NO_RELEVANT_INFORMATION,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type Pipeline = RetrievalPipeline<IndexBackend, EmbedderBackend, ChatCompletionSynthesizer>;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum IndexKind {
    /// Local flat index persisted under --index-dir.
    Flat,
    /// Remote Qdrant collection.
    Qdrant,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EmbedderKind {
    /// Offline character-trigram embedder.
    Ngram,
    /// OpenAI-compatible /embeddings endpoint.
    Http,
}

#[derive(Parser)]
#[command(name = "pdf-chat", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Vector index backend
    #[arg(long, value_enum, default_value = "flat", env = "INDEX_BACKEND")]
    index_backend: IndexKind,

    /// Directory holding the flat index snapshot
    #[arg(long, default_value = "./pdf_data", env = "INDEX_DIR")]
    index_dir: PathBuf,

    /// Qdrant base URL
    #[arg(long, default_value = "http://localhost:6333", env = "QDRANT_URL")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, default_value = "pdf_documents", env = "QDRANT_COLLECTION")]
    collection: String,

    /// Embedding backend
    #[arg(long, value_enum, default_value = "ngram", env = "EMBEDDER")]
    embedder: EmbedderKind,

    /// Request timeout for embedding, LLM and Qdrant calls
    #[arg(long, default_value = "30", env = "REQUEST_TIMEOUT_SECS")]
    timeout_secs: u64,

    /// Maximum characters per chunk
    #[arg(long, default_value = "1000", env = "CHUNK_MAX_CHARS")]
    chunk_max_chars: usize,

    /// Characters shared by consecutive chunks
    #[arg(long, default_value = "100", env = "CHUNK_OVERLAP_CHARS")]
    chunk_overlap_chars: usize,

    /// Chunks retrieved per query
    #[arg(long, default_value = "5", env = "TOP_K")]
    top_k: usize,

    /// Characters kept from each retrieved chunk
    #[arg(long, default_value = "500", env = "MAX_CHUNK_CHARS")]
    max_chunk_chars: usize,

    /// Token budget for a prompt sent to the LLM
    #[arg(long, default_value = "6000", env = "MAX_PROMPT_TOKENS")]
    max_prompt_tokens: usize,
}

impl Cli {
    fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            chunk_max_chars: self.chunk_max_chars,
            chunk_overlap_chars: self.chunk_overlap_chars,
            top_k: self.top_k,
            max_chunk_chars: self.max_chunk_chars,
            max_prompt_tokens: self.max_prompt_tokens,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a PDF, or every PDF below a folder, and persist the index.
    Ingest {
        /// PDF file or folder that contains PDFs recursively.
        path: PathBuf,
    },
    /// Print the context retrieved for a query.
    Search {
        /// Search query
        query: String,
        /// Number of chunks to retrieve; overrides the global --top-k.
        #[arg(long = "limit")]
        limit: Option<usize>,
        /// Characters kept from each retrieved chunk; overrides the global --max-chunk-chars.
        #[arg(long = "chunk-chars")]
        chunk_chars: Option<usize>,
    },
    /// Answer a question from the indexed documents.
    Ask {
        /// Question to answer
        query: String,
        /// Send the question to the LLM without retrieved context.
        #[arg(long, default_value_t = false)]
        no_context: bool,
    },
}

fn build_embedder(cli: &Cli, timeout: Duration) -> anyhow::Result<EmbedderBackend> {
    let embedder = match cli.embedder {
        EmbedderKind::Ngram => EmbedderBackend::Ngram(CharacterNgramEmbedder::default()),
        EmbedderKind::Http => {
            let config = EmbeddingEndpointConfig {
                timeout,
                ..EmbeddingEndpointConfig::from_env()
            };
            EmbedderBackend::Http(HttpEmbedder::new(config)?)
        }
    };
    Ok(embedder)
}

async fn open_index(cli: &Cli, dimensions: usize, timeout: Duration) -> anyhow::Result<IndexBackend> {
    let index = match cli.index_backend {
        IndexKind::Flat => IndexBackend::Flat(FlatIndex::with_snapshot_dir(&cli.index_dir)),
        IndexKind::Qdrant => IndexBackend::Qdrant(QdrantStore::with_timeout(
            &cli.qdrant_url,
            &cli.collection,
            dimensions,
            timeout,
        )?),
    };
    index.load().await?;
    Ok(index)
}

async fn build_pipeline(cli: &Cli) -> anyhow::Result<Pipeline> {
    cli.pipeline_options().validate()?;

    let timeout = Duration::from_secs(cli.timeout_secs);
    let embedder = build_embedder(cli, timeout)?;
    let index = open_index(cli, embedder.dimensions(), timeout).await?;
    let synthesizer = ChatCompletionSynthesizer::new(SynthesizerConfig {
        timeout,
        ..SynthesizerConfig::from_env()
    })?;
    info!(
        model = synthesizer.model(),
        dimensions = embedder.dimensions(),
        "pipeline configured"
    );

    Ok(RetrievalPipeline::with_options(
        index,
        embedder,
        synthesizer,
        cli.pipeline_options(),
    )?)
}

fn report_search_error(error: SearchError) -> anyhow::Result<()> {
    match error {
        SearchError::TokenBudgetExceeded { tokens, max_tokens } => {
            println!(
                "The retrieved context is too large (at least {tokens} tokens, limit {max_tokens}). \
                 Please narrow your query."
            );
            Ok(())
        }
        SearchError::Synthesis(error) => {
            println!("{error}");
            Ok(())
        }
        other => Err(other.into()),
    }
}

async fn run_ingest(pipeline: &Pipeline, path: &Path) -> anyhow::Result<()> {
    let report = ingest_path(pipeline, path).await?;

    for skipped in &report.skipped_files {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
    }

    pipeline.persist().await?;

    for document in &report.documents {
        println!(
            "{}: {} chunks ingested at {}",
            document.document_name,
            document.chunk_count,
            document.ingested_at.to_rfc3339()
        );
    }
    if report.documents.is_empty() {
        println!("0 documents ingested (all files were skipped)");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-chat boot"
    );

    let pipeline = build_pipeline(&cli).await?;

    match &cli.command {
        Command::Ingest { path } => run_ingest(&pipeline, path).await?,
        Command::Search {
            query,
            limit,
            chunk_chars,
        } => {
            let top_k = limit.unwrap_or(pipeline.options().top_k);
            let max_chunk_chars = chunk_chars.unwrap_or(pipeline.options().max_chunk_chars);
            match pipeline.retrieve_with(query, top_k, max_chunk_chars).await {
                Ok(Retrieval::Context { text, hits }) => {
                    for hit in &hits {
                        println!(
                            "score={:.4} chunk={} document={}",
                            hit.score, hit.entry.id, hit.entry.metadata.document_name
                        );
                    }
                    println!("\n{text}");
                }
                Ok(empty @ Retrieval::NoRelevantInformation) => println!("{}", empty.text()),
                Err(error) => report_search_error(error)?,
            }
        }
        Command::Ask { query, no_context } => {
            let result = if *no_context {
                pipeline.ask_direct(query).await
            } else {
                pipeline.answer(query).await.map(|answer| match answer {
                    Answer::Synthesized(text) => text,
                    Answer::NoRelevantInformation => NO_RELEVANT_INFORMATION.to_string(),
                })
            };

            match result {
                Ok(text) => println!("{text}"),
                Err(error) => report_search_error(error)?,
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdf_chat_core::IngestError;

    #[test]
    fn defaults_match_pipeline_defaults() {
        let cli = Cli::try_parse_from(["pdf-chat", "search", "pump"]).unwrap();
        assert_eq!(cli.pipeline_options(), PipelineOptions::default());
    }

    #[test]
    fn chunking_flags_reach_validation() {
        let cli = Cli::try_parse_from([
            "pdf-chat",
            "--chunk-max-chars",
            "200",
            "--chunk-overlap-chars",
            "200",
            "ingest",
            "docs",
        ])
        .unwrap();

        assert!(matches!(
            cli.pipeline_options().validate(),
            Err(IngestError::InvalidChunkConfig(_))
        ));
    }

    #[test]
    fn search_overrides_are_optional() {
        let cli = Cli::try_parse_from(["pdf-chat", "--top-k", "3", "search", "pump", "--limit", "7"])
            .unwrap();

        assert_eq!(cli.pipeline_options().top_k, 3);
        match cli.command {
            Command::Search {
                limit, chunk_chars, ..
            } => {
                assert_eq!(limit, Some(7));
                assert_eq!(chunk_chars, None);
            }
            _ => panic!("expected search"),
        }
    }
}
