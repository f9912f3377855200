pub mod budget;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod retry;
pub mod stores;
pub mod synthesizer;
pub mod traits;

pub use budget::{count_tokens, estimate_token_count, TokenBudget};
pub use chunking::{build_chunks, split_text, ChunkingConfig};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, EmbedderBackend, EmbeddingEndpointConfig, HttpEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{EmbeddingError, IndexError, IngestError, SearchError, SynthesisError};
pub use extractor::{LopdfExtractor, PageText, PdfExtractor};
pub use ingest::{discover_pdf_files, ingest_file, ingest_path, IngestionReport, SkippedPdf};
pub use models::{
    chunk_id, Answer, DocumentSummary, EntryMetadata, IndexEntry, PdfChunk, PipelineOptions,
    QueryHit, Retrieval, NO_RELEVANT_INFORMATION,
};
pub use orchestrator::{build_prompt, RetrievalPipeline};
pub use retry::RetryPolicy;
pub use stores::{FlatIndex, IndexBackend, QdrantStore};
pub use synthesizer::{ChatCompletionSynthesizer, SynthesizerConfig};
pub use traits::{AnswerSynthesizer, VectorIndex};
