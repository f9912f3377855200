use crate::budget::TokenBudget;
use crate::chunking::{build_chunks, ChunkingConfig};
use crate::embeddings::Embedder;
use crate::error::{EmbeddingError, IndexError, IngestError, SearchError};
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::models::{Answer, DocumentSummary, IndexEntry, PipelineOptions, QueryHit, Retrieval};
use crate::traits::{AnswerSynthesizer, VectorIndex};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Separator placed between retrieved chunks in the assembled context.
pub const CONTEXT_SEPARATOR: &str = "\n";

pub fn build_prompt(context: &str, question: &str) -> String {
    format!("The following text was retrieved from the PDF:\n\n{context}\n\nUser query: {question}\n\n")
}

/// Ingest and query paths over one shared index.
///
/// The index is opened by the caller and handed in; [`persist`](Self::persist)
/// flushes it at shutdown. Ingests are serialised through an internal lock so
/// only one writer touches the index at a time; queries run concurrently.
pub struct RetrievalPipeline<V, E, S>
where
    V: VectorIndex,
    E: Embedder,
    S: AnswerSynthesizer,
{
    index: V,
    embedder: E,
    synthesizer: S,
    options: PipelineOptions,
    chunking: ChunkingConfig,
    writer: Mutex<()>,
}

impl<V, E, S> RetrievalPipeline<V, E, S>
where
    V: VectorIndex,
    E: Embedder,
    S: AnswerSynthesizer,
{
    pub fn new(index: V, embedder: E, synthesizer: S) -> Self {
        let options = PipelineOptions::default();
        Self {
            index,
            embedder,
            synthesizer,
            chunking: ChunkingConfig::from(&options),
            options,
            writer: Mutex::new(()),
        }
    }

    pub fn with_options(
        index: V,
        embedder: E,
        synthesizer: S,
        options: PipelineOptions,
    ) -> Result<Self, IngestError> {
        options.validate()?;
        Ok(Self {
            index,
            embedder,
            synthesizer,
            chunking: ChunkingConfig::from(&options),
            options,
            writer: Mutex::new(()),
        })
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn index(&self) -> &V {
        &self.index
    }

    pub fn synthesizer(&self) -> &S {
        &self.synthesizer
    }

    /// Extract, chunk, embed and upsert one document. Nothing reaches the index
    /// unless every chunk was embedded.
    pub async fn ingest(
        &self,
        document_name: &str,
        pdf_bytes: &[u8],
    ) -> Result<DocumentSummary, IngestError> {
        if document_name.trim().is_empty() {
            return Err(IngestError::InvalidArgument(
                "document name is empty".to_string(),
            ));
        }

        let text = LopdfExtractor.extract_text(pdf_bytes)?;
        self.ingest_text(document_name, &text).await
    }

    /// Ingest path for text that was already extracted.
    pub async fn ingest_text(
        &self,
        document_name: &str,
        text: &str,
    ) -> Result<DocumentSummary, IngestError> {
        if text.trim().is_empty() {
            return Err(IngestError::PdfParse(format!(
                "no extractable text in {document_name}"
            )));
        }

        let chunks = build_chunks(document_name, text, self.chunking)?;
        let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        if vectors.len() != chunks.len() {
            return Err(IngestError::Embedding(EmbeddingError::Provider {
                provider: "embedder".to_string(),
                message: format!(
                    "returned {} vectors for {} chunks",
                    vectors.len(),
                    chunks.len()
                ),
            }));
        }

        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry::from_chunk(chunk, vector))
            .collect();
        let chunk_count = entries.len();

        {
            let _writer = self.writer.lock().await;
            self.index.insert(&entries).await?;
        }

        info!(document = document_name, chunk_count, "ingested document");
        Ok(DocumentSummary {
            document_name: document_name.to_string(),
            chunk_count,
            ingested_at: Utc::now(),
        })
    }

    pub async fn retrieve(&self, query: &str) -> Result<Retrieval, SearchError> {
        self.retrieve_with(query, self.options.top_k, self.options.max_chunk_chars)
            .await
    }

    /// Top `top_k` chunks for `query`, each cut to `max_chunk_chars`
    /// characters and joined in rank order.
    pub async fn retrieve_with(
        &self,
        query: &str,
        top_k: usize,
        max_chunk_chars: usize,
    ) -> Result<Retrieval, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::Request("query is empty".to_string()));
        }
        if top_k == 0 {
            return Err(SearchError::Request(
                "top_k must be greater than zero".to_string(),
            ));
        }

        let query_vector = self.embedder.embed(query).await?;
        let hits = match self.index.query(&query_vector, top_k).await {
            Ok(hits) => hits,
            Err(IndexError::NotReady(reason)) => {
                debug!(%reason, "index not ready, nothing to retrieve");
                Vec::new()
            }
            Err(error) => return Err(error.into()),
        };

        info!(top_k, hit_count = hits.len(), "retrieved context");
        Ok(assemble_context(hits, max_chunk_chars))
    }

    /// Retrieval followed by synthesis. An empty retrieval short-circuits and
    /// an oversized prompt is refused before the synthesizer is called.
    pub async fn answer(&self, question: &str) -> Result<Answer, SearchError> {
        let context = match self.retrieve(question).await? {
            Retrieval::Context { text, .. } => text,
            Retrieval::NoRelevantInformation => return Ok(Answer::NoRelevantInformation),
        };

        let prompt = build_prompt(&context, question);
        self.synthesize(&prompt).await.map(Answer::Synthesized)
    }

    /// Sends the bare question to the synthesizer, bypassing the index.
    pub async fn ask_direct(&self, question: &str) -> Result<String, SearchError> {
        if question.trim().is_empty() {
            return Err(SearchError::Request("question is empty".to_string()));
        }
        self.synthesize(question).await
    }

    pub async fn persist(&self) -> Result<(), IndexError> {
        let _writer = self.writer.lock().await;
        self.index.persist().await
    }

    async fn synthesize(&self, prompt: &str) -> Result<String, SearchError> {
        let tokens = TokenBudget::new(self.options.max_prompt_tokens).check(prompt)?;
        debug!(tokens, "prompt within token budget");
        Ok(self.synthesizer.complete(prompt).await?)
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

fn assemble_context(hits: Vec<QueryHit>, max_chunk_chars: usize) -> Retrieval {
    let combined = hits
        .iter()
        .map(|hit| truncate_chars(&hit.entry.text, max_chunk_chars))
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR);
    let combined = combined.trim();

    if combined.is_empty() {
        return Retrieval::NoRelevantInformation;
    }

    Retrieval::Context {
        text: combined.to_string(),
        hits,
    }
}
