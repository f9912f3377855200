use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Text shown in place of context when the index has nothing to offer.
pub const NO_RELEVANT_INFORMATION: &str = "No relevant information found in the document.";

/// Entry id for the `ordinal`-th chunk of a document. Re-ingesting a document
/// under the same name reuses these ids, so its entries are overwritten.
pub fn chunk_id(document_name: &str, ordinal: u64) -> String {
    format!("{document_name}_{ordinal}")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PdfChunk {
    pub chunk_id: String,
    pub document_name: String,
    pub chunk_index: u64,
    pub text: String,
    /// Characters shared with the tail of the preceding chunk; 0 for the first.
    pub overlap_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EntryMetadata {
    pub document_name: String,
    pub chunk_index: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: EntryMetadata,
}

impl IndexEntry {
    pub fn from_chunk(chunk: PdfChunk, vector: Vec<f32>) -> Self {
        Self {
            id: chunk.chunk_id,
            vector,
            text: chunk.text,
            metadata: EntryMetadata {
                document_name: chunk.document_name,
                chunk_index: chunk.chunk_index,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryHit {
    pub entry: IndexEntry,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineOptions {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub top_k: usize,
    pub max_chunk_chars: usize,
    pub max_prompt_tokens: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 1_000,
            chunk_overlap_chars: 100,
            top_k: 5,
            max_chunk_chars: 500,
            max_prompt_tokens: 6_000,
        }
    }
}

impl PipelineOptions {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_max_chars must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap_chars >= self.chunk_max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_overlap_chars ({}) must be less than chunk_max_chars ({})",
                self.chunk_overlap_chars, self.chunk_max_chars
            )));
        }
        if self.top_k == 0 {
            return Err(IngestError::InvalidArgument(
                "top_k must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval {
    Context { text: String, hits: Vec<QueryHit> },
    NoRelevantInformation,
}

impl Retrieval {
    pub fn text(&self) -> &str {
        match self {
            Retrieval::Context { text, .. } => text,
            Retrieval::NoRelevantInformation => NO_RELEVANT_INFORMATION,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    Synthesized(String),
    NoRelevantInformation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub document_name: String,
    pub chunk_count: usize,
    pub ingested_at: DateTime<Utc>,
}
