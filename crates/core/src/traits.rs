use crate::error::{IndexError, SynthesisError};
use crate::models::{IndexEntry, QueryHit};
use async_trait::async_trait;

/// Storage for embedded chunks with nearest-neighbour lookup.
///
/// Implementations must apply an `insert` batch atomically with respect to
/// other writers and must never let a `query` observe a half-loaded state.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Upserts by id. Reusing an id replaces the stored vector and text.
    async fn insert(&self, entries: &[IndexEntry]) -> Result<(), IndexError>;

    /// At most `k` entries, most similar first; exact ties keep insertion order.
    /// Fails with [`IndexError::NotReady`] when nothing was ever inserted or loaded.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<QueryHit>, IndexError>;

    async fn persist(&self) -> Result<(), IndexError>;

    async fn load(&self) -> Result<(), IndexError>;
}

#[async_trait]
pub trait AnswerSynthesizer: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, SynthesisError>;
}
