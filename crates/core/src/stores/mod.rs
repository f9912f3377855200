pub mod flat;
pub mod qdrant;

pub use flat::FlatIndex;
pub use qdrant::QdrantStore;

use crate::error::IndexError;
use crate::models::{IndexEntry, QueryHit};
use crate::traits::VectorIndex;
use async_trait::async_trait;

/// Index variants selectable at runtime behind one [`VectorIndex`].
pub enum IndexBackend {
    Flat(FlatIndex),
    Qdrant(QdrantStore),
}

#[async_trait]
impl VectorIndex for IndexBackend {
    async fn insert(&self, entries: &[IndexEntry]) -> Result<(), IndexError> {
        match self {
            IndexBackend::Flat(index) => index.insert(entries).await,
            IndexBackend::Qdrant(store) => store.insert(entries).await,
        }
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<QueryHit>, IndexError> {
        match self {
            IndexBackend::Flat(index) => index.query(vector, k).await,
            IndexBackend::Qdrant(store) => store.query(vector, k).await,
        }
    }

    async fn persist(&self) -> Result<(), IndexError> {
        match self {
            IndexBackend::Flat(index) => index.persist().await,
            IndexBackend::Qdrant(store) => store.persist().await,
        }
    }

    async fn load(&self) -> Result<(), IndexError> {
        match self {
            IndexBackend::Flat(index) => index.load().await,
            IndexBackend::Qdrant(store) => store.load().await,
        }
    }
}
