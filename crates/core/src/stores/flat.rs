//! Flat (exhaustive) cosine index held in memory and saved as one JSON snapshot.
//!
//! The snapshot is replaced atomically: it is written to a temporary file in
//! the same directory and renamed over the previous one.

use crate::error::IndexError;
use crate::models::{IndexEntry, QueryHit};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

pub const SNAPSHOT_FILE_NAME: &str = "flat_index.json";

const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotRef<'a> {
    format_version: u32,
    dimensions: Option<usize>,
    entries: &'a [IndexEntry],
}

#[derive(Deserialize)]
struct Snapshot {
    format_version: u32,
    dimensions: Option<usize>,
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Default)]
struct FlatState {
    dimensions: Option<usize>,
    /// Insertion order; an overwritten id keeps its original slot.
    entries: Vec<IndexEntry>,
    positions: HashMap<String, usize>,
    populated: bool,
}

impl FlatState {
    fn from_snapshot(snapshot: Snapshot) -> Result<Self, IndexError> {
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(IndexError::Snapshot(format!(
                "unsupported format version {}",
                snapshot.format_version
            )));
        }

        let mut positions = HashMap::with_capacity(snapshot.entries.len());
        for (position, entry) in snapshot.entries.iter().enumerate() {
            if let Some(expected) = snapshot.dimensions {
                if entry.vector.len() != expected {
                    return Err(IndexError::Snapshot(format!(
                        "entry {} has dimension {} instead of {expected}",
                        entry.id,
                        entry.vector.len()
                    )));
                }
            }
            if positions.insert(entry.id.clone(), position).is_some() {
                return Err(IndexError::Snapshot(format!("duplicate entry id {}", entry.id)));
            }
        }

        Ok(Self {
            dimensions: snapshot.dimensions,
            entries: snapshot.entries,
            positions,
            populated: true,
        })
    }

    fn check_dimensions(&self, entries: &[IndexEntry]) -> Result<Option<usize>, IndexError> {
        let mut expected = self.dimensions;
        for entry in entries {
            let actual = entry.vector.len();
            match expected {
                Some(expected) if expected != actual => {
                    return Err(IndexError::DimensionMismatch { expected, actual });
                }
                None if actual == 0 => {
                    return Err(IndexError::DimensionMismatch {
                        expected: 1,
                        actual,
                    });
                }
                None => expected = Some(actual),
                _ => {}
            }
        }
        Ok(expected)
    }
}

#[derive(Debug, Default)]
pub struct FlatIndex {
    snapshot_path: Option<PathBuf>,
    state: RwLock<FlatState>,
    persist_lock: Mutex<()>,
}

impl FlatIndex {
    /// Index without a backing snapshot; `persist` and `load` are no-ops.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Index backed by `<dir>/flat_index.json`. Nothing is read until [`load`](VectorIndex::load).
    pub fn with_snapshot_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            snapshot_path: Some(dir.as_ref().join(SNAPSHOT_FILE_NAME)),
            ..Self::default()
        }
    }

    /// Backs the index with `dir` and loads any snapshot already there.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, IndexError> {
        let index = Self::with_snapshot_dir(dir);
        index.load().await?;
        Ok(index)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let dot: f32 = left.iter().zip(right.iter()).map(|(a, b)| a * b).sum();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm * right_norm)
}

fn write_snapshot(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|error| IndexError::Io(error.error))?;
    Ok(())
}

#[async_trait]
impl VectorIndex for FlatIndex {
    async fn insert(&self, entries: &[IndexEntry]) -> Result<(), IndexError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().await;
        let dimensions = state.check_dimensions(entries)?;
        state.dimensions = dimensions;

        for entry in entries {
            match state.positions.get(&entry.id).copied() {
                Some(position) => state.entries[position] = entry.clone(),
                None => {
                    let position = state.entries.len();
                    state.positions.insert(entry.id.clone(), position);
                    state.entries.push(entry.clone());
                }
            }
        }
        state.populated = true;

        debug!(inserted = entries.len(), total = state.entries.len(), "flat index upsert");
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<QueryHit>, IndexError> {
        let state = self.state.read().await;
        if !state.populated {
            return Err(IndexError::NotReady(
                "flat index has never been populated and no snapshot was loaded".to_string(),
            ));
        }
        if let Some(expected) = state.dimensions {
            if vector.len() != expected {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }

        let mut scored: Vec<(usize, f32)> = state
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (position, cosine_similarity(&entry.vector, vector)))
            .collect();

        // Stable: equal scores stay in insertion order.
        scored.sort_by(|left, right| right.1.total_cmp(&left.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(position, score)| QueryHit {
                entry: state.entries[position].clone(),
                score,
            })
            .collect())
    }

    async fn persist(&self) -> Result<(), IndexError> {
        let Some(path) = self.snapshot_path.clone() else {
            return Ok(());
        };

        // Serialises snapshots so an older one never lands after a newer one.
        let _guard = self.persist_lock.lock().await;
        let (bytes, count) = {
            let state = self.state.read().await;
            let snapshot = SnapshotRef {
                format_version: SNAPSHOT_FORMAT_VERSION,
                dimensions: state.dimensions,
                entries: &state.entries,
            };
            (serde_json::to_vec(&snapshot)?, state.entries.len())
        };

        let target = path.clone();
        tokio::task::spawn_blocking(move || write_snapshot(&target, &bytes))
            .await
            .map_err(|error| IndexError::Snapshot(format!("snapshot writer panicked: {error}")))??;

        info!(path = %path.display(), entries = count, "flat index persisted");
        Ok(())
    }

    async fn load(&self) -> Result<(), IndexError> {
        let Some(path) = self.snapshot_path.as_ref() else {
            return Ok(());
        };

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no flat index snapshot yet");
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        };

        // Parse fully before taking the lock so readers never see a partial state.
        let snapshot: Snapshot = serde_json::from_slice(&bytes)
            .map_err(|error| IndexError::Snapshot(error.to_string()))?;
        let loaded = FlatState::from_snapshot(snapshot)?;
        let count = loaded.entries.len();

        *self.state.write().await = loaded;

        info!(path = %path.display(), entries = count, "flat index loaded");
        Ok(())
    }
}
