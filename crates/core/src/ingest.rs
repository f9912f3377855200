use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::models::DocumentSummary;
use crate::orchestrator::RetrievalPipeline;
use crate::traits::{AnswerSynthesizer, VectorIndex};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Document name under which a file is indexed: its file name.
pub fn document_name(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))
}

#[derive(Debug)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct IngestionReport {
    pub documents: Vec<DocumentSummary>,
    pub skipped_files: Vec<SkippedPdf>,
}

impl IngestionReport {
    pub fn chunk_count(&self) -> usize {
        self.documents.iter().map(|doc| doc.chunk_count).sum()
    }
}

pub async fn ingest_file<V, E, S>(
    pipeline: &RetrievalPipeline<V, E, S>,
    path: &Path,
) -> Result<DocumentSummary, IngestError>
where
    V: VectorIndex,
    E: Embedder,
    S: AnswerSynthesizer,
{
    let name = document_name(path)?;
    let bytes = tokio::fs::read(path).await?;
    pipeline.ingest(&name, &bytes).await
}

/// Ingests a single PDF, or every PDF below a folder. Folder ingestion keeps
/// going past files that fail and lists them in the report.
pub async fn ingest_path<V, E, S>(
    pipeline: &RetrievalPipeline<V, E, S>,
    path: &Path,
) -> Result<IngestionReport, IngestError>
where
    V: VectorIndex,
    E: Embedder,
    S: AnswerSynthesizer,
{
    if tokio::fs::metadata(path).await?.is_file() {
        let summary = ingest_file(pipeline, path).await?;
        return Ok(IngestionReport {
            documents: vec![summary],
            skipped_files: Vec::new(),
        });
    }

    let files = discover_pdf_files(path);

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no pdf files found in {}",
            path.display()
        )));
    }

    let mut report = IngestionReport::default();

    for file in files {
        match ingest_file(pipeline, &file).await {
            Ok(summary) => report.documents.push(summary),
            Err(error) => {
                warn!(path = %file.display(), %error, "skipping pdf");
                report.skipped_files.push(SkippedPdf {
                    path: file,
                    reason: error.to_string(),
                });
            }
        }
    }

    info!(
        folder = %path.display(),
        documents = report.documents.len(),
        skipped = report.skipped_files.len(),
        "folder ingestion finished"
    );
    Ok(report)
}
