use crate::error::IngestError;
use crate::models::{chunk_id, PdfChunk, PipelineOptions};

/// Breakpoints tried from the end of a window, strongest first.
const BREAKPOINTS: [&str; 6] = ["\n\n", "\n", ". ", "! ", "? ", " "];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::from(&PipelineOptions::default())
    }
}

impl From<&PipelineOptions> for ChunkingConfig {
    fn from(value: &PipelineOptions) -> Self {
        Self {
            max_chars: value.chunk_max_chars,
            overlap_chars: value.chunk_overlap_chars,
        }
    }
}

impl ChunkingConfig {
    pub fn new(max_chars: usize, overlap_chars: usize) -> Result<Self, IngestError> {
        let config = Self {
            max_chars,
            overlap_chars,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be greater than zero".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap ({}) must be less than max size ({})",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

/// Splits `text` into windows of at most `max_chars` characters. Each window
/// after the first starts exactly `overlap_chars` characters before the end of
/// its predecessor. A window's end is pulled back to the last paragraph,
/// line, sentence or word break in its second half when one exists, and is a
/// hard character cut otherwise.
///
/// Text no longer than `max_chars` comes back as a single chunk, even when empty.
pub fn split_text(text: &str, config: ChunkingConfig) -> Result<Vec<String>, IngestError> {
    config.validate()?;

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= config.max_chars {
        return Ok(vec![text.to_string()]);
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let hard_end = (start + config.max_chars).min(chars.len());
        if hard_end == chars.len() {
            chunks.push(chars[start..].iter().collect());
            break;
        }

        // The next window starts at `end - overlap`, which has to move forward.
        let floor = start + (config.overlap_chars + 1).max(config.max_chars / 2);
        let end = snap_to_breakpoint(&chars, floor, hard_end).unwrap_or(hard_end);

        chunks.push(chars[start..end].iter().collect());
        start = end - config.overlap_chars;
    }

    Ok(chunks)
}

/// Position just past the rightmost occurrence of the strongest breakpoint
/// that ends inside `(floor, hard_end]`.
fn snap_to_breakpoint(chars: &[char], floor: usize, hard_end: usize) -> Option<usize> {
    if floor >= hard_end {
        return None;
    }

    for breakpoint in BREAKPOINTS {
        let pattern: Vec<char> = breakpoint.chars().collect();
        let width = pattern.len();
        let mut end = hard_end;
        while end > floor {
            if end >= width && chars[end - width..end] == pattern[..] {
                return Some(end);
            }
            end -= 1;
        }
    }

    None
}

/// Splits a document's text and tags each piece with its `{name}_{ordinal}` id.
pub fn build_chunks(
    document_name: &str,
    text: &str,
    config: ChunkingConfig,
) -> Result<Vec<PdfChunk>, IngestError> {
    let pieces = split_text(text, config)?;

    Ok(pieces
        .into_iter()
        .enumerate()
        .map(|(index, piece)| {
            let ordinal = index as u64;
            PdfChunk {
                chunk_id: chunk_id(document_name, ordinal),
                document_name: document_name.to_string(),
                chunk_index: ordinal,
                text: piece,
                overlap_chars: if index == 0 { 0 } else { config.overlap_chars },
            }
        })
        .collect())
}
