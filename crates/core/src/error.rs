use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("prompt needs at least {tokens} tokens but the budget is {max_tokens}; narrow the query")]
    TokenBudgetExceeded { tokens: usize, max_tokens: usize },

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error("search request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding error ({provider}): {message}")]
    Provider { provider: String, message: String },

    #[error("embedding dimension {actual} does not match configured {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index snapshot is unreadable: {0}")]
    Snapshot(String),

    #[error("vector dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index not available yet: {0}")]
    NotReady(String),
}

/// Failure at the answer-synthesis boundary. Transport, auth and decode
/// failures all collapse into the message.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("answer synthesis failed: {0}")]
    Message(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
