use crate::error::EmbeddingError;
use crate::retry::{client_with_timeout, endpoint_url, post_json, RetryPolicy, DEFAULT_TIMEOUT};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

const DEFAULT_EMBEDDING_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_EMBEDDING_MODEL_DIMENSIONS: usize = 1536;
const DEFAULT_BATCH_SIZE: usize = 64;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Offline embedder: hashed character trigrams, L2-normalised.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_text(text))
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingEndpointConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub dimensions: usize,
    pub batch_size: usize,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for EmbeddingEndpointConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_EMBEDDING_BASE_URL.to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            api_key: None,
            dimensions: DEFAULT_EMBEDDING_MODEL_DIMENSIONS,
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl EmbeddingEndpointConfig {
    /// Reads `EMBEDDING_BASE_URL`, `EMBEDDING_MODEL`, `EMBEDDING_DIMENSIONS` and
    /// `EMBEDDING_API_KEY` (falling back to `OPENAI_API_KEY`). Blank values
    /// count as unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: env_value("EMBEDDING_BASE_URL").unwrap_or(defaults.base_url),
            model: env_value("EMBEDDING_MODEL").unwrap_or(defaults.model),
            api_key: env_value("EMBEDDING_API_KEY").or_else(|| env_value("OPENAI_API_KEY")),
            dimensions: env_value("EMBEDDING_DIMENSIONS")
                .and_then(|value| value.parse().ok())
                .unwrap_or(defaults.dimensions),
            ..defaults
        }
    }
}

pub(crate) fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|value| {
        let value = value.trim().to_string();
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    })
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Hosted embedder speaking the OpenAI-compatible `/embeddings` protocol.
pub struct HttpEmbedder {
    client: Client,
    url: String,
    config: EmbeddingEndpointConfig,
}

impl HttpEmbedder {
    pub fn new(config: EmbeddingEndpointConfig) -> Result<Self, EmbeddingError> {
        let url = endpoint_url(&config.base_url, "embeddings")?.to_string();
        let client = client_with_timeout(config.timeout)?;
        Ok(Self {
            client,
            url,
            config,
        })
    }

    async fn embed_request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
        };

        let response: EmbeddingResponse = post_json(
            &self.client,
            &self.url,
            self.config.api_key.as_deref(),
            &request,
            self.config.retry,
        )
        .await
        .map_err(|failure| {
            error!(provider = "http", model = %self.config.model, %failure, "embedding request failed");
            EmbeddingError::Provider {
                provider: self.config.model.clone(),
                message: failure.to_string(),
            }
        })?;

        let mut data = response.data;
        if data.len() != texts.len() {
            return Err(EmbeddingError::Provider {
                provider: self.config.model.clone(),
                message: format!("requested {} embeddings, got {}", texts.len(), data.len()),
            });
        }
        data.sort_by_key(|item| item.index.unwrap_or(usize::MAX));

        data.into_iter()
            .map(|item| {
                if item.embedding.len() != self.config.dimensions {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected: self.config.dimensions,
                        actual: item.embedding.len(),
                    });
                }
                Ok(item.embedding)
            })
            .collect()
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_request(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Provider {
                provider: self.config.model.clone(),
                message: "endpoint returned no embedding".to_string(),
            })
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            debug!(model = %self.config.model, batch_size = batch.len(), "embedding batch");
            vectors.extend(self.embed_request(batch).await?);
        }
        Ok(vectors)
    }
}

/// Embedder variants selectable at runtime.
pub enum EmbedderBackend {
    Ngram(CharacterNgramEmbedder),
    Http(HttpEmbedder),
}

#[async_trait]
impl Embedder for EmbedderBackend {
    fn dimensions(&self) -> usize {
        match self {
            EmbedderBackend::Ngram(embedder) => Embedder::dimensions(embedder),
            EmbedderBackend::Http(embedder) => embedder.dimensions(),
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        match self {
            EmbedderBackend::Ngram(embedder) => embedder.embed(text).await,
            EmbedderBackend::Http(embedder) => embedder.embed(text).await,
        }
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        match self {
            EmbedderBackend::Ngram(embedder) => embedder.embed_batch(texts).await,
            EmbedderBackend::Http(embedder) => embedder.embed_batch(texts).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn endpoint_config(server: &MockServer, dimensions: usize) -> EmbeddingEndpointConfig {
        EmbeddingEndpointConfig {
            base_url: format!("{}/v1", server.uri()),
            model: "test-embed".to_string(),
            api_key: Some("secret".to_string()),
            dimensions,
            batch_size: 2,
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::no_retry(),
        }
    }

    #[tokio::test]
    async fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Hydraulic pressure and flow").await.unwrap();
        let second = embedder.embed("Hydraulic pressure and flow").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed("abc").await.unwrap();
        assert_eq!(vector.len(), 32);
    }

    #[tokio::test]
    async fn http_embedder_batches_and_orders_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({"model": "test-embed", "input": ["a", "b"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0]},
                    {"index": 0, "embedding": [1.0, 0.0]}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(body_partial_json(json!({"input": ["c"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": [0.5, 0.5]}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(endpoint_config(&server, 2)).unwrap();
        let vectors = embedder.embed_batch(&["a", "b", "c"]).await.unwrap();

        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.5, 0.5]]);
    }

    #[tokio::test]
    async fn http_embedder_rejects_wrong_dimensions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": [1.0, 0.0, 0.0]}]
            })))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(endpoint_config(&server, 2)).unwrap();
        let result = embedder.embed("query").await;

        assert!(matches!(
            result,
            Err(EmbeddingError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[tokio::test]
    async fn http_embedder_surfaces_endpoint_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(endpoint_config(&server, 2)).unwrap();
        let error = embedder.embed("query").await.unwrap_err();

        assert!(error.to_string().contains("invalid api key"));
    }

    #[test]
    fn http_embedder_rejects_unparseable_base_url() {
        let config = EmbeddingEndpointConfig {
            base_url: "not a url".to_string(),
            ..EmbeddingEndpointConfig::default()
        };

        assert!(matches!(
            HttpEmbedder::new(config),
            Err(EmbeddingError::Url(_))
        ));
    }
}
