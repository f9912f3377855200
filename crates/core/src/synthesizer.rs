//! Answer synthesis through an OpenAI-compatible chat-completions endpoint.

use crate::embeddings::env_value;
use crate::error::SynthesisError;
use crate::retry::{client_with_timeout, endpoint_url, post_json, RetryPolicy, DEFAULT_TIMEOUT};
use crate::traits::AnswerSynthesizer;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

const DEFAULT_LLM_BASE_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_LLM_MODEL: &str = "llama-3.1-8b-instant";

#[derive(Debug, Clone)]
pub struct SynthesizerConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            api_key: None,
            temperature: 0.0,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl SynthesizerConfig {
    /// Reads `LLM_BASE_URL`, `LLM_MODEL` and `GROQ_API_KEY`. Blank values count as unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: env_value("LLM_BASE_URL").unwrap_or(defaults.base_url),
            model: env_value("LLM_MODEL").unwrap_or(defaults.model),
            api_key: env_value("GROQ_API_KEY"),
            ..defaults
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

pub struct ChatCompletionSynthesizer {
    client: Client,
    url: String,
    config: SynthesizerConfig,
}

impl ChatCompletionSynthesizer {
    pub fn new(config: SynthesizerConfig) -> Result<Self, SynthesisError> {
        let url = endpoint_url(&config.base_url, "chat/completions")
            .map_err(|error| SynthesisError::Message(format!("invalid endpoint: {error}")))?
            .to_string();
        let client = client_with_timeout(config.timeout)
            .map_err(|error| SynthesisError::Message(error.to_string()))?;

        Ok(Self {
            client,
            url,
            config,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl AnswerSynthesizer for ChatCompletionSynthesizer {
    async fn complete(&self, prompt: &str) -> Result<String, SynthesisError> {
        debug!(model = %self.config.model, prompt_len = prompt.len(), "requesting completion");

        let request = ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response: ChatResponse = post_json(
            &self.client,
            &self.url,
            self.config.api_key.as_deref(),
            &request,
            self.config.retry,
        )
        .await
        .map_err(|failure| {
            error!(model = %self.config.model, %failure, "completion request failed");
            SynthesisError::Message(failure.to_string())
        })?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| SynthesisError::Message("no response received".to_string()))
    }
}
