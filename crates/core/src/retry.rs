//! Retry with exponential backoff for calls to hosted services.
//!
//! Only the network boundary retries: timeouts, dropped connections, `429`
//! and `5xx` responses. Client errors and undecodable bodies fail at once.

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use url::Url;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_BACKOFF_FACTOR: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first call included.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based): doubling, capped at 8x base.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32
            .saturating_pow(retry.saturating_sub(1))
            .min(MAX_BACKOFF_FACTOR);
        self.base_delay.saturating_mul(factor)
    }
}

#[derive(Debug, Error)]
pub enum HttpFailure {
    #[error("request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("endpoint returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("unreadable response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for HttpFailure {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            HttpFailure::Timeout(error)
        } else {
            HttpFailure::Transport(error)
        }
    }
}

impl HttpFailure {
    pub fn is_transient(&self) -> bool {
        match self {
            HttpFailure::Timeout(_) => true,
            HttpFailure::Transport(error) => error.is_connect() || error.is_request(),
            HttpFailure::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            HttpFailure::Decode(_) => false,
        }
    }
}

pub async fn with_retry<T, E, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    is_transient: impl Fn(&E) -> bool,
    mut call: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < max_attempts && is_transient(&error) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

/// `{base}/{path}`, tolerant of a trailing slash on `base`.
pub fn endpoint_url(base: &str, path: &str) -> Result<Url, url::ParseError> {
    Url::parse(&format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    ))
}

/// Builds a client whose every request is bounded by `timeout`.
pub fn client_with_timeout(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder().timeout(timeout).build()
}

/// POSTs `body` as JSON and decodes a JSON reply, retrying transient failures.
pub async fn post_json<B, R>(
    client: &Client,
    url: &str,
    api_key: Option<&str>,
    body: &B,
    policy: RetryPolicy,
) -> Result<R, HttpFailure>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    with_retry(policy, url, HttpFailure::is_transient, || async move {
        let mut request = client.post(url).json(body);
        if let Some(key) = api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HttpFailure::Status { status, body });
        }

        response
            .json::<R>()
            .await
            .map_err(|error| HttpFailure::Decode(error.to_string()))
    })
    .await
}
