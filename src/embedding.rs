//! HTTP embedding backends.
//!
//! Concrete [`Embedder`] implementations:
//! - **[`OpenAIEmbedder`]** calls the OpenAI embeddings API.
//! - **[`OllamaEmbedder`]** calls a local Ollama instance's `/api/embed` endpoint.
//!
//! Use [`create_embedder`] to build one from configuration:
//!
//! ```rust,no_run
//! # use index_harness::config::{EmbeddingConfig, RetryConfig};
//! # use index_harness::embedding::create_embedder;
//! let config = EmbeddingConfig {
//!     provider: "ollama".into(),
//!     model: Some("nomic-embed-text".into()),
//!     dims: Some(768),
//!     url: None,
//!     timeout_secs: 30,
//! };
//! let embedder = create_embedder(&config, RetryConfig::default()).unwrap();
//! assert_eq!(embedder.dims(), 768);
//! ```
//!
//! # Retry Strategy
//!
//! Both backends classify failures before handing them to
//! [`with_backoff`](crate::retry::with_backoff):
//! - HTTP 429 (rate limited) and 5xx (server error) → transient, retried
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → transient, retried

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::StatusCode;

use index_harness_core::embedding::Embedder;
use index_harness_core::IndexError;

use crate::config::{EmbeddingConfig, RetryConfig};
use crate::retry::with_backoff;

const OPENAI_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Build the embedder named by `config.provider`.
pub fn create_embedder(config: &EmbeddingConfig, retry: RetryConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAIEmbedder::new(config, retry)?)),
        "ollama" => Ok(Box::new(OllamaEmbedder::new(config, retry)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn required_model(config: &EmbeddingConfig, backend: &str) -> Result<(String, usize)> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required for {} provider", backend))?;
    let dims = config
        .dims
        .ok_or_else(|| anyhow::anyhow!("embedding.dims required for {} provider", backend))?;
    Ok((model, dims))
}

/// Turn a non-success response into an error, transient for 429 and 5xx.
async fn status_error(backend: &str, response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let body_text = response.text().await.unwrap_or_default();
    let message = format!("{} API error {}: {}", backend, status, body_text);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        IndexError::Transient(message).into()
    } else {
        anyhow::anyhow!(message)
    }
}

/// POST `body` to `url` once, classifying failures.
async fn post_json(
    client: &reqwest::Client,
    backend: &str,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
) -> Result<serde_json::Value> {
    let mut request = client
        .post(url)
        .header("Content-Type", "application/json")
        .json(body);
    if let Some(token) = bearer {
        request = request.header("Authorization", format!("Bearer {}", token));
    }

    let response = request
        .send()
        .await
        .map_err(|e| IndexError::Transient(format!("{} request to {} failed: {}", backend, url, e)))?;

    if !response.status().is_success() {
        return Err(status_error(backend, response).await);
    }
    Ok(response.json().await?)
}

// ============ OpenAI ============

/// Embedder using the OpenAI API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    client: reqwest::Client,
    retry: RetryConfig,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig, retry: RetryConfig) -> Result<Self> {
        let (model, dims) = required_model(config, "OpenAI")?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model,
            dims,
            api_key,
            client,
            retry,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn batch_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = with_backoff(&self.retry, "openai embed", || {
            post_json(
                &self.client,
                "OpenAI",
                OPENAI_URL,
                Some(self.api_key.as_str()),
                &body,
            )
        })
        .await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, to_vector(embedding)?));
    }
    indexed.sort_by_key(|(index, _)| *index);

    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Embedder using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default `http://localhost:11434`).
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
    retry: RetryConfig,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig, retry: RetryConfig) -> Result<Self> {
        let (model, dims) = required_model(config, "Ollama")?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model,
            dims,
            url,
            client,
            retry,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn batch_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let endpoint = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let json = with_backoff(&self.retry, "ollama embed", || {
            post_json(&self.client, "Ollama", &endpoint, None, &body)
        })
        .await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings.iter().map(to_vector).collect()
}

fn to_vector(value: &serde_json::Value) -> Result<Vec<f32>> {
    let values = value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("embedding is not an array"))?;
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow::anyhow!("embedding contains a non-numeric value"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_openai_reorders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.5, 0.5] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let out = parse_openai_response(&json).unwrap();
        assert_eq!(out, vec![vec![1.0, 0.0], vec![0.5, 0.5]]);
    }

    #[test]
    fn test_parse_openai_missing_data() {
        assert!(parse_openai_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_parse_ollama() {
        let json = serde_json::json!({ "embeddings": [[0.1, 0.2, 0.3]] });
        let out = parse_ollama_response(&json).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 3);
    }

    #[test]
    fn test_parse_rejects_non_numeric() {
        let json = serde_json::json!({ "embeddings": [[0.1, "x"]] });
        assert!(parse_ollama_response(&json).is_err());
    }

    #[test]
    fn test_create_ollama_embedder() {
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            model: Some("nomic-embed-text".into()),
            dims: Some(768),
            url: Some("http://127.0.0.1:9".into()),
            timeout_secs: 1,
        };
        let embedder = create_embedder(&config, RetryConfig::default()).unwrap();
        assert_eq!(embedder.model_name(), "nomic-embed-text");
        assert_eq!(embedder.dims(), 768);
    }

    #[tokio::test]
    async fn test_unreachable_ollama_is_transient() {
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            model: Some("nomic-embed-text".into()),
            dims: Some(768),
            url: Some("http://127.0.0.1:9".into()),
            timeout_secs: 1,
        };
        let retry = RetryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 1,
        };
        let embedder = OllamaEmbedder::new(&config, retry).unwrap();
        let err = embedder.batch_embed(&["hi".to_string()]).await.unwrap_err();
        assert!(crate::retry::is_transient(&err));
    }
}
