//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`OpenAiEmbedder`]**: calls the OpenAI embeddings API.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`OpenAiCompatibleEmbedder`]**: speaks the OpenAI wire shape against a
//!   caller-supplied base URL (LM Studio, vLLM, corporate gateways).
//!
//! Use [`create_embedder`] to instantiate the provider selected by the
//! normalized configuration.
//!
//! # Retry Strategy
//!
//! All providers share one discipline for transient failures:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::{model_dimension, EmbedderProvider, IndexingConfig};

const MAX_RETRIES: u32 = 5;
const TIMEOUT_SECS: u64 = 30;
const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Converts text into fixed-length numeric vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts: one vector per input, order-preserving.
    async fn create_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// The model identifier in use (e.g. `"text-embedding-3-small"`).
    fn model(&self) -> &str;

    /// The expected vector dimensionality, when known for this model.
    fn dimension(&self) -> Option<usize>;
}

/// Embed a single query text.
///
/// Convenience wrapper around [`Embedder::create_embeddings`] for search
/// queries.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let results = embedder.create_embeddings(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

/// Create the [`Embedder`] selected by the normalized configuration.
///
/// # Errors
///
/// Returns an error when the selected provider's required credentials or
/// endpoint are missing from the configuration.
pub fn create_embedder(config: &IndexingConfig) -> Result<Box<dyn Embedder>> {
    let model = config.resolved_model_id().to_string();
    match config.embedder_provider {
        EmbedderProvider::OpenAi => Ok(Box::new(OpenAiEmbedder::new(
            &config.open_ai_key,
            model,
        )?)),
        EmbedderProvider::Ollama => {
            let base_url = config
                .ollama_base_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("Ollama base URL required"))?;
            Ok(Box::new(OllamaEmbedder::new(base_url, model)?))
        }
        EmbedderProvider::OpenAiCompatible => {
            let base_url = config
                .open_ai_compatible_base_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("OpenAI-compatible base URL required"))?;
            Ok(Box::new(OpenAiCompatibleEmbedder::new(
                base_url,
                &config.open_ai_compatible_key,
                model,
            )?))
        }
    }
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(TIMEOUT_SECS))
        .build()
        .context("Failed to build HTTP client")
}

/// POST a JSON body with the shared retry/backoff discipline.
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
) -> Result<Value> {
    let mut last_err = None;

    for attempt in 0..=MAX_RETRIES {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json().await.context("Invalid JSON response");
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!("API error {}: {}", status, body_text));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!("Request to {} failed: {}", url, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
}

/// Parse an OpenAI-shaped embeddings response: `data[].embedding`.
fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid response: missing embedding"))?;
        embeddings.push(
            embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }
    Ok(embeddings)
}

/// Parse an Ollama `/api/embed` response: `embeddings[]`.
fn parse_ollama_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }
    Ok(result)
}

// ============ OpenAI ============

/// Embedding provider using the OpenAI API.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(api_key: &str, model: String) -> Result<Self> {
        if api_key.is_empty() {
            bail!("OpenAI API key not configured");
        }
        Ok(Self {
            client: http_client()?,
            api_key: api_key.to_string(),
            model,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn create_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let url = format!("{}/v1/embeddings", OPENAI_BASE_URL);
        let json = post_with_retry(&self.client, &url, Some(&self.api_key), &body).await?;
        parse_openai_response(&json)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> Option<usize> {
        model_dimension(EmbedderProvider::OpenAi, &self.model)
    }
}

// ============ Ollama ============

/// Embedding provider using a local Ollama instance.
///
/// Requires Ollama to be running with an embedding model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(base_url: String, model: String) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url,
            model,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn create_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let url = format!("{}/api/embed", self.base_url.trim_end_matches('/'));
        let json = post_with_retry(&self.client, &url, None, &body)
            .await
            .with_context(|| {
                format!("Ollama request failed (is Ollama running at {}?)", self.base_url)
            })?;
        parse_ollama_response(&json)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> Option<usize> {
        model_dimension(EmbedderProvider::Ollama, &self.model)
    }
}

// ============ OpenAI-compatible ============

/// Embedding provider for OpenAI-compatible endpoints.
pub struct OpenAiCompatibleEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleEmbedder {
    pub fn new(base_url: String, api_key: &str, model: String) -> Result<Self> {
        if api_key.is_empty() {
            bail!("API key required for OpenAI-compatible provider");
        }
        Ok(Self {
            client: http_client()?,
            base_url,
            api_key: api_key.to_string(),
            model,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiCompatibleEmbedder {
    async fn create_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let url = format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'));
        let json = post_with_retry(&self.client, &url, Some(&self.api_key), &body).await?;
        parse_openai_response(&json)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> Option<usize> {
        model_dimension(EmbedderProvider::OpenAiCompatible, &self.model)
    }
}
