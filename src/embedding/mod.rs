//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API in batches through the gateway.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//!
//! Also provides vector utilities for the SQLite store:
//! - [`cosine_similarity`]: compute similarity between two embedding vectors
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`]: decode a SQLite BLOB back into a `Vec<f32>`
//!
//! Retries follow the shared [`RetryPolicy`](crate::gateway::RetryPolicy), so
//! embedding calls back off exactly like chat completions.

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use serde_json::json;

use crate::config::Config;
use crate::error::GatewayError;
use crate::gateway::{self, RetryPolicy};
use crate::openai::OpenAiClient;

/// Turns text into vectors.
///
/// The model name is recorded with every collection, so two providers with
/// the same name must produce compatible vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Embed a batch of texts. Returns one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GatewayError>;
}

/// Embed a single query text.
pub async fn embed_query(
    provider: &dyn EmbeddingProvider,
    text: &str,
) -> Result<Vec<f32>, GatewayError> {
    provider
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| GatewayError::InvalidResponse("Empty embedding response".into()))
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
        Err(GatewayError::InvalidRequest(
            "Embedding provider is disabled".into(),
        ))
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI `POST /embeddings` endpoint.
pub struct OpenAIProvider {
    client: OpenAiClient,
    model: String,
    batch_size: usize,
    timeout: Duration,
}

impl OpenAIProvider {
    pub fn new(client: OpenAiClient, model: &str, batch_size: usize, timeout: Duration) -> Self {
        Self {
            client,
            model: model.to_string(),
            batch_size: batch_size.max(1),
            timeout,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
        let mut vectors = Vec::with_capacity(texts.len());
        let mut tokens = 0;
        for batch in texts.chunks(self.batch_size) {
            let (batch_vectors, used) = self
                .client
                .embeddings(&self.model, batch, self.timeout)
                .await?;
            tokens += used;
            vectors.extend(batch_vectors);
        }
        tracing::debug!(model = %self.model, texts = texts.len(), tokens, "embedded batch");
        Ok(vectors)
    }
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL. Requires Ollama to be
/// running with an embedding model pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    http: reqwest::Client,
    url: String,
    model: String,
    batch_size: usize,
    timeout: Duration,
    policy: RetryPolicy,
}

impl OllamaProvider {
    pub fn new(url: &str, model: &str, batch_size: usize, timeout: Duration, policy: RetryPolicy) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            batch_size: batch_size.max(1),
            timeout,
            policy,
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
        let body = json!({ "model": self.model, "input": texts });
        let endpoint = format!("{}/api/embed", self.url);
        let json = gateway::invoke(&self.policy, "ollama embed", |_| {
            gateway::send_json(self.http.post(&endpoint).timeout(self.timeout).json(&body))
        })
        .await?;
        parse_ollama_response(&json, texts.len())
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }
}

fn parse_ollama_response(
    json: &serde_json::Value,
    expected: usize,
) -> Result<Vec<Vec<f32>>, GatewayError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            GatewayError::InvalidResponse("Invalid Ollama response: missing embeddings array".into())
        })?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| {
                GatewayError::InvalidResponse("Invalid Ollama response: embedding is not an array".into())
            })?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }

    if result.len() != expected {
        return Err(GatewayError::InvalidResponse(format!(
            "Invalid Ollama response: expected {} embeddings, got {}",
            expected,
            result.len()
        )));
    }
    Ok(result)
}

/// Create the configured embedding provider.
pub fn create_provider(config: &Config) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let embedding = &config.embedding;
    let timeout = Duration::from_secs(embedding.timeout_secs);
    match embedding.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => {
            let client = OpenAiClient::from_config(config)?;
            Ok(Arc::new(OpenAIProvider::new(
                client,
                &embedding.model,
                embedding.batch_size,
                timeout,
            )))
        }
        "ollama" => Ok(Arc::new(OllamaProvider::new(
            &embedding.url,
            &embedding.model,
            embedding.batch_size,
            timeout,
            RetryPolicy::from_config(&config.retry),
        ))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use desk_assist::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![0.5f32, -1.0];
/// assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, na, nb), (x, y)| {
            (d + x * y, na + x * x, nb + y * y)
        });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// Scale a vector to unit length. Zero vectors are returned unchanged.
pub fn normalize(vec: &[f32]) -> Vec<f32> {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return vec.to_vec();
    }
    vec.iter().map(|v| v / norm).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_blob_roundtrip_preserves_bits() {
        let v = vec![f32::MIN_POSITIVE, -0.0, 3.25];
        assert_eq!(vec_to_blob(&v).len(), 12);
        assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
    }

    #[test]
    fn test_normalize_unit_length() {
        let n = normalize(&[3.0, 4.0]);
        assert!((n[0] - 0.6).abs() < 1e-6);
        assert!((n[1] - 0.8).abs() < 1e-6);
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        let err = DisabledProvider.embed(&["x".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[test]
    fn test_parse_ollama_counts() {
        let json = json!({"embeddings": [[0.1, 0.2], [0.3, 0.4]]});
        assert_eq!(parse_ollama_response(&json, 2).unwrap().len(), 2);
        assert!(parse_ollama_response(&json, 3).is_err());
    }
}
