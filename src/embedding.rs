//! Embedding gateway abstraction and implementations.
//!
//! The engine treats the embedding model as an external collaborator behind
//! the [`EmbeddingGateway`] trait:
//! - **[`HttpEmbedder`]** — calls an OpenAI-style `/embeddings` endpoint with
//!   batching, retry, and exponential backoff.
//! - **[`MockEmbedder`]** — deterministic hash-derived vectors for tests.
//!
//! Also provides vector utilities:
//! - [`cosine_distance`] / [`cosine_similarity`] for ranking
//! - [`vec_to_blob`] / [`blob_to_vec`] for SQLite BLOB storage (little-endian
//!   f32 bytes)
//!
//! # Retry strategy
//!
//! HTTP 429 and 5xx responses and network errors are retried with exponential
//! backoff (1s, 2s, 4s, ... capped at 2^5); other 4xx responses fail
//! immediately.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::errors::EngineError;

/// Text → fixed-length vector, in batch. Implementations must preserve input
/// order in the output.
#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError>;

    /// Model identifier, e.g. `"text-embedding-3-small"`.
    fn model_name(&self) -> &str;

    /// Vector dimensionality.
    fn dims(&self) -> usize;
}

/// Create the configured gateway. The `"disabled"` provider builds fine but
/// fails on first use, so commands that never embed (stats, purge) still run.
pub fn create_gateway(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingGateway>, EngineError> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(HttpEmbedder::new(config)?)),
        "mock" => Ok(Box::new(MockEmbedder::new(config.dims.unwrap_or(64)))),
        "disabled" => Ok(Box::new(DisabledEmbedder)),
        other => Err(EngineError::Config(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

/// Placeholder for unconfigured deployments. Every embed call fails with a
/// pointer at the config section to fix.
pub struct DisabledEmbedder;

#[async_trait]
impl EmbeddingGateway for DisabledEmbedder {
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        Err(EngineError::Config(
            "embedding provider is disabled; set [embedding] provider in config".to_string(),
        ))
    }

    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }
}

// ============ HTTP provider ============

/// Embedding gateway for OpenAI-compatible `/embeddings` endpoints.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EngineError> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| EngineError::Config("embedding.model required".to_string()))?;
        let dims = config
            .dims
            .ok_or_else(|| EngineError::Config("embedding.dims required".to_string()))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(EngineError::Config(
                "OPENAI_API_KEY environment variable not set".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::Embedding(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model,
            dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingGateway for HttpEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| EngineError::Config("OPENAI_API_KEY not set".to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/embeddings", self.base_url))
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| EngineError::Embedding(e.to_string()))?;
                        return parse_embedding_response(&json);
                    }

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(EngineError::Embedding(format!(
                            "embeddings API error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    // Other client errors: don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(EngineError::Embedding(format!(
                        "embeddings API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(EngineError::Embedding(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| EngineError::Embedding("embedding failed after retries".into())))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EngineError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EngineError::Embedding("invalid response: missing data array".into()))?;

    let mut embeddings = Vec::with_capacity(data.len());

    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EngineError::Embedding("invalid response: missing embedding".into()))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        embeddings.push(vec);
    }

    Ok(embeddings)
}

// ============ Mock provider ============

/// Deterministic embedding gateway for tests.
///
/// Derives each vector from the SHA-256 of the text, so identical texts map
/// to identical vectors and different texts almost surely do not. Vectors are
/// L2-normalized so cosine distances behave like the real thing.
pub struct MockEmbedder {
    dims: usize,
}

impl MockEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl EmbeddingGateway for MockEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        Ok(texts.iter().map(|t| hash_vector(t, self.dims)).collect())
    }

    fn model_name(&self) -> &str {
        "mock"
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

fn hash_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut vec = Vec::with_capacity(dims);
    let mut counter: u32 = 0;
    while vec.len() < dims {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(counter.to_le_bytes());
        let digest = hasher.finalize();
        for pair in digest.chunks_exact(2) {
            if vec.len() == dims {
                break;
            }
            let raw = u16::from_le_bytes([pair[0], pair[1]]);
            vec.push(raw as f32 / u16::MAX as f32 - 0.5);
        }
        counter += 1;
    }

    // L2-normalize
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut vec {
            *v /= norm;
        }
    }
    vec
}

// ============ Vector utilities ============

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1, 1]`. Returns 0.0 for empty or mismatched
/// vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Cosine distance: `1 - similarity`, so 0.0 is an exact match.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - cosine_similarity(a, b) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_distance(&v, &v).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[tokio::test]
    async fn test_mock_embedder_deterministic() {
        let gateway = MockEmbedder::new(32);
        let inputs = vec![
            "hello world".to_string(),
            "goodbye world".to_string(),
            "hello world".to_string(),
        ];
        let a = gateway.embed_batch(&inputs).await.unwrap();
        let b = gateway.embed_batch(&inputs).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(a[0], a[2], "identical text, identical vector");
        assert_ne!(a[0], a[1], "different text, different vector");
        assert_eq!(a[0].len(), 32);
    }

    #[tokio::test]
    async fn test_mock_embedder_normalized() {
        let gateway = MockEmbedder::new(48);
        let v = &gateway
            .embed_batch(&["some text".to_string()])
            .await
            .unwrap()[0];
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }
}
