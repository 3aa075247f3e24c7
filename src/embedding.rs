//! Embedding capability interface and implementations.
//!
//! The pipeline only depends on the [`Embedder`] trait: text in, fixed-
//! dimension vector out. Two providers ship with the crate:
//!
//! - **[`HashEmbedder`]** — deterministic, dependency-free vectors
//!   derived from a SHA-256 digest. No semantic meaning, but identical
//!   text always maps to the identical unit vector, which makes it the
//!   provider of choice for tests and offline development.
//! - **[`HttpEmbedder`]** — an OpenAI-compatible `POST /v1/embeddings`
//!   client with timeout and transient/fatal error classification.
//!   Retry with backoff is owned by the caller (see [`crate::retry`]).
//!
//! Also provides the BLOB codec used to persist vectors in SQLite and
//! the cosine similarity used at query time.

use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::EmbeddingConfig;
use crate::error::MeshError;

/// Maps a text segment to a fixed-length dense vector.
///
/// Implementations must be dimension-stable: every vector returned has
/// exactly `dims()` components for the lifetime of the instance.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier recorded alongside each stored vector.
    fn model(&self) -> &str;

    /// Vector dimensionality.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MeshError>;
}

/// Select an embedder from configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>, MeshError> {
    match config.provider.as_str() {
        "hash" => Ok(Box::new(HashEmbedder::new(config.dims))),
        "http" => Ok(Box::new(HttpEmbedder::new(config)?)),
        other => Err(MeshError::Config(format!(
            "unknown embedding provider '{}'",
            other
        ))),
    }
}

// ============ Hash provider ============

/// Deterministic digest-based embedding.
///
/// Fills the vector from successive SHA-256 blocks of `(text, block)`
/// and normalizes to unit length, so cosine similarity of identical
/// text is exactly 1.0.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut values = Vec::with_capacity(self.dims);
        let mut block: u32 = 0;
        while values.len() < self.dims {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(block.to_le_bytes());
            for byte in hasher.finalize() {
                if values.len() == self.dims {
                    break;
                }
                values.push(byte as f32 / 255.0 - 0.5);
            }
            block += 1;
        }

        let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut values {
                *v /= norm;
            }
        }
        values
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model(&self) -> &str {
        "hash-v1"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MeshError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ============ HTTP provider ============

/// OpenAI-compatible embeddings API client.
///
/// Requires `OPENAI_API_KEY` in the environment. A single call maps the
/// whole batch; error classification follows the usual rules: 429 and
/// 5xx are transient, other 4xx are fatal, network errors are transient.
pub struct HttpEmbedder {
    endpoint: String,
    model: String,
    dims: usize,
    api_key: String,
    client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, MeshError> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| MeshError::Config("embedding.model required for http provider".into()))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| MeshError::Config("OPENAI_API_KEY environment variable not set".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MeshError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            model,
            dims: config.dims,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MeshError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| MeshError::Transient(format!("embedding request failed: {}", e)))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(MeshError::Transient(format!(
                "embedding API {}: {}",
                status, text
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MeshError::Capability(format!(
                "embedding API {}: {}",
                status, text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MeshError::Capability(format!("invalid embedding response: {}", e)))?;
        parse_embedding_response(&json, texts.len(), self.dims)
    }
}

fn parse_embedding_response(
    json: &serde_json::Value,
    expected_count: usize,
    expected_dims: usize,
) -> Result<Vec<Vec<f32>>, MeshError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| MeshError::Capability("embedding response missing data array".into()))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let values = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| MeshError::Capability("embedding response missing vector".into()))?;
        let vec: Vec<f32> = values
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        if vec.len() != expected_dims {
            return Err(MeshError::Capability(format!(
                "embedding dimension mismatch: got {}, expected {}",
                vec.len(),
                expected_dims
            )));
        }
        embeddings.push(vec);
    }

    if embeddings.len() != expected_count {
        return Err(MeshError::Capability(format!(
            "embedding count mismatch: got {}, expected {}",
            embeddings.len(),
            expected_count
        )));
    }
    Ok(embeddings)
}

// ============ Vector codec & similarity ============

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

/// Cosine similarity in `[-1.0, 1.0]`; 0.0 for empty or mismatched
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_embedder_deterministic() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed(&["Acme Corp roadmap".to_string()]).await.unwrap();
        let b = embedder.embed(&["Acme Corp roadmap".to_string()]).await.unwrap();
        assert_eq!(a, b);
        assert!((cosine_similarity(&a[0], &b[0]) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_hash_embedder_dims_and_norm() {
        let embedder = HashEmbedder::new(100);
        let vecs = embedder.embed(&["some text".to_string()]).await.unwrap();
        assert_eq!(vecs[0].len(), 100);
        let norm: f32 = vecs[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_hash_embedder_distinct_texts_differ() {
        let embedder = HashEmbedder::new(64);
        let vecs = embedder
            .embed(&["alpha".to_string(), "beta".to_string()])
            .await
            .unwrap();
        assert!(cosine_similarity(&vecs[0], &vecs[1]) < 0.999);
    }

    #[test]
    fn test_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_basics() {
        let a = vec![1.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&a, &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_parse_response_rejects_dim_mismatch() {
        let json = serde_json::json!({
            "data": [{"embedding": [0.1, 0.2]}]
        });
        let result = parse_embedding_response(&json, 1, 3);
        assert!(matches!(result, Err(MeshError::Capability(_))));
    }

    #[test]
    fn test_parse_response_ok() {
        let json = serde_json::json!({
            "data": [
                {"embedding": [0.1, 0.2, 0.3]},
                {"embedding": [0.4, 0.5, 0.6]}
            ]
        });
        let vecs = parse_embedding_response(&json, 2, 3).unwrap();
        assert_eq!(vecs.len(), 2);
        assert!((vecs[1][0] - 0.4).abs() < 1e-6);
    }
}
