use crate::error::EmbeddingError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Converts text into fixed-dimension vectors. Batch embedding is preferred
/// whenever more than one text is in hand.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Order-preserving; the output has exactly one vector per input text.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

#[async_trait]
impl<T: Embedder + ?Sized> Embedder for Box<T> {
    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        (**self).embed_one(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        (**self).embed_batch(texts).await
    }
}

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Client for an OpenAI-style `/embeddings` endpoint.
///
/// Retries upstream failures with exponential backoff; a dimension mismatch
/// is fatal immediately and is never truncated or padded over. Empty input
/// text embeds to a zero vector without an upstream call.
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            dimensions,
        }
    }

    async fn request_embeddings(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut backoff = INITIAL_BACKOFF;
        let mut last_failure = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            match self.try_request(inputs).await {
                Ok(vectors) => return Ok(vectors),
                Err(fatal @ EmbeddingError::DimensionMismatch { .. }) => return Err(fatal),
                Err(error) => {
                    warn!(attempt, %error, "embedding request failed");
                    last_failure = error.to_string();
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        }

        Err(EmbeddingError::Upstream {
            attempts: MAX_ATTEMPTS,
            details: last_failure,
        })
    }

    async fn try_request(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "input": inputs,
                "encoding_format": "float",
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EmbeddingError::MalformedResponse(format!(
                "embedding service returned {}",
                response.status()
            )));
        }

        let parsed: Value = response.json().await?;
        let rows = parsed
            .pointer("/data")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                EmbeddingError::MalformedResponse("missing data array".to_string())
            })?;

        if rows.len() != inputs.len() {
            return Err(EmbeddingError::MalformedResponse(format!(
                "requested {} embeddings, got {}",
                inputs.len(),
                rows.len()
            )));
        }

        let mut vectors = Vec::with_capacity(rows.len());
        for row in rows {
            let values = row
                .pointer("/embedding")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    EmbeddingError::MalformedResponse("missing embedding values".to_string())
                })?;

            let vector: Vec<f32> = values
                .iter()
                .filter_map(Value::as_f64)
                .map(|value| value as f32)
                .collect();

            if vector.len() != self.dimensions {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: vector.len(),
                });
            }

            vectors.push(vector);
        }

        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            warn!("attempted to embed empty text");
            return Ok(vec![0f32; self.dimensions]);
        }

        let mut vectors = self.request_embeddings(&[text]).await?;
        Ok(vectors.remove(0))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // Empty texts never go upstream; they keep their slot as zero vectors
        // so callers can zip results back onto chunks positionally.
        let nonempty: Vec<(usize, &str)> = texts
            .iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(position, text)| (position, text.as_str()))
            .collect();

        let mut vectors = vec![vec![0f32; self.dimensions]; texts.len()];

        if !nonempty.is_empty() {
            let inputs: Vec<&str> = nonempty.iter().map(|(_, text)| *text).collect();
            let embedded = self.request_embeddings(&inputs).await?;
            for ((position, _), vector) in nonempty.into_iter().zip(embedded) {
                vectors[position] = vector;
            }
        }

        debug!(count = vectors.len(), "generated embeddings");
        Ok(vectors)
    }
}

/// Deterministic character-trigram hashing embedder. No network, stable
/// across runs; backs tests and the CLI's offline mode.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    pub dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dimensions: 256 }
    }
}

impl HashingEmbedder {
    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() || text.trim().is_empty() {
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
impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_sync(text)).collect())
    }
}
