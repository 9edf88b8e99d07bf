use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::EvaluationConfig;
use crate::error::{BacktransError, Result};

/// Sentence-embedding service, constructed once per run and passed to the evaluator
#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input text, in input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embeddings served by a local Ollama instance
pub struct OllamaEmbedder {
    client: Client,
    endpoint: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(config: &EvaluationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(BacktransError::Http)?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    /// Check that Ollama answers and has the model pulled
    pub async fn check_availability(&self) -> Result<()> {
        let url = format!("{}/api/show", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "name": self.model }))
            .send()
            .await
            .map_err(|e| BacktransError::Evaluation(format!("Failed to connect to Ollama: {}", e)))?;

        if response.status().is_success() {
            info!("Embedding model '{}' is available", self.model);
            Ok(())
        } else {
            Err(BacktransError::Evaluation(format!(
                "Embedding model '{}' not found. Please pull the model first: ollama pull {}",
                self.model, self.model
            )))
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/api/embed", self.endpoint);
        debug!("Embedding {} texts with {}", texts.len(), self.model);

        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest { model: &self.model, input: texts })
            .send()
            .await
            .map_err(|e| BacktransError::Evaluation(format!("Embedding request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(BacktransError::Evaluation(format!(
                "Ollama embedding error {}: {}", status, error_text
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| BacktransError::Evaluation(format!("Failed to parse embedding response: {}", e)))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(BacktransError::Evaluation(format!(
                "Expected {} embeddings, got {}", texts.len(), parsed.embeddings.len()
            )));
        }
        Ok(parsed.embeddings)
    }
}

/// Encode `texts` in consecutive batches of at most `batch_size`
pub async fn encode_batched(embedder: &dyn Embedder, texts: &[String], batch_size: usize) -> Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let encoded = embedder.embed(batch).await?;
        if encoded.len() != batch.len() {
            return Err(BacktransError::Evaluation(format!(
                "Embedder returned {} vectors for {} texts", encoded.len(), batch.len()
            )));
        }
        vectors.extend(encoded);
    }
    Ok(vectors)
}

/// Cosine similarity; zero vectors score 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(BacktransError::Evaluation(format!(
            "Embedding dimensions differ: {} vs {}", a.len(), b.len()
        )));
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    const EPS: f64 = 1e-12;
    Ok(dot / (norm_a.sqrt().max(EPS) * norm_b.sqrt().max(EPS)))
}
