//! HTTP-backed embedding provider speaking the OpenAI-compatible embeddings
//! API (§4.B contract: `text -> vector of length D`). Gated behind the
//! `openai` feature so `sqrl-core` has no HTTP dependency by default.

use super::Embedder;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Calls a single `/embeddings` endpoint over HTTPS. The raw failure
/// message (status text or transport error) is handed to the retry layer
/// for retryable/fatal classification; this type itself does not retry.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl OpenAiEmbedder {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>, dims: usize) -> Self {
        OpenAiEmbedder {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            dims,
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let body = EmbeddingRequest {
            model: &self.model,
            input: text,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Storage(format!("{status}: {body}")));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;

        parsed
            .data
            .pop()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::Storage("embedding provider returned no vectors".into()))
    }

    fn dims(&self) -> usize {
        self.dims
    }
}
