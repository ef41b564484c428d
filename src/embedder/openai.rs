//! OpenAI-based embedding client implementation.

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{ensure_count, EmbedError, EmbeddingService};
use crate::config::ServiceConfig;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Blocking embeddings client that talks to OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
}

impl OpenAiEmbedder {
    /// Builds a new OpenAI embeddings client.
    pub fn new(config: &ServiceConfig) -> Result<Self, EmbedError> {
        if config.api_key().trim().is_empty() {
            return Err(EmbedError::Config("missing OpenAI API key".into()));
        }
        if config.model_name().trim().is_empty() {
            return Err(EmbedError::Config("missing OpenAI model name".into()));
        }
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", config.api_key().trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| EmbedError::Config("invalid OpenAI API key".into()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()?;
        let base_url = config.base_url().unwrap_or(DEFAULT_BASE_URL);
        let endpoint = format!("{}/embeddings", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model: config.model_name().to_string(),
        })
    }

    fn request(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
        };
        let resp = self.client.post(&self.endpoint).json(&request).send()?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(EmbedError::from_status(status, body));
        }
        let mut parsed: EmbeddingResponse = resp.json()?;
        parsed.data.sort_by_key(|entry| entry.index);
        let vectors = parsed.data.into_iter().map(|entry| entry.embedding).collect();
        ensure_count(vectors, inputs.len(), "OpenAI")
    }
}

impl EmbeddingService for OpenAiEmbedder {
    fn embed_documents(&self, texts: &[&str], _titles: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.request(texts)
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.request(&[text])?
            .pop()
            .ok_or_else(|| EmbedError::Malformed("OpenAI returned no query embedding".into()))
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    #[serde(borrow)]
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
