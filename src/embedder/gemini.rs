//! Google Gemini (`batchEmbedContents`) embedding client.

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{ensure_count, EmbedError, EmbeddingService};
use crate::config::ServiceConfig;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Blocking embeddings client for the Generative Language API.
///
/// Documents are sent with the `RETRIEVAL_DOCUMENT` task type and their
/// heading as title; queries use `RETRIEVAL_QUERY`.
#[derive(Clone)]
pub struct GeminiEmbedder {
    client: Client,
    endpoint: String,
    model_path: String,
}

impl GeminiEmbedder {
    /// Builds a new Gemini embeddings client.
    ///
    /// # Arguments
    /// * `config` - API key (sent as `x-goog-api-key`), model such as
    ///   `gemini-embedding-001`, optional base URL and request timeout
    pub fn new(config: &ServiceConfig) -> Result<Self, EmbedError> {
        if config.api_key().trim().is_empty() {
            return Err(EmbedError::Config("missing Gemini API key".into()));
        }
        let model = config.model_name().trim();
        if model.is_empty() {
            return Err(EmbedError::Config("missing Gemini model name".into()));
        }
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(config.api_key().trim())
                .map_err(|_| EmbedError::Config("invalid Gemini API key".into()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()?;
        let model_path = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
        let base_url = config.base_url().unwrap_or(DEFAULT_BASE_URL);
        let endpoint = format!(
            "{}/{}:batchEmbedContents",
            base_url.trim_end_matches('/'),
            model_path
        );
        Ok(Self {
            client,
            endpoint,
            model_path,
        })
    }

    fn request(&self, requests: Vec<EmbedContentRequest<'_>>) -> Result<Vec<Vec<f32>>, EmbedError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let expected = requests.len();
        let body = BatchRequest { requests };
        let resp = self.client.post(&self.endpoint).json(&body).send()?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(EmbedError::from_status(status, body));
        }
        let payload: BatchResponse = resp.json()?;
        let vectors = payload.embeddings.into_iter().map(|e| e.values).collect();
        ensure_count(vectors, expected, "Gemini")
    }

    fn content_request<'a>(
        &'a self,
        text: &'a str,
        task_type: &'static str,
        title: Option<&'a str>,
    ) -> EmbedContentRequest<'a> {
        EmbedContentRequest {
            model: &self.model_path,
            content: Content {
                parts: vec![Part { text }],
            },
            task_type,
            title: title.filter(|t| !t.trim().is_empty()),
        }
    }
}

impl EmbeddingService for GeminiEmbedder {
    fn embed_documents(&self, texts: &[&str], titles: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let requests = texts
            .iter()
            .enumerate()
            .map(|(idx, text)| {
                self.content_request(text, "RETRIEVAL_DOCUMENT", titles.get(idx).copied())
            })
            .collect();
        self.request(requests)
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.request(vec![self.content_request(text, "RETRIEVAL_QUERY", None)])?
            .pop()
            .ok_or_else(|| EmbedError::Malformed("Gemini returned no query embedding".into()))
    }
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    task_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedder() -> GeminiEmbedder {
        GeminiEmbedder::new(&ServiceConfig::new("key", "gemini-embedding-001")).expect("client")
    }

    #[test]
    fn endpoint_uses_model_path() {
        assert_eq!(
            embedder().endpoint,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-embedding-001:batchEmbedContents"
        );
    }

    #[test]
    fn document_requests_carry_title_and_task_type() {
        let embedder = embedder();
        let request = embedder.content_request("Use pooling.", "RETRIEVAL_DOCUMENT", Some("PERFORMANCE"));
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "model": "models/gemini-embedding-001",
                "content": {"parts": [{"text": "Use pooling."}]},
                "taskType": "RETRIEVAL_DOCUMENT",
                "title": "PERFORMANCE"
            })
        );
    }

    #[test]
    fn blank_titles_are_omitted() {
        let embedder = embedder();
        let request = embedder.content_request("q", "RETRIEVAL_QUERY", Some("  "));
        let body = serde_json::to_value(&request).unwrap();
        assert!(body.get("title").is_none());
    }

    #[test]
    fn missing_embeddings_parse_as_empty() {
        let parsed: BatchResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.embeddings.is_empty());
    }
}
