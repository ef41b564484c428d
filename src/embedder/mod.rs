//! Embedding service clients.
//!
//! Every client maps HTTP 429 to [`EmbedError::RateLimited`] so the index
//! builder can retry on the error variant instead of inspecting messages.

pub mod gemini;
pub mod openai;

use std::sync::Arc;

use reqwest::StatusCode;
use thiserror::Error;

use crate::config::{Provider, ServiceConfig};
use crate::retry::Retryable;

pub use gemini::GeminiEmbedder;
pub use openai::OpenAiEmbedder;

/// Failures reported by embedding clients.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The service asked us to slow down.
    #[error("embedding service rate limited the request ({status}): {body}")]
    RateLimited {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
    /// Any other non-success response.
    #[error("embedding service returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
    /// Connection, timeout or body transfer failure.
    #[error("embedding request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The response did not contain what was asked for.
    #[error("unexpected embedding response: {0}")]
    Malformed(String),
    /// The client could not be constructed.
    #[error("invalid embedding client configuration: {0}")]
    Config(String),
}

impl EmbedError {
    /// Classifies a failed HTTP response.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS {
            Self::RateLimited {
                status: status.as_u16(),
                body,
            }
        } else {
            Self::Status {
                status: status.as_u16(),
                body,
            }
        }
    }

    /// True for [`EmbedError::RateLimited`].
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

impl Retryable for EmbedError {
    fn is_retryable(&self) -> bool {
        self.is_rate_limited()
    }
}

/// Computes embedding vectors for documents and queries.
pub trait EmbeddingService: Send + Sync {
    /// Embeds a batch of documents; `titles` pairs each text with its heading.
    /// Returns one vector per input, in input order.
    fn embed_documents(&self, texts: &[&str], titles: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Embeds a search query.
    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

impl<T: EmbeddingService + ?Sized> EmbeddingService for Arc<T> {
    fn embed_documents(&self, texts: &[&str], titles: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        (**self).embed_documents(texts, titles)
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        (**self).embed_query(text)
    }
}

/// Builds the embedding client for `provider`.
pub fn embedder_for(
    provider: Provider,
    config: &ServiceConfig,
) -> Result<Arc<dyn EmbeddingService>, EmbedError> {
    match provider {
        Provider::OpenAi => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        Provider::Gemini => Ok(Arc::new(GeminiEmbedder::new(config)?)),
        Provider::Anthropic => Err(EmbedError::Config(
            "Anthropic does not offer an embeddings API".into(),
        )),
    }
}

fn ensure_count<T>(items: Vec<T>, expected: usize, service: &str) -> Result<Vec<T>, EmbedError> {
    if items.len() != expected {
        return Err(EmbedError::Malformed(format!(
            "{service} returned {} embeddings for {expected} inputs",
            items.len()
        )));
    }
    Ok(items)
}
