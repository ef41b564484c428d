//! Text generation providers used for heading selection and answer synthesis.

use std::sync::Arc;

use reqwest::blocking::Response;
use thiserror::Error;

use crate::config::{Provider, ServiceConfig};

pub mod anthropic;
pub mod gemini;
pub mod openai;

pub use anthropic::AnthropicGenerator;
pub use gemini::GeminiGenerator;
pub use openai::OpenAiGenerator;

/// Errors raised by a generation call.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Provider answered with a non-success status.
    #[error("{provider} returned {status}: {body}")]
    Status {
        /// Provider name.
        provider: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// Request could not be sent or its body decoded.
    #[error("generation request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Response parsed but carried no usable text.
    #[error("malformed generation response: {0}")]
    Malformed(String),
    /// Client could not be configured.
    #[error("invalid generation configuration: {0}")]
    Config(String),
}

/// One-shot prompt completion.
pub trait TextGenerator: Send + Sync {
    /// Returns the model's reply to `prompt`.
    fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

impl<T: TextGenerator + ?Sized> TextGenerator for Arc<T> {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        (**self).generate(prompt)
    }
}

/// Sampling options shared by every provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_tokens: usize,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 1024,
        }
    }
}

/// Builds the generation client for `provider` with the given sampling options.
pub fn generator_for(
    provider: Provider,
    config: &ServiceConfig,
    options: GenerationOptions,
) -> Result<Arc<dyn TextGenerator>, GenerationError> {
    let generator: Arc<dyn TextGenerator> = match provider {
        Provider::OpenAi => Arc::new(OpenAiGenerator::new(config)?.with_options(options)),
        Provider::Gemini => Arc::new(GeminiGenerator::new(config)?.with_options(options)),
        Provider::Anthropic => Arc::new(AnthropicGenerator::new(config)?.with_options(options)),
    };
    Ok(generator)
}

fn ensure_success(resp: Response, provider: &'static str) -> Result<Response, GenerationError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp
        .text()
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    Err(GenerationError::Status {
        provider,
        status: status.as_u16(),
        body,
    })
}

fn non_empty(answer: String, provider: &str) -> Result<String, GenerationError> {
    if answer.trim().is_empty() {
        return Err(GenerationError::Malformed(format!(
            "{provider} response missing text content"
        )));
    }
    Ok(answer)
}
