//! OpenAI chat completions generator.

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{ensure_success, non_empty, GenerationError, GenerationOptions, TextGenerator};
use crate::config::ServiceConfig;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Blocking client for OpenAI-compatible `/chat/completions` endpoints.
pub struct OpenAiGenerator {
    client: Client,
    endpoint: String,
    model: String,
    options: GenerationOptions,
}

impl OpenAiGenerator {
    /// Builds a new chat client.
    pub fn new(config: &ServiceConfig) -> Result<Self, GenerationError> {
        if config.api_key().trim().is_empty() {
            return Err(GenerationError::Config("missing OpenAI API key".into()));
        }
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", config.api_key().trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| GenerationError::Config("invalid OpenAI API key".into()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()?;
        let base_url = config.base_url().unwrap_or(DEFAULT_BASE_URL);
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: config.model_name().to_string(),
            options: GenerationOptions::default(),
        })
    }

    /// Overrides temperature and token limit.
    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    fn request_body<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        }
    }
}

impl TextGenerator for OpenAiGenerator {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&self.request_body(prompt))
            .send()?;
        let parsed: ChatResponse = ensure_success(resp, "OpenAI")?.json()?;
        let answer = parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .unwrap_or_default();
        non_empty(answer, "OpenAI")
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}
