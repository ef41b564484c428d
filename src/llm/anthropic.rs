//! Anthropic messages API generator.

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{ensure_success, non_empty, GenerationError, GenerationOptions, TextGenerator};
use crate::config::ServiceConfig;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// Blocking client for `/v1/messages`.
pub struct AnthropicGenerator {
    client: Client,
    endpoint: String,
    model: String,
    options: GenerationOptions,
}

impl AnthropicGenerator {
    /// Builds a new messages client.
    pub fn new(config: &ServiceConfig) -> Result<Self, GenerationError> {
        if config.api_key().trim().is_empty() {
            return Err(GenerationError::Config("missing Anthropic API key".into()));
        }
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(config.api_key().trim())
                .map_err(|_| GenerationError::Config("invalid Anthropic API key".into()))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()?;
        let base_url = config.base_url().unwrap_or(DEFAULT_BASE_URL);
        Ok(Self {
            client,
            endpoint: format!("{}/messages", base_url.trim_end_matches('/')),
            model: config.model_name().to_string(),
            options: GenerationOptions::default(),
        })
    }

    /// Overrides temperature and token limit.
    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }
}

impl TextGenerator for AnthropicGenerator {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = AnthropicRequest {
            model: &self.model,
            max_tokens: self.options.max_tokens,
            temperature: self.options.temperature,
            messages: vec![AnthropicMessage {
                role: "user",
                content: vec![AnthropicContentBlock {
                    kind: "text",
                    text: prompt,
                }],
            }],
        };
        let resp = self.client.post(&self.endpoint).json(&body).send()?;
        let parsed: AnthropicResponse = ensure_success(resp, "Anthropic")?.json()?;
        non_empty(collect_text(parsed), "Anthropic")
    }
}

fn collect_text(response: AnthropicResponse) -> String {
    response
        .content
        .into_iter()
        .filter_map(|block| match block {
            AnthropicResponseBlock::Text { text } => Some(text),
            AnthropicResponseBlock::Other => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    temperature: f32,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: Vec<AnthropicContentBlock<'a>>,
}

#[derive(Serialize)]
struct AnthropicContentBlock<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}
