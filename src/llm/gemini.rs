//! Google Gemini `generateContent` generator.

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{ensure_success, non_empty, GenerationError, GenerationOptions, TextGenerator};
use crate::config::ServiceConfig;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Blocking client for the Generative Language `generateContent` method.
pub struct GeminiGenerator {
    client: Client,
    endpoint: String,
    options: GenerationOptions,
}

impl GeminiGenerator {
    /// Builds a new Gemini generation client.
    pub fn new(config: &ServiceConfig) -> Result<Self, GenerationError> {
        if config.api_key().trim().is_empty() {
            return Err(GenerationError::Config("missing Gemini API key".into()));
        }
        let model = config.model_name().trim();
        if model.is_empty() {
            return Err(GenerationError::Config("missing Gemini model name".into()));
        }
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(config.api_key().trim())
                .map_err(|_| GenerationError::Config("invalid Gemini API key".into()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()?;
        let model = model.strip_prefix("models/").unwrap_or(model);
        let base_url = config.base_url().unwrap_or(DEFAULT_BASE_URL);
        Ok(Self {
            client,
            endpoint: format!(
                "{}/models/{}:generateContent",
                base_url.trim_end_matches('/'),
                model
            ),
            options: GenerationOptions::default(),
        })
    }

    /// Overrides temperature and token limit.
    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    fn request_body<'a>(&self, prompt: &'a str) -> GenerateRequest<'a> {
        GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.options.temperature,
                max_output_tokens: self.options.max_tokens,
            },
        }
    }
}

impl TextGenerator for GeminiGenerator {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&self.request_body(prompt))
            .send()?;
        let parsed: GenerateResponse = ensure_success(resp, "Gemini")?.json()?;
        non_empty(first_candidate_text(parsed), "Gemini")
    }
}

fn first_candidate_text(response: GenerateResponse) -> String {
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}
