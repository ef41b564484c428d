//! Explicit configuration handed to each pipeline component.
//!
//! Nothing in the library reads the process environment; binaries populate
//! these structs from clap arguments (which may fall back to `GUIDERAG_*`
//! environment variables) and pass them down.

use std::time::Duration;

use clap::{Args, ValueEnum};

/// Connection settings for one external HTTP service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceConfig {
    api_key: String,
    model_name: String,
    base_url: Option<String>,
    timeout: Duration,
}

impl ServiceConfig {
    /// Builds a service config with the default 60 second timeout.
    pub fn new<K, M>(api_key: K, model_name: M) -> Self
    where
        K: Into<String>,
        M: Into<String>,
    {
        Self {
            api_key: api_key.into(),
            model_name: model_name.into(),
            base_url: None,
            timeout: Duration::from_secs(60),
        }
    }

    /// Overrides the provider's default base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Secret sent with every request.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Model identifier requested from the provider.
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Base URL override, if any.
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    /// Upper bound for a single HTTP round trip.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Tunable knobs for index building and query answering.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Minimum similarity for a retrieved chunk to be used as context.
    pub score_threshold: f32,
    /// Chunks retrieved per query before threshold filtering.
    pub top_k: usize,
    /// Chunks sent per embedding request.
    pub batch_size: usize,
    /// Attempts per embedding batch when the service reports rate limiting.
    pub retry_limit: usize,
    /// Threads embedding batches concurrently while building.
    pub workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.4,
            top_k: 8,
            batch_size: 5,
            retry_limit: 5,
            workers: 1,
        }
    }
}

/// Hosted model providers the binaries know how to reach.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    /// OpenAI or any OpenAI-compatible endpoint.
    #[value(name = "openai")]
    OpenAi,
    /// Google Gemini (Generative Language API).
    Gemini,
    /// Anthropic messages API (generation only).
    Anthropic,
}

impl Provider {
    /// Default embedding model for the provider, if it offers embeddings.
    pub fn default_embedding_model(self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("text-embedding-3-small"),
            Self::Gemini => Some("gemini-embedding-001"),
            Self::Anthropic => None,
        }
    }

    /// Default chat model for the provider.
    pub fn default_generation_model(self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o-mini",
            Self::Gemini => "gemini-2.5-flash",
            Self::Anthropic => "claude-3-5-haiku-latest",
        }
    }
}

/// Provider API keys, each read from the provider's usual environment variable.
#[derive(Args, Clone, Debug, Default)]
pub struct ApiKeys {
    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    /// Anthropic API key
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,
}

impl ApiKeys {
    /// Key configured for `provider`, ignoring blank values.
    pub fn key_for(&self, provider: Provider) -> Option<&str> {
        let key = match provider {
            Provider::OpenAi => self.openai_api_key.as_deref(),
            Provider::Gemini => self.gemini_api_key.as_deref(),
            Provider::Anthropic => self.anthropic_api_key.as_deref(),
        };
        key.filter(|key| !key.trim().is_empty())
    }
}
