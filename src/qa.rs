//! Heading selection, scored retrieval and grounded answer synthesis.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::config::PipelineConfig;
use crate::embedder::EmbeddingService;
use crate::llm::{GenerationError, TextGenerator};
use crate::retriever::{RetrievalError, Retriever};
use crate::vector_store::{read_heading_list, StoreError};

/// Answer returned when the selected heading has no index.
pub const NO_INDEX_ANSWER: &str = "No index found for this heading.";
/// Answer returned when every retrieved chunk scores below the threshold.
pub const LOW_RELEVANCE_ANSWER: &str = "No relevant context found above score threshold.";
/// Characters of each context chunk echoed back as a source preview.
pub const SOURCE_PREVIEW_CHARS: usize = 200;

/// Errors that abort a query.
#[derive(Debug, Error)]
pub enum QaError {
    /// Heading selection or answer generation failed.
    #[error(transparent)]
    Generation(#[from] GenerationError),
    /// Index loading or query embedding failed.
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    /// Heading list could not be read.
    #[error("failed to read heading list: {0}")]
    Headings(#[from] StoreError),
}

/// Outcome of one question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// Heading the question was routed to.
    pub heading: String,
    /// Generated answer or a fixed explanatory message.
    pub answer: String,
    /// Leading characters of every context chunk, in retrieval order.
    pub sources: Vec<String>,
}

impl QueryResult {
    fn without_sources(heading: String, answer: &str) -> Self {
        Self {
            heading,
            answer: answer.to_string(),
            sources: Vec::new(),
        }
    }
}

/// Routes questions to one heading index and answers from its chunks.
///
/// Each call to [`QaChain::answer_query`] opens its own index handle, so one
/// chain can serve concurrent callers.
pub struct QaChain {
    headings: Vec<String>,
    retriever: Retriever<Arc<dyn EmbeddingService>>,
    generator: Arc<dyn TextGenerator>,
    score_threshold: f32,
    top_k: usize,
}

impl QaChain {
    /// Chain over indexes under `base_dir` with an explicit heading list.
    pub fn new(
        headings: Vec<String>,
        base_dir: impl Into<PathBuf>,
        embedder: Arc<dyn EmbeddingService>,
        generator: Arc<dyn TextGenerator>,
        config: &PipelineConfig,
    ) -> Self {
        let headings = headings
            .into_iter()
            .map(|heading| heading.trim().to_string())
            .filter(|heading| !heading.is_empty())
            .collect();
        Self {
            headings,
            retriever: Retriever::new(base_dir, embedder),
            generator,
            score_threshold: config.score_threshold,
            top_k: config.top_k,
        }
    }

    /// Chain whose heading list is read from `headings_path`.
    pub fn from_heading_file(
        headings_path: &Path,
        base_dir: impl Into<PathBuf>,
        embedder: Arc<dyn EmbeddingService>,
        generator: Arc<dyn TextGenerator>,
        config: &PipelineConfig,
    ) -> Result<Self, QaError> {
        let headings = read_heading_list(headings_path)?;
        tracing::info!(
            path = %headings_path.display(),
            headings = headings.len(),
            "heading list loaded"
        );
        Ok(Self::new(headings, base_dir, embedder, generator, config))
    }

    /// Known headings, in file order.
    pub fn headings(&self) -> &[String] {
        &self.headings
    }

    /// Asks the generator which heading best matches `query` and returns its
    /// trimmed reply.
    pub fn select_heading(&self, query: &str) -> Result<String, QaError> {
        let reply = self.generator.generate(&heading_prompt(&self.headings, query))?;
        Ok(reply.trim().to_string())
    }

    /// Maps a generator reply onto a known heading.
    ///
    /// Exact matches win; otherwise case, surrounding quotes and repeated
    /// whitespace are ignored. Unmatched replies are returned unchanged.
    pub fn resolve_heading(&self, reply: &str) -> String {
        if let Some(exact) = self.headings.iter().find(|h| h.as_str() == reply) {
            return exact.clone();
        }
        let wanted = normalize_heading(reply);
        match self
            .headings
            .iter()
            .find(|heading| normalize_heading(heading) == wanted)
        {
            Some(heading) => heading.clone(),
            None => {
                tracing::warn!(reply, "heading reply matches no known heading");
                reply.to_string()
            }
        }
    }

    /// Answers `query` from the best matching heading's index.
    ///
    /// A missing index or a retrieval with nothing above the score threshold
    /// yields a result with a fixed message and no sources; service failures
    /// are returned as errors.
    pub fn answer_query(&self, query: &str) -> Result<QueryResult, QaError> {
        let reply = self.select_heading(query)?;
        let heading = self.resolve_heading(&reply);
        tracing::info!(%heading, "heading selected");

        let index = match self.retriever.open_heading_index(&heading) {
            Ok(index) => index,
            Err(RetrievalError::IndexNotFound { dir, .. }) => {
                tracing::warn!(%heading, dir = %dir.display(), "no index for heading");
                return Ok(QueryResult::without_sources(heading, NO_INDEX_ANSWER));
            }
            Err(err) => return Err(err.into()),
        };

        let hits = self.retriever.search(&index, query, self.top_k)?;
        for hit in &hits {
            tracing::debug!(score = hit.score, "retrieved chunk");
        }
        let kept: Vec<String> = hits
            .into_iter()
            .filter(|hit| hit.score >= self.score_threshold)
            .map(|hit| hit.chunk.content)
            .collect();
        if kept.is_empty() {
            tracing::info!(%heading, threshold = self.score_threshold, "no chunk above threshold");
            return Ok(QueryResult::without_sources(heading, LOW_RELEVANCE_ANSWER));
        }
        tracing::info!(%heading, chunks = kept.len(), "generating answer");

        let context = kept.join("\n\n");
        let answer = self.generator.generate(&answer_prompt(query, &context))?;
        let sources = kept
            .iter()
            .map(|content| content.chars().take(SOURCE_PREVIEW_CHARS).collect())
            .collect();
        Ok(QueryResult {
            heading,
            answer: answer.trim().to_string(),
            sources,
        })
    }
}

fn normalize_heading(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '`'))
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn heading_prompt(headings: &[String], query: &str) -> String {
    format!(
        "You are routing questions inside a retrieval pipeline.\n\
         The document is split into sections with the following headings:\n\n\
         {}\n\n\
         Given the user query:\n'{}'\n\n\
         Choose the single most relevant heading from the list above.\n\
         Respond with ONLY the heading text, exactly as written, nothing else.",
        headings.join("\n"),
        query
    )
}

fn answer_prompt(query: &str, context: &str) -> String {
    format!(
        "Answer the following question based on the provided context and give \
         step-by-step instructions the user can follow to implement any solution found.\n\
         If the answer is not in the context, say so.\n\n\
         Question:\n{query}\n\n\
         Context:\n{context}\n\n\
         Answer:"
    )
}
