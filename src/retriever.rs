//! On-demand loading and scored search of heading indexes.
//!
//! [`Retriever::open_heading_index`] returns an immutable [`HeadingIndex`]
//! handle that can be searched from any thread. The single-slot API
//! ([`Retriever::load_heading_index`], [`Retriever::query`],
//! [`Retriever::query_with_scores`]) keeps at most one loaded index and
//! replaces it on every successful load.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::embedder::{EmbedError, EmbeddingService};
use crate::records::Chunk;
use crate::vector_store::{FlatIndex, IndexLayout, ScoredChunk, StoreError, INDEX_FILE};

/// Errors raised by retrieval.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The heading has no persisted index file.
    #[error("no index found for heading {heading:?} (expected {})", dir.display())]
    IndexNotFound {
        /// Requested heading.
        heading: String,
        /// Directory that was checked.
        dir: PathBuf,
    },
    /// A query was issued before any index was loaded.
    #[error("no heading index loaded; call load_heading_index first")]
    NotLoaded,
    /// The index directory exists but could not be read.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The query text could not be embedded.
    #[error("failed to embed query: {0}")]
    Embed(#[from] EmbedError),
}

/// Read-only handle to one heading's loaded index.
#[derive(Debug, Clone)]
pub struct HeadingIndex {
    heading: String,
    index: Arc<FlatIndex>,
}

impl HeadingIndex {
    /// Heading this index was opened for.
    pub fn heading(&self) -> &str {
        &self.heading
    }

    /// Number of chunks in the index.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when the index stores nothing.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Top-`k` chunks for an already embedded query.
    pub fn search_vector(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        self.index.search(query, k)
    }
}

/// Loads heading indexes from disk and answers similarity queries.
pub struct Retriever<E> {
    layout: IndexLayout,
    embedder: E,
    active: Option<HeadingIndex>,
}

impl<E: EmbeddingService> Retriever<E> {
    /// Retriever over indexes stored under `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>, embedder: E) -> Self {
        Self {
            layout: IndexLayout::new(base_dir),
            embedder,
            active: None,
        }
    }

    /// Opens `heading`'s index without touching the loaded slot.
    ///
    /// Headings whose safe name does not address a directory under the base,
    /// and directories without an index file, are reported as
    /// [`RetrievalError::IndexNotFound`].
    pub fn open_heading_index(&self, heading: &str) -> Result<HeadingIndex, RetrievalError> {
        let dir = match self.layout.checked_heading_dir(heading) {
            Some(dir) if dir.join(INDEX_FILE).is_file() => dir,
            other => {
                return Err(RetrievalError::IndexNotFound {
                    heading: heading.to_string(),
                    dir: other.unwrap_or_else(|| self.layout.heading_dir(heading)),
                })
            }
        };
        let index = FlatIndex::load(&dir)?;
        tracing::debug!(heading, chunks = index.len(), "heading index loaded");
        Ok(HeadingIndex {
            heading: heading.to_string(),
            index: Arc::new(index),
        })
    }

    /// Loads `heading`'s index into the slot, discarding the previous one.
    /// On failure the previously loaded index stays active.
    pub fn load_heading_index(&mut self, heading: &str) -> Result<(), RetrievalError> {
        let index = self.open_heading_index(heading)?;
        self.active = Some(index);
        Ok(())
    }

    /// Index currently held in the slot.
    pub fn active(&self) -> Option<&HeadingIndex> {
        self.active.as_ref()
    }

    /// Top-`k` chunks from the loaded index.
    pub fn query(&self, text: &str, k: usize) -> Result<Vec<Chunk>, RetrievalError> {
        Ok(self
            .query_with_scores(text, k)?
            .into_iter()
            .map(|hit| hit.chunk)
            .collect())
    }

    /// Top-`k` chunks with similarity scores from the loaded index. Scores are
    /// not filtered.
    pub fn query_with_scores(&self, text: &str, k: usize) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let index = self.active.as_ref().ok_or(RetrievalError::NotLoaded)?;
        self.search(index, text, k)
    }

    /// Embeds `text` and searches `index`.
    pub fn search(
        &self,
        index: &HeadingIndex,
        text: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let query = self.embedder.embed_query(text)?;
        Ok(index.search_vector(&query, k)?)
    }
}
