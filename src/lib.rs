#![warn(missing_docs)]
//! Core library for guiderag: heading-scoped chunking, per-heading vector
//! indexes and question answering over a single guide.

pub mod chunker;
pub mod config;
pub mod embedder;
pub mod indexer;
pub mod llm;
pub mod qa;
pub mod records;
pub mod retriever;
pub mod retry;
pub mod splitter;
pub mod vector_store;

pub use chunker::{
    is_heading_line, split_sections, ChunkError, Chunker, ChunkerConfig, Cl100kCounter,
    HeadingSection, TokenCounter,
};
pub use config::{ApiKeys, PipelineConfig, Provider, ServiceConfig};
pub use embedder::{embedder_for, EmbedError, EmbeddingService, GeminiEmbedder, OpenAiEmbedder};
pub use indexer::{build_heading_indexes, BuildError, BuiltIndex, IndexBuilder};
pub use llm::{
    generator_for, AnthropicGenerator, GeminiGenerator, GenerationError, GenerationOptions,
    OpenAiGenerator, TextGenerator,
};
pub use qa::{QaChain, QaError, QueryResult, LOW_RELEVANCE_ANSWER, NO_INDEX_ANSWER};
pub use records::{Chunk, EmbeddingRecord, RecordError, PREAMBLE_HEADING};
pub use retriever::{HeadingIndex, RetrievalError, Retriever};
pub use retry::{RetryPolicy, Retryable};
pub use splitter::RecursiveSplitter;
pub use vector_store::{
    safe_heading_name, EntryPreview, FlatIndex, IndexLayout, IndexSummary, ScoredChunk, StoreError,
};
