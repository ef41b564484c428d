//! Heading-aware chunking of cleaned guide text.
//!
//! Lines that look like section titles (short, all caps) open a new section;
//! everything until the next title belongs to it. Sections that fit the token
//! budget become a single chunk, longer ones go through the
//! [`RecursiveSplitter`].

use std::fmt;

use thiserror::Error;
use tiktoken_rs::CoreBPE;

use crate::records::Chunk;
use crate::splitter::RecursiveSplitter;

/// Chunking tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Sections above this many tokens are split further.
    pub token_limit: usize,
    /// Maximum characters per split piece.
    pub chunk_size: usize,
    /// Characters shared between neighbouring split pieces.
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            token_limit: 512,
            chunk_size: 500,
            chunk_overlap: 100,
        }
    }
}

/// Errors surfaced while preparing the chunker.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// Size/overlap combination cannot produce progress.
    #[error("invalid chunker configuration: {0}")]
    InvalidConfig(String),
    /// The BPE tables could not be loaded.
    #[error("failed to load tokenizer: {0}")]
    Tokenizer(String),
}

/// Counts model tokens in a string.
pub trait TokenCounter: Send + Sync {
    /// Number of tokens `text` encodes to.
    fn count(&self, text: &str) -> usize;
}

/// `cl100k_base` byte-pair encoder.
pub struct Cl100kCounter {
    bpe: CoreBPE,
}

impl Cl100kCounter {
    /// Loads the bundled `cl100k_base` tables.
    pub fn new() -> Result<Self, ChunkError> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|err| ChunkError::Tokenizer(err.to_string()))?;
        Ok(Self { bpe })
    }
}

impl TokenCounter for Cl100kCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

impl fmt::Debug for Cl100kCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cl100kCounter")
    }
}

/// Raw text grouped under one detected heading, before size splitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingSection {
    /// Heading in effect (`None` before the first heading).
    pub heading: Option<String>,
    /// Trimmed, newline-joined body lines.
    pub text: String,
}

/// Returns true when `line` reads as a section title.
///
/// The trimmed line must be at least three characters drawn from upper-case
/// ASCII letters, digits, whitespace and `& - : ( )`, and contain at least
/// three letters or digits.
pub fn is_heading_line(line: &str) -> bool {
    let line = line.trim();
    if line.chars().count() < 3 {
        return false;
    }
    let allowed = |ch: char| {
        ch.is_ascii_uppercase()
            || ch.is_ascii_digit()
            || ch.is_whitespace()
            || matches!(ch, '&' | '-' | ':' | '(' | ')')
    };
    if !line.chars().all(allowed) {
        return false;
    }
    if line.to_uppercase() != line {
        return false;
    }
    let alphanumeric = line
        .chars()
        .filter(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit())
        .count();
    alphanumeric >= 3
}

/// Groups lines under the heading that precedes them.
pub fn split_sections(text: &str) -> Vec<HeadingSection> {
    let mut sections = Vec::new();
    let mut current: Option<String> = None;
    let mut buffer: Vec<&str> = Vec::new();

    for line in text.lines() {
        if is_heading_line(line) {
            flush_section(&mut sections, current.take(), &mut buffer);
            current = Some(line.trim().to_string());
        } else {
            buffer.push(line);
        }
    }
    flush_section(&mut sections, current, &mut buffer);
    sections
}

fn flush_section(
    sections: &mut Vec<HeadingSection>,
    heading: Option<String>,
    buffer: &mut Vec<&str>,
) {
    if buffer.is_empty() {
        return;
    }
    let text = buffer.join("\n").trim().to_string();
    buffer.clear();
    if !text.is_empty() {
        sections.push(HeadingSection { heading, text });
    }
}

/// Turns cleaned document text into heading-tagged chunks.
pub struct Chunker {
    config: ChunkerConfig,
    splitter: RecursiveSplitter,
    counter: Box<dyn TokenCounter>,
}

impl Chunker {
    /// Builds a chunker that counts tokens with `cl100k_base`.
    pub fn new(config: ChunkerConfig) -> Result<Self, ChunkError> {
        Self::with_counter(config, Box::new(Cl100kCounter::new()?))
    }

    /// Builds a chunker around a custom token counter.
    pub fn with_counter(
        config: ChunkerConfig,
        counter: Box<dyn TokenCounter>,
    ) -> Result<Self, ChunkError> {
        let splitter = RecursiveSplitter::new(config.chunk_size, config.chunk_overlap)?;
        Ok(Self {
            config,
            splitter,
            counter,
        })
    }

    /// Splits `text` into chunks, preserving encounter order.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for section in split_sections(text) {
            let tokens = self.counter.count(&section.text);
            if tokens > self.config.token_limit {
                let pieces = self.splitter.split_text(&section.text);
                tracing::debug!(
                    heading = section.heading.as_deref().unwrap_or("-"),
                    tokens,
                    pieces = pieces.len(),
                    "split oversized section"
                );
                chunks.extend(
                    pieces
                        .into_iter()
                        .map(|piece| Chunk::new(piece, section.heading.clone())),
                );
            } else {
                chunks.push(Chunk::new(section.text, section.heading));
            }
        }
        chunks
    }
}
