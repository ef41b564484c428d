//! Recursive character splitter that prefers coarse boundaries.
//!
//! Text is cut on the first separator that occurs in it (paragraph, then
//! line, then word, then single characters). Pieces still longer than the
//! chunk size are split again with the finer separators, and neighbouring
//! small pieces are merged back up to the chunk size with a character overlap.

use std::collections::VecDeque;

use crate::chunker::ChunkError;

/// Separators tried in priority order; the empty separator splits per character.
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Character-budgeted splitter with tail overlap between neighbouring pieces.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveSplitter {
    /// Builds a splitter; `chunk_overlap` must be smaller than `chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ChunkError> {
        if chunk_size == 0 {
            return Err(ChunkError::InvalidConfig("chunk size must be positive".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(ChunkError::InvalidConfig(format!(
                "chunk overlap {chunk_overlap} must be smaller than chunk size {chunk_size}"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Splits `text` into trimmed, non-empty pieces.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_with(text, &self.separators)
    }

    fn split_with(&self, text: &str, separators: &[String]) -> Vec<String> {
        let (separator, finer) = pick_separator(text, separators);
        let mut pieces = Vec::new();
        let mut small: Vec<&str> = Vec::new();

        for split in split_keep_separator(text, separator) {
            if char_len(split) < self.chunk_size {
                small.push(split);
                continue;
            }
            if !small.is_empty() {
                pieces.extend(self.merge(&small));
                small.clear();
            }
            if finer.is_empty() {
                let trimmed = split.trim();
                if !trimmed.is_empty() {
                    pieces.push(trimmed.to_string());
                }
            } else {
                pieces.extend(self.split_with(split, finer));
            }
        }
        if !small.is_empty() {
            pieces.extend(self.merge(&small));
        }
        pieces
    }

    fn merge(&self, splits: &[&str]) -> Vec<String> {
        let mut docs = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &split in splits {
            let len = char_len(split);
            if total + len > self.chunk_size && !window.is_empty() {
                push_joined(&mut docs, &window);
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }
            window.push_back(split);
            total += len;
        }
        push_joined(&mut docs, &window);
        docs
    }
}

fn push_joined(docs: &mut Vec<String>, window: &VecDeque<&str>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

fn pick_separator<'a>(text: &str, separators: &'a [String]) -> (&'a str, &'a [String]) {
    for (idx, separator) in separators.iter().enumerate() {
        if separator.is_empty() {
            return (separator, &[]);
        }
        if text.contains(separator.as_str()) {
            return (separator, &separators[idx + 1..]);
        }
    }
    (separators.last().map(String::as_str).unwrap_or(""), &[])
}

/// Splits before every occurrence of `separator`, leaving it at the start of
/// the following piece. Empty pieces are dropped.
fn split_keep_separator<'t>(text: &'t str, separator: &str) -> Vec<&'t str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(idx, ch)| &text[idx..idx + ch.len_utf8()])
            .collect();
    }
    let mut pieces = Vec::new();
    let mut start = 0usize;
    for (idx, _) in text.match_indices(separator) {
        pieces.push(&text[start..idx]);
        start = idx;
    }
    pieces.push(&text[start..]);
    pieces.retain(|piece| !piece.is_empty());
    pieces
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
