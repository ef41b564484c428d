//! Per-heading flat vector indexes and their on-disk layout.
//!
//! ```text
//! <base>/headings.txt            one heading per line
//! <base>/<safe heading>/index.json
//! ```

use std::cmp::Ordering;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::records::{Chunk, EmbeddingRecord};

/// File holding the serialized index inside a heading directory.
pub const INDEX_FILE: &str = "index.json";
/// File listing every indexed heading, relative to the base directory.
pub const HEADINGS_FILE: &str = "headings.txt";

/// Errors raised while building, persisting or searching an index.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("io error on {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Index file could not be (de)serialized.
    #[error("invalid index file {path}: {source}")]
    Json {
        /// Index file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// A vector's length differs from the index dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Index dimension.
        expected: usize,
        /// Offending vector length.
        actual: usize,
    },
    /// No records were supplied for a heading.
    #[error("cannot build an empty index for heading {0:?}")]
    Empty(String),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Directory-safe form of a heading: path separators and spaces become `_`.
pub fn safe_heading_name(heading: &str) -> String {
    heading.replace(['/', '\\', ' '], "_")
}

/// Resolves headings to directories under a base directory.
#[derive(Debug, Clone)]
pub struct IndexLayout {
    base_dir: PathBuf,
}

impl IndexLayout {
    /// Layout rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Root directory of every heading index.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory that holds the index for `heading`.
    pub fn heading_dir(&self, heading: &str) -> PathBuf {
        self.base_dir.join(safe_heading_name(heading))
    }

    /// Like [`IndexLayout::heading_dir`], but `None` when the safe name is
    /// empty, `.` or `..` and so would not name a child of the base directory.
    pub fn checked_heading_dir(&self, heading: &str) -> Option<PathBuf> {
        let name = safe_heading_name(heading);
        if matches!(name.as_str(), "" | "." | "..") {
            return None;
        }
        Some(self.base_dir.join(name))
    }

    /// Path of the heading list file.
    pub fn headings_file(&self) -> PathBuf {
        self.base_dir.join(HEADINGS_FILE)
    }
}

/// Writes one heading per line.
pub fn write_heading_list(path: &Path, headings: &[String]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let file = fs::File::create(path).map_err(io_err(path))?;
    let mut writer = BufWriter::new(file);
    for heading in headings {
        writeln!(writer, "{heading}").map_err(io_err(path))?;
    }
    writer.flush().map_err(io_err(path))
}

/// Reads a heading list, trimming entries and skipping blank lines.
pub fn read_heading_list(path: &Path) -> Result<Vec<String>, StoreError> {
    let raw = fs::read_to_string(path).map_err(io_err(path))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Retrieval hit: a stored chunk and its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    /// Stored chunk.
    pub chunk: Chunk,
    /// Cosine similarity in `[-1, 1]`; higher is closer.
    pub score: f32,
}

/// Overview of a persisted index for manual inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexSummary {
    /// Heading the index was built for.
    pub heading: String,
    /// Vector dimension.
    pub dimensions: usize,
    /// Number of stored chunks.
    pub chunks: usize,
    /// Leading entries in storage order.
    pub samples: Vec<EntryPreview>,
}

/// One stored chunk shortened for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryPreview {
    /// 0-based storage position.
    pub position: usize,
    /// Leading characters of the chunk content.
    pub preview: String,
    /// Whether `preview` was cut short.
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IndexEntry {
    content: String,
    embedding: Vec<f32>,
}

/// Exhaustive cosine-similarity index over one heading's chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatIndex {
    heading: String,
    dimensions: usize,
    entries: Vec<IndexEntry>,
}

impl FlatIndex {
    /// Builds an index from records that all belong to `heading`.
    pub fn build(heading: &str, records: &[EmbeddingRecord]) -> Result<Self, StoreError> {
        let first = records
            .first()
            .ok_or_else(|| StoreError::Empty(heading.to_string()))?;
        let dimensions = first.embedding.len();
        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            if record.embedding.len() != dimensions {
                return Err(StoreError::DimensionMismatch {
                    expected: dimensions,
                    actual: record.embedding.len(),
                });
            }
            entries.push(IndexEntry {
                content: record.content.clone(),
                embedding: record.embedding.clone(),
            });
        }
        Ok(Self {
            heading: heading.to_string(),
            dimensions,
            entries,
        })
    }

    /// Heading the index was built for.
    pub fn heading(&self) -> &str {
        &self.heading
    }

    /// Vector dimension.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of stored chunks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the index stores nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Summarizes the index with up to `samples` leading entries, each cut
    /// to `preview_chars` characters.
    pub fn summary(&self, samples: usize, preview_chars: usize) -> IndexSummary {
        let samples = self
            .entries
            .iter()
            .take(samples)
            .enumerate()
            .map(|(position, entry)| EntryPreview {
                position,
                preview: entry.content.chars().take(preview_chars).collect(),
                truncated: entry.content.chars().count() > preview_chars,
            })
            .collect();
        IndexSummary {
            heading: self.heading.clone(),
            dimensions: self.dimensions(),
            chunks: self.len(),
            samples,
        }
    }

    /// Replaces `dir` with a fresh directory containing this index.
    pub fn save(&self, dir: &Path) -> Result<(), StoreError> {
        if dir.exists() {
            fs::remove_dir_all(dir).map_err(io_err(dir))?;
        }
        fs::create_dir_all(dir).map_err(io_err(dir))?;
        let path = dir.join(INDEX_FILE);
        let file = fs::File::create(&path).map_err(io_err(&path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;
        writer.flush().map_err(io_err(&path))
    }

    /// Loads an index previously written by [`FlatIndex::save`].
    pub fn load(dir: &Path) -> Result<Self, StoreError> {
        let path = dir.join(INDEX_FILE);
        let bytes = fs::read(&path).map_err(io_err(&path))?;
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Json { path, source })
    }

    /// Top-`k` chunks by descending similarity; ties keep storage order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        if query.len() != self.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }
        let query_norm = magnitude(query);
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (idx, cosine_similarity(query, query_norm, &entry.embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.truncate(k);
        Ok(scored
            .into_iter()
            .map(|(idx, score)| ScoredChunk {
                chunk: Chunk::new(self.entries[idx].content.clone(), Some(self.heading.clone())),
                score,
            })
            .collect())
    }
}

fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine_similarity(query: &[f32], query_norm: f32, other: &[f32]) -> f32 {
    let other_norm = magnitude(other);
    if query_norm == 0.0 || other_norm == 0.0 {
        return 0.0;
    }
    let dot: f32 = query.iter().zip(other).map(|(a, b)| a * b).sum();
    dot / (query_norm * other_norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(content: &str, embedding: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            content: content.into(),
            heading: "PERFORMANCE".into(),
            embedding,
        }
    }

    #[test]
    fn safe_names_replace_separators_and_spaces() {
        assert_eq!(safe_heading_name("UI / UX"), "UI___UX");
        assert_eq!(safe_heading_name(r"A\B C"), "A_B_C");
        assert_eq!(safe_heading_name("PERFORMANCE"), "PERFORMANCE");
    }

    #[test]
    fn search_orders_by_similarity() {
        let index = FlatIndex::build(
            "PERFORMANCE",
            &[
                record("far", vec![0.0, 1.0]),
                record("near", vec![1.0, 0.1]),
                record("exact", vec![2.0, 0.0]),
            ],
        )
        .unwrap();
        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        let contents: Vec<&str> = hits.iter().map(|h| h.chunk.content.as_str()).collect();
        assert_eq!(contents, vec!["exact", "near"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[0].chunk.heading.as_deref(), Some("PERFORMANCE"));
    }

    #[test]
    fn build_rejects_mixed_dimensions() {
        let err = FlatIndex::build(
            "H",
            &[record("a", vec![1.0, 0.0]), record("b", vec![1.0])],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        ));
        assert!(matches!(FlatIndex::build("H", &[]), Err(StoreError::Empty(_))));
    }

    #[test]
    fn save_replaces_previous_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("PERFORMANCE");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("stale.bin"), b"old").unwrap();

        let index = FlatIndex::build("PERFORMANCE", &[record("a", vec![1.0, 0.0])]).unwrap();
        index.save(&target).unwrap();

        assert!(!target.join("stale.bin").exists());
        assert_eq!(FlatIndex::load(&target).unwrap(), index);
    }

    #[test]
    fn checked_dir_refuses_names_outside_the_base() {
        let layout = IndexLayout::new("/indexes");
        assert_eq!(layout.checked_heading_dir(""), None);
        assert_eq!(layout.checked_heading_dir("."), None);
        assert_eq!(layout.checked_heading_dir(".."), None);
        assert_eq!(
            layout.checked_heading_dir("OBJECT POOLING"),
            Some(PathBuf::from("/indexes/OBJECT_POOLING"))
        );
        assert_eq!(
            layout.checked_heading_dir("../x"),
            Some(PathBuf::from("/indexes/.._x"))
        );
    }

    #[test]
    fn summary_counts_entries_and_previews_the_first_ones() {
        let index = FlatIndex::build(
            "PERFORMANCE",
            &[
                record("Profile before optimizing anything.", vec![1.0, 0.0, 0.0]),
                record("Batch draw calls.", vec![0.0, 1.0, 0.0]),
                record("Avoid allocations per frame.", vec![0.0, 0.0, 1.0]),
                record("Cache component lookups.", vec![1.0, 1.0, 0.0]),
            ],
        )
        .unwrap();

        let summary = index.summary(3, 17);
        assert_eq!(summary.heading, "PERFORMANCE");
        assert_eq!(summary.dimensions, 3);
        assert_eq!(summary.chunks, 4);
        assert_eq!(
            summary.samples,
            vec![
                EntryPreview {
                    position: 0,
                    preview: "Profile before op".into(),
                    truncated: true,
                },
                EntryPreview {
                    position: 1,
                    preview: "Batch draw calls.".into(),
                    truncated: false,
                },
                EntryPreview {
                    position: 2,
                    preview: "Avoid allocations".into(),
                    truncated: true,
                },
            ]
        );
    }

    #[test]
    fn heading_list_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(HEADINGS_FILE);
        fs::write(&path, "PERFORMANCE\n\n  MEMORY  \n\n").unwrap();
        assert_eq!(read_heading_list(&path).unwrap(), vec!["PERFORMANCE", "MEMORY"]);

        let headings = vec!["A B".to_string(), "C".to_string()];
        write_heading_list(&path, &headings).unwrap();
        assert_eq!(read_heading_list(&path).unwrap(), headings);
    }
}
