//! Shared chunk and embedding records passed between pipeline stages.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Heading assigned to text that precedes the first detected heading.
///
/// Lower-case letters and `_` never pass heading detection, so no document
/// heading can share this name or its directory.
pub const PREAMBLE_HEADING: &str = "_preamble";

/// Heading-tagged span of document text emitted by the chunker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk body; never blank.
    pub content: String,
    /// Heading the chunk was found under (`None` before the first heading).
    pub heading: Option<String>,
}

impl Chunk {
    /// Builds a chunk.
    pub fn new(content: impl Into<String>, heading: Option<String>) -> Self {
        Self {
            content: content.into(),
            heading,
        }
    }

    /// Heading used to partition indexes; untitled chunks map to [`PREAMBLE_HEADING`].
    pub fn index_heading(&self) -> &str {
        self.heading.as_deref().unwrap_or(PREAMBLE_HEADING)
    }
}

/// Output row emitted by embedding jobs and consumed by the index builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Chunk body text submitted to the embedding model.
    pub content: String,
    /// Partition heading for the chunk.
    pub heading: String,
    /// Model embedding vector.
    pub embedding: Vec<f32>,
}

impl EmbeddingRecord {
    /// Pairs a chunk with its embedding.
    pub fn from_chunk(chunk: &Chunk, embedding: Vec<f32>) -> Self {
        Self {
            content: chunk.content.clone(),
            heading: chunk.index_heading().to_string(),
            embedding,
        }
    }
}

/// Errors raised while reading or writing record files.
#[derive(Debug, Error)]
pub enum RecordError {
    /// Filesystem failure.
    #[error("io error on {path}: {source}")]
    Io {
        /// File being accessed.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Malformed JSON payload.
    #[error("invalid record in {location}: {source}")]
    Json {
        /// File being parsed, with `:line` appended for JSONL files.
        location: String,
        /// 1-based line for JSONL files.
        line: Option<usize>,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path, source: std::io::Error) -> RecordError {
    RecordError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn json_err(path: &Path, line: Option<usize>, source: serde_json::Error) -> RecordError {
    let location = match line {
        Some(line) => format!("{}:{line}", path.display()),
        None => path.display().to_string(),
    };
    RecordError::Json {
        location,
        line,
        source,
    }
}

/// Writes chunks as a pretty-printed JSON array.
pub fn save_chunks(path: &Path, chunks: &[Chunk]) -> Result<(), RecordError> {
    let file = File::create(path).map_err(|err| io_err(path, err))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, chunks).map_err(|err| json_err(path, None, err))?;
    writer.flush().map_err(|err| io_err(path, err))
}

/// Reads a JSON array of chunks written by [`save_chunks`].
pub fn load_chunks(path: &Path) -> Result<Vec<Chunk>, RecordError> {
    let file = File::open(path).map_err(|err| io_err(path, err))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|err| json_err(path, None, err))
}

/// Appends embedding records to a JSONL stream.
pub fn write_embeddings<W: Write>(
    writer: &mut W,
    records: &[EmbeddingRecord],
) -> Result<usize, serde_json::Error> {
    for record in records {
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n").map_err(serde_json::Error::io)?;
    }
    Ok(records.len())
}

/// Reads every record from an embeddings JSONL file, skipping blank lines.
pub fn load_embeddings(path: &Path) -> Result<Vec<EmbeddingRecord>, RecordError> {
    let file = File::open(path).map_err(|err| io_err(path, err))?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|err| io_err(path, err))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: EmbeddingRecord =
            serde_json::from_str(&line).map_err(|err| json_err(path, Some(line_no + 1), err))?;
        records.push(record);
    }
    Ok(records)
}
