use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use guiderag::chunker::{Chunker, ChunkerConfig};
use guiderag::records::save_chunks;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "guiderag-chunk",
    about = "Split cleaned guide text into heading-scoped chunks"
)]
struct ChunkCli {
    /// Cleaned plain-text guide
    #[arg(long, env = "GUIDERAG_TEXT", default_value = "guide.txt")]
    input: PathBuf,

    /// Output JSON array of chunks
    #[arg(long, env = "GUIDERAG_CHUNKS", default_value = "chunks.json")]
    output: PathBuf,

    /// Sections above this many cl100k tokens are split further
    #[arg(long, env = "GUIDERAG_TOKEN_LIMIT", default_value_t = 512)]
    token_limit: usize,

    /// Maximum characters per split piece
    #[arg(long, env = "GUIDERAG_CHUNK_SIZE", default_value_t = 500)]
    chunk_size: usize,

    /// Characters shared between neighbouring split pieces
    #[arg(long, env = "GUIDERAG_CHUNK_OVERLAP", default_value_t = 100)]
    chunk_overlap: usize,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = ChunkCli::parse();
    let text = fs::read_to_string(&cli.input)
        .with_context(|| format!("failed to read {:?}", cli.input))?;
    let chunker = Chunker::new(ChunkerConfig {
        token_limit: cli.token_limit,
        chunk_size: cli.chunk_size,
        chunk_overlap: cli.chunk_overlap,
    })
    .context("failed to build chunker")?;

    let chunks = chunker.chunk(&text);
    save_chunks(&cli.output, &chunks)
        .with_context(|| format!("failed to write {:?}", cli.output))?;
    let untitled = chunks.iter().filter(|chunk| chunk.heading.is_none()).count();
    tracing::info!(
        chunks = chunks.len(),
        untitled,
        output = %cli.output.display(),
        "chunking complete"
    );
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
