use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use guiderag::indexer::build_heading_indexes;
use guiderag::records::load_embeddings;
use guiderag::vector_store::{FlatIndex, IndexLayout};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "guiderag-index",
    about = "Partition embedding records into one vector index per heading"
)]
struct IndexCli {
    /// Embedding JSONL produced by guiderag-embed
    #[arg(long, env = "GUIDERAG_EMBEDDINGS", default_value = "embeddings.jsonl")]
    input: PathBuf,

    /// Directory receiving one sub-directory per heading plus headings.txt
    #[arg(long, env = "GUIDERAG_INDEX_DIR", default_value = "indexes")]
    index_dir: PathBuf,

    /// Print a summary of this heading's existing index instead of building
    #[arg(long, value_name = "HEADING")]
    inspect: Option<String>,

    /// Entries previewed by --inspect
    #[arg(long, default_value_t = 3)]
    samples: usize,
}

const PREVIEW_CHARS: usize = 150;

fn main() -> Result<()> {
    init_tracing();
    let cli = IndexCli::parse();
    let layout = IndexLayout::new(&cli.index_dir);
    if let Some(heading) = &cli.inspect {
        return inspect(&layout, heading, cli.samples);
    }
    let records =
        load_embeddings(&cli.input).with_context(|| format!("failed to read {:?}", cli.input))?;
    let built = build_heading_indexes(&records, &layout)
        .with_context(|| format!("failed to build indexes under {:?}", cli.index_dir))?;
    for index in &built {
        println!("{:>5}  {}  ({})", index.chunks, index.heading, index.dir.display());
    }
    tracing::info!(
        headings = built.len(),
        records = records.len(),
        heading_list = %layout.headings_file().display(),
        "indexes written"
    );
    Ok(())
}

fn inspect(layout: &IndexLayout, heading: &str, samples: usize) -> Result<()> {
    let dir = layout
        .checked_heading_dir(heading)
        .with_context(|| format!("heading {heading:?} has no usable directory name"))?;
    let index =
        FlatIndex::load(&dir).with_context(|| format!("failed to load index from {:?}", dir))?;
    let summary = index.summary(samples, PREVIEW_CHARS);
    println!(
        "Index for {:?} contains {} documents ({} dimensions).",
        summary.heading, summary.chunks, summary.dimensions
    );
    for sample in &summary.samples {
        let ellipsis = if sample.truncated { "..." } else { "" };
        println!("\n--- Document {} ---", sample.position + 1);
        println!("{}{}", sample.preview, ellipsis);
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
