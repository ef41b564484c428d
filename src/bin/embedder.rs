use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use guiderag::config::{ApiKeys, PipelineConfig, Provider, ServiceConfig};
use guiderag::embedder::embedder_for;
use guiderag::indexer::IndexBuilder;
use guiderag::records::load_chunks;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "guiderag-embed",
    about = "Embed heading-scoped chunks into JSONL records"
)]
struct EmbedCli {
    /// Chunk JSON produced by guiderag-chunk
    #[arg(long, env = "GUIDERAG_CHUNKS", default_value = "chunks.json")]
    input: PathBuf,

    /// Output JSONL containing embedding records
    #[arg(long, env = "GUIDERAG_EMBEDDINGS", default_value = "embeddings.jsonl")]
    output: PathBuf,

    /// Embedding provider
    #[arg(long, value_enum, env = "GUIDERAG_EMBED_PROVIDER", default_value = "gemini")]
    provider: Provider,

    /// Embedding model; defaults to the provider's standard model
    #[arg(long, env = "GUIDERAG_EMBED_MODEL")]
    model: Option<String>,

    /// Base URL override for the embedding API
    #[arg(long, env = "GUIDERAG_EMBED_BASE_URL")]
    base_url: Option<String>,

    /// Max seconds to wait for each embedding request
    #[arg(long, env = "GUIDERAG_EMBED_TIMEOUT_SECS", default_value_t = 60)]
    timeout_secs: u64,

    /// Max number of chunks to send per embedding request
    #[arg(long, env = "GUIDERAG_EMBED_BATCH", default_value_t = 5)]
    batch_size: usize,

    /// Attempts per batch when the provider rate limits
    #[arg(long, env = "GUIDERAG_EMBED_MAX_RETRIES", default_value_t = 5)]
    max_retries: usize,

    /// Number of concurrent embedding workers
    #[arg(long, env = "GUIDERAG_EMBED_THREADS", default_value_t = 1)]
    workers: usize,

    #[command(flatten)]
    keys: ApiKeys,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = EmbedCli::parse();
    let key = cli
        .keys
        .key_for(cli.provider)
        .ok_or_else(|| anyhow!("no API key configured for {:?}", cli.provider))?;
    let model = match &cli.model {
        Some(model) => model.clone(),
        None => cli
            .provider
            .default_embedding_model()
            .ok_or_else(|| anyhow!("{:?} does not offer embeddings", cli.provider))?
            .to_string(),
    };
    let mut service =
        ServiceConfig::new(key, model).with_timeout(Duration::from_secs(cli.timeout_secs.max(1)));
    if let Some(base_url) = &cli.base_url {
        service = service.with_base_url(base_url);
    }
    let embedder = embedder_for(cli.provider, &service).context("failed to build embedder")?;

    let pipeline = PipelineConfig {
        batch_size: cli.batch_size.max(1),
        retry_limit: cli.max_retries.max(1),
        workers: cli.workers.max(1),
        ..PipelineConfig::default()
    };
    let chunks =
        load_chunks(&cli.input).with_context(|| format!("failed to read {:?}", cli.input))?;
    let output =
        File::create(&cli.output).with_context(|| format!("failed to create {:?}", cli.output))?;
    let mut writer = BufWriter::new(output);

    let builder = IndexBuilder::new(embedder.as_ref(), &pipeline);
    let written = builder
        .embed_chunks_to_writer(&chunks, &mut writer)
        .context("embedding failed")?;
    writer.flush()?;
    tracing::info!(records = written, output = %cli.output.display(), "embedding complete");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
