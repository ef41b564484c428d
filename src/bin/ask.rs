use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use guiderag::config::{ApiKeys, PipelineConfig, Provider, ServiceConfig};
use guiderag::embedder::embedder_for;
use guiderag::llm::{generator_for, GenerationOptions};
use guiderag::qa::{QaChain, QueryResult};
use guiderag::vector_store::IndexLayout;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "guiderag-ask",
    about = "Answer questions about the guide from its per-heading indexes"
)]
struct AskCli {
    /// Question to answer; omit to start an interactive session
    #[arg(long)]
    query: Option<String>,

    /// Directory written by guiderag-index
    #[arg(long, env = "GUIDERAG_INDEX_DIR", default_value = "indexes")]
    index_dir: PathBuf,

    /// Heading list file (defaults to <index-dir>/headings.txt)
    #[arg(long, env = "GUIDERAG_HEADINGS")]
    headings: Option<PathBuf>,

    /// Provider used to embed the query (must match the one used to build)
    #[arg(long, value_enum, env = "GUIDERAG_EMBED_PROVIDER", default_value = "gemini")]
    embed_provider: Provider,

    /// Embedding model; defaults to the provider's standard model
    #[arg(long, env = "GUIDERAG_EMBED_MODEL")]
    embed_model: Option<String>,

    /// Base URL override for the embedding API
    #[arg(long, env = "GUIDERAG_EMBED_BASE_URL")]
    embed_base_url: Option<String>,

    /// Provider used for heading selection and answers
    #[arg(long, value_enum, env = "GUIDERAG_LLM_PROVIDER", default_value = "gemini")]
    llm_provider: Provider,

    /// Generation model; defaults to the provider's standard model
    #[arg(long, env = "GUIDERAG_LLM_MODEL")]
    llm_model: Option<String>,

    /// Base URL override for the generation API
    #[arg(long, env = "GUIDERAG_LLM_BASE_URL")]
    llm_base_url: Option<String>,

    /// Sampling temperature for the answer model
    #[arg(long, default_value_t = 0.0)]
    temperature: f32,

    /// Maximum tokens to request from the completion model
    #[arg(long, default_value_t = 1024)]
    max_completion_tokens: usize,

    /// Minimum similarity for a chunk to be used as context
    #[arg(long, env = "GUIDERAG_SCORE_THRESHOLD", default_value_t = 0.4)]
    score_threshold: f32,

    /// Chunks retrieved before threshold filtering
    #[arg(long, env = "GUIDERAG_TOP_K", default_value_t = 8)]
    top_k: usize,

    /// Max seconds to wait for each provider request
    #[arg(long, env = "GUIDERAG_TIMEOUT_SECS", default_value_t = 60)]
    timeout_secs: u64,

    /// Print results as JSON
    #[arg(long, default_value_t = false)]
    json: bool,

    #[command(flatten)]
    keys: ApiKeys,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = AskCli::parse();
    let chain = build_chain(&cli)?;
    tracing::info!(headings = chain.headings().len(), "question answering ready");

    if let Some(query) = &cli.query {
        let result = chain.answer_query(query).context("query failed")?;
        print_result(&result, cli.json)?;
        return Ok(());
    }

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut line = String::new();
    loop {
        print!("Ask a question about the guide (or type 'exit'): ");
        io::stdout().flush()?;
        line.clear();
        if input.read_line(&mut line).context("failed to read stdin")? == 0 {
            break;
        }
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query.eq_ignore_ascii_case("exit") {
            break;
        }
        match chain.answer_query(query) {
            Ok(result) => print_result(&result, cli.json)?,
            Err(err) => eprintln!("error: {:#}", anyhow::Error::new(err)),
        }
        println!("{}", "-".repeat(50));
    }
    Ok(())
}

fn build_chain(cli: &AskCli) -> Result<QaChain> {
    let timeout = Duration::from_secs(cli.timeout_secs.max(1));

    let embed_model = match &cli.embed_model {
        Some(model) => model.clone(),
        None => cli
            .embed_provider
            .default_embedding_model()
            .ok_or_else(|| anyhow!("{:?} does not offer embeddings", cli.embed_provider))?
            .to_string(),
    };
    let embed_service = service_config(
        &cli.keys,
        cli.embed_provider,
        embed_model,
        cli.embed_base_url.as_deref(),
        timeout,
    )?;
    let embedder =
        embedder_for(cli.embed_provider, &embed_service).context("failed to build embedder")?;

    let llm_model = cli
        .llm_model
        .clone()
        .unwrap_or_else(|| cli.llm_provider.default_generation_model().to_string());
    let llm_service = service_config(
        &cli.keys,
        cli.llm_provider,
        llm_model,
        cli.llm_base_url.as_deref(),
        timeout,
    )?;
    let options = GenerationOptions {
        temperature: cli.temperature,
        max_tokens: cli.max_completion_tokens,
    };
    let generator = generator_for(cli.llm_provider, &llm_service, options)
        .context("failed to build generator")?;

    let pipeline = PipelineConfig {
        score_threshold: cli.score_threshold,
        top_k: cli.top_k.max(1),
        ..PipelineConfig::default()
    };
    let layout = IndexLayout::new(&cli.index_dir);
    let headings_path = cli
        .headings
        .clone()
        .unwrap_or_else(|| layout.headings_file());
    QaChain::from_heading_file(&headings_path, &cli.index_dir, embedder, generator, &pipeline)
        .with_context(|| format!("failed to load headings from {:?}", headings_path))
}

fn service_config(
    keys: &ApiKeys,
    provider: Provider,
    model: String,
    base_url: Option<&str>,
    timeout: Duration,
) -> Result<ServiceConfig> {
    let key = keys
        .key_for(provider)
        .ok_or_else(|| anyhow!("no API key configured for {:?}", provider))?;
    let mut config = ServiceConfig::new(key, model).with_timeout(timeout);
    if let Some(base_url) = base_url {
        config = config.with_base_url(base_url);
    }
    Ok(config)
}

fn print_result(result: &QueryResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    println!("--- Heading ---\n{}\n", result.heading);
    println!("--- Answer ---\n{}", result.answer);
    if !result.sources.is_empty() {
        println!("\n--- Sources ---");
        for (idx, source) in result.sources.iter().enumerate() {
            println!("[{}] {}", idx + 1, source.replace('\n', " "));
        }
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
