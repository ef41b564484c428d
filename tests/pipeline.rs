use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;

use guiderag::chunker::{Chunker, ChunkerConfig, TokenCounter};
use guiderag::config::PipelineConfig;
use guiderag::embedder::{EmbedError, EmbeddingService};
use guiderag::indexer::IndexBuilder;
use guiderag::llm::{GenerationError, TextGenerator};
use guiderag::qa::{QaChain, QueryResult, LOW_RELEVANCE_ANSWER, NO_INDEX_ANSWER};
use guiderag::records::{Chunk, PREAMBLE_HEADING};
use guiderag::vector_store::{read_heading_list, IndexLayout};

const GUIDE: &str = include_str!("fixtures/guide.txt");

/// Stored chunks mentioning pooling embed to `[1, 0]`, everything else to
/// `[0, 1]`; queries use the vector registered for their exact text.
struct AxisEmbedder {
    queries: HashMap<&'static str, Vec<f32>>,
}

impl AxisEmbedder {
    fn with_query(text: &'static str, vector: Vec<f32>) -> Self {
        Self {
            queries: HashMap::from([(text, vector)]),
        }
    }
}

impl EmbeddingService for AxisEmbedder {
    fn embed_documents(&self, texts: &[&str], _: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts
            .iter()
            .map(|text| {
                if text.contains("pooling") {
                    vec![1.0, 0.0]
                } else {
                    vec![0.0, 1.0]
                }
            })
            .collect())
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.queries
            .get(text)
            .cloned()
            .ok_or_else(|| EmbedError::Malformed(format!("unexpected query {text:?}")))
    }
}

/// Replies with a fixed heading to routing prompts and a fixed answer otherwise.
struct ScriptedGenerator {
    heading: String,
    answer: String,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    fn new(heading: &str, answer: &str) -> Arc<Self> {
        Arc::new(Self {
            heading: heading.to_string(),
            answer: answer.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl TextGenerator for ScriptedGenerator {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if prompt.contains("Respond with ONLY the heading text") {
            Ok(format!("  {}\n", self.heading))
        } else {
            Ok(format!("{}\n", self.answer))
        }
    }
}

struct WordCounter;

impl TokenCounter for WordCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

fn build_indexes(base: &Path, chunks: &[Chunk], embedder: &dyn EmbeddingService) -> IndexLayout {
    let layout = IndexLayout::new(base);
    let builder = IndexBuilder::new(embedder, &PipelineConfig::default());
    let records = builder.embed_chunks(chunks).unwrap();
    builder.build_indexes(&records, &layout).unwrap();
    layout
}

fn chain(
    layout: &IndexLayout,
    embedder: AxisEmbedder,
    generator: Arc<ScriptedGenerator>,
) -> QaChain {
    chain_with(layout, embedder, generator, &PipelineConfig::default())
}

fn chain_with(
    layout: &IndexLayout,
    embedder: AxisEmbedder,
    generator: Arc<ScriptedGenerator>,
    config: &PipelineConfig,
) -> QaChain {
    QaChain::from_heading_file(
        &layout.headings_file(),
        layout.base_dir(),
        Arc::new(embedder),
        generator,
        config,
    )
    .unwrap()
}

fn single_chunk() -> Vec<Chunk> {
    vec![Chunk::new("Use object pooling.", Some("PERFORMANCE".into()))]
}

#[test]
fn guide_fixture_chunks_by_heading() {
    let chunker = Chunker::with_counter(ChunkerConfig::default(), Box::new(WordCounter)).unwrap();
    let chunks = chunker.chunk(GUIDE);
    let headings: Vec<&str> = chunks.iter().map(Chunk::index_heading).collect();
    assert_eq!(
        headings,
        vec![PREAMBLE_HEADING, "PERFORMANCE", "MEMORY & LOADING", "NETWORKING (BASICS)"]
    );
    assert_eq!(
        chunks[1].content,
        "Use object pooling.\nProfile before you optimise, and measure frame times rather than averages."
    );

    let dir = tempfile::tempdir().unwrap();
    let embedder = AxisEmbedder::with_query("q", vec![1.0, 0.0]);
    let layout = build_indexes(dir.path(), &chunks, &embedder);
    assert_eq!(
        read_heading_list(&layout.headings_file()).unwrap(),
        vec!["_preamble", "PERFORMANCE", "MEMORY & LOADING", "NETWORKING (BASICS)"]
    );
    assert!(dir.path().join("MEMORY_&_LOADING").join("index.json").is_file());
}

#[test]
fn relevant_chunk_is_answered_with_sources() {
    let dir = tempfile::tempdir().unwrap();
    let query = "How do I reduce GC spikes?";
    let query_vector = vec![0.9, 0.19f32.sqrt()];
    let layout = build_indexes(
        dir.path(),
        &single_chunk(),
        &AxisEmbedder::with_query(query, query_vector.clone()),
    );
    let generator = ScriptedGenerator::new("PERFORMANCE", "Pool and reuse objects.");
    let chain = chain(
        &layout,
        AxisEmbedder::with_query(query, query_vector),
        generator.clone(),
    );

    let result = chain.answer_query(query).unwrap();
    assert_eq!(
        result,
        QueryResult {
            heading: "PERFORMANCE".into(),
            answer: "Pool and reuse objects.".into(),
            sources: vec!["Use object pooling.".into()],
        }
    );

    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("PERFORMANCE"));
    assert!(prompts[1].contains(query));
    assert!(prompts[1].contains("Use object pooling."));
}

#[test]
fn unknown_heading_reports_missing_index() {
    let dir = tempfile::tempdir().unwrap();
    let query = "How do I reduce GC spikes?";
    let layout = build_indexes(
        dir.path(),
        &single_chunk(),
        &AxisEmbedder::with_query(query, vec![1.0, 0.0]),
    );
    let generator = ScriptedGenerator::new("NONEXISTENT", "unused");
    let chain = chain(
        &layout,
        AxisEmbedder::with_query(query, vec![1.0, 0.0]),
        generator.clone(),
    );

    let result = chain.answer_query(query).unwrap();
    assert_eq!(result.heading, "NONEXISTENT");
    assert_eq!(result.answer, NO_INDEX_ANSWER);
    assert!(result.sources.is_empty());
    assert_eq!(generator.prompts().len(), 1);
}

#[test]
fn low_scores_skip_generation() {
    let dir = tempfile::tempdir().unwrap();
    let query = "What colour is the sky?";
    let query_vector = vec![0.2, 0.96f32.sqrt()];
    let layout = build_indexes(
        dir.path(),
        &single_chunk(),
        &AxisEmbedder::with_query(query, query_vector.clone()),
    );
    let generator = ScriptedGenerator::new("PERFORMANCE", "unused");
    let chain = chain(
        &layout,
        AxisEmbedder::with_query(query, query_vector),
        generator.clone(),
    );

    let result = chain.answer_query(query).unwrap();
    assert_eq!(
        result,
        QueryResult {
            heading: "PERFORMANCE".into(),
            answer: LOW_RELEVANCE_ANSWER.into(),
            sources: vec![],
        }
    );
    assert_eq!(generator.prompts().len(), 1);
}

#[test]
fn only_chunks_above_threshold_become_context() {
    let dir = tempfile::tempdir().unwrap();
    let query = "pooling?";
    let long_tip = "x".repeat(300);
    let chunks = vec![
        Chunk::new("Frame pacing matters.", Some("PERFORMANCE".into())),
        Chunk::new(format!("Use object pooling. {long_tip}"), Some("PERFORMANCE".into())),
    ];
    let layout = build_indexes(
        dir.path(),
        &chunks,
        &AxisEmbedder::with_query(query, vec![1.0, 0.0]),
    );
    let generator = ScriptedGenerator::new("performance", "Reuse instances.");
    let chain = chain(
        &layout,
        AxisEmbedder::with_query(query, vec![1.0, 0.0]),
        generator.clone(),
    );

    let result = chain.answer_query(query).unwrap();
    assert_eq!(result.heading, "PERFORMANCE");
    assert_eq!(result.sources.len(), 1);
    assert_eq!(result.sources[0].chars().count(), 200);
    assert!(result.sources[0].starts_with("Use object pooling."));
    assert!(!generator.prompts()[1].contains("Frame pacing"));
}

#[test]
fn score_equal_to_threshold_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    let query = "pooling?";
    let layout = build_indexes(
        dir.path(),
        &single_chunk(),
        &AxisEmbedder::with_query(query, vec![1.0, 0.0]),
    );
    let config = PipelineConfig {
        score_threshold: 1.0,
        ..PipelineConfig::default()
    };
    let generator = ScriptedGenerator::new("PERFORMANCE", "Pool objects.");
    let chain = chain_with(
        &layout,
        AxisEmbedder::with_query(query, vec![1.0, 0.0]),
        generator.clone(),
        &config,
    );

    let result = chain.answer_query(query).unwrap();
    assert_eq!(result.answer, "Pool objects.");
    assert_eq!(result.sources, vec!["Use object pooling."]);
    assert_eq!(generator.prompts().len(), 2);
}

#[test]
fn context_is_capped_at_top_k_in_storage_order() {
    let dir = tempfile::tempdir().unwrap();
    let query = "pooling?";
    let contents: Vec<String> = (0..10).map(|i| format!("Tip {i}: use pooling.")).collect();
    let chunks: Vec<Chunk> = contents
        .iter()
        .map(|content| Chunk::new(content.clone(), Some("PERFORMANCE".into())))
        .collect();
    let layout = build_indexes(
        dir.path(),
        &chunks,
        &AxisEmbedder::with_query(query, vec![1.0, 0.0]),
    );
    let generator = ScriptedGenerator::new("PERFORMANCE", "Pool objects.");
    let chain = chain(
        &layout,
        AxisEmbedder::with_query(query, vec![1.0, 0.0]),
        generator.clone(),
    );

    let result = chain.answer_query(query).unwrap();
    assert_eq!(PipelineConfig::default().top_k, 8);
    assert_eq!(result.sources, contents[..8].to_vec());
    assert!(!generator.prompts()[1].contains("Tip 8:"));
}

#[test]
fn rebuilding_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let query = "How do I reduce GC spikes?";
    let embedder = AxisEmbedder::with_query(query, vec![1.0, 0.0]);
    let layout = build_indexes(dir.path(), &single_chunk(), &embedder);
    let index_path = layout.heading_dir("PERFORMANCE").join("index.json");
    let first = fs::read(&index_path).unwrap();
    let first_headings = fs::read_to_string(layout.headings_file()).unwrap();

    build_indexes(dir.path(), &single_chunk(), &embedder);
    assert_eq!(fs::read(&index_path).unwrap(), first);
    assert_eq!(fs::read_to_string(layout.headings_file()).unwrap(), first_headings);

    let generator = ScriptedGenerator::new("PERFORMANCE", "Pool objects.");
    let chain = chain(&layout, embedder, generator);
    assert_eq!(chain.answer_query(query).unwrap().sources, vec!["Use object pooling."]);
}
