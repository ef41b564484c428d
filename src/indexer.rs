//! Embedding and per-heading index construction.
//!
//! Chunks are embedded in fixed-size batches, each batch retried on rate
//! limiting. With more than one worker, batches run on scoped threads and
//! are re-sequenced so records always come out in chunk order.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use thiserror::Error;

use crate::config::PipelineConfig;
use crate::embedder::{EmbedError, EmbeddingService};
use crate::records::{self, Chunk, EmbeddingRecord};
use crate::retry::RetryPolicy;
use crate::vector_store::{safe_heading_name, write_heading_list, FlatIndex, IndexLayout, StoreError};

/// Errors surfaced while embedding chunks or writing indexes.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A batch failed permanently or ran out of retries.
    #[error("embedding batch {batch} failed: {source}")]
    Embed {
        /// 0-based batch number.
        batch: usize,
        /// Last error reported by the service.
        #[source]
        source: EmbedError,
    },
    /// Index persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Two headings would be written to the same directory.
    #[error("headings {first:?} and {second:?} both map to directory {name:?}")]
    NameCollision {
        /// Heading seen first.
        first: String,
        /// Heading seen later.
        second: String,
        /// Shared safe name.
        name: String,
    },
    /// A heading's safe name cannot be used as a directory name.
    #[error("heading {0:?} has no usable directory name")]
    UnusableHeading(String),
    /// Embedding output could not be written.
    #[error("failed to write embedding records: {0}")]
    Sink(#[from] serde_json::Error),
    /// A worker thread exited without reporting its batch.
    #[error("embedding worker channel closed unexpectedly")]
    WorkerLost,
}

/// Summary of one written heading index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltIndex {
    /// Heading the index covers.
    pub heading: String,
    /// Number of chunks stored.
    pub chunks: usize,
    /// Directory the index was written to.
    pub dir: PathBuf,
}

/// Embeds chunks and partitions the results into heading indexes.
pub struct IndexBuilder<'e> {
    embedder: &'e dyn EmbeddingService,
    retry: RetryPolicy,
    batch_size: usize,
    workers: usize,
}

impl<'e> IndexBuilder<'e> {
    /// Builds an index builder using `config`'s batch size, retry limit and workers.
    pub fn new(embedder: &'e dyn EmbeddingService, config: &PipelineConfig) -> Self {
        Self {
            embedder,
            retry: RetryPolicy::new(config.retry_limit),
            batch_size: config.batch_size.max(1),
            workers: config.workers.max(1),
        }
    }

    /// Replaces the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Embeds one batch, retrying while the service reports rate limiting.
    pub fn embed_batch(&self, batch: &[Chunk]) -> Result<Vec<EmbeddingRecord>, EmbedError> {
        let texts: Vec<&str> = batch.iter().map(|chunk| chunk.content.as_str()).collect();
        let titles: Vec<&str> = batch.iter().map(Chunk::index_heading).collect();
        let vectors = self
            .retry
            .run(|| self.embedder.embed_documents(&texts, &titles))?;
        if vectors.len() != batch.len() {
            return Err(EmbedError::Malformed(format!(
                "embedding count {} mismatched batch of {}",
                vectors.len(),
                batch.len()
            )));
        }
        Ok(batch
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddingRecord::from_chunk(chunk, vector))
            .collect())
    }

    /// Embeds every chunk and returns records in chunk order.
    pub fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<EmbeddingRecord>, BuildError> {
        let mut all = Vec::with_capacity(chunks.len());
        self.embed_each(chunks, |batch| {
            all.extend(batch);
            Ok(())
        })?;
        Ok(all)
    }

    /// Embeds every chunk, streaming JSONL records to `writer` batch by batch.
    /// Batches written before a failure stay in the output.
    pub fn embed_chunks_to_writer<W: Write>(
        &self,
        chunks: &[Chunk],
        writer: &mut W,
    ) -> Result<usize, BuildError> {
        self.embed_each(chunks, |batch| {
            records::write_embeddings(writer, &batch)?;
            writer.flush().map_err(serde_json::Error::io)?;
            Ok(())
        })
    }

    fn embed_each<F>(&self, chunks: &[Chunk], mut sink: F) -> Result<usize, BuildError>
    where
        F: FnMut(Vec<EmbeddingRecord>) -> Result<(), BuildError>,
    {
        let batches: Vec<&[Chunk]> = chunks.chunks(self.batch_size).collect();
        let total = batches.len();
        tracing::info!(
            chunks = chunks.len(),
            batches = total,
            batch_size = self.batch_size,
            workers = self.workers,
            "embedding chunks"
        );
        if self.workers == 1 || total <= 1 {
            let mut embedded = 0usize;
            for (id, batch) in batches.into_iter().enumerate() {
                let records = self
                    .embed_batch(batch)
                    .map_err(|source| BuildError::Embed { batch: id, source })?;
                embedded += records.len();
                sink(records)?;
                tracing::info!(batch = id, embedded, total = chunks.len(), "batch embedded");
            }
            return Ok(embedded);
        }
        self.embed_parallel(batches, chunks.len(), sink)
    }

    fn embed_parallel<F>(
        &self,
        batches: Vec<&[Chunk]>,
        chunk_total: usize,
        mut sink: F,
    ) -> Result<usize, BuildError>
    where
        F: FnMut(Vec<EmbeddingRecord>) -> Result<(), BuildError>,
    {
        let batch_count = batches.len();
        let abort = AtomicBool::new(false);
        thread::scope(|scope| {
            let (task_tx, task_rx) = unbounded::<(usize, &[Chunk])>();
            let (result_tx, result_rx) = bounded::<BatchResult>(self.workers * 2);
            for worker_id in 0..self.workers {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                let abort = &abort;
                scope.spawn(move || self.worker_loop(worker_id, task_rx, result_tx, abort));
            }
            drop(task_rx);
            drop(result_tx);
            for task in batches.into_iter().enumerate() {
                if task_tx.send(task).is_err() {
                    break;
                }
            }
            drop(task_tx);

            let outcome = self.collect_in_order(&result_rx, batch_count, chunk_total, &mut sink);
            if outcome.is_err() {
                abort.store(true, Ordering::SeqCst);
            }
            outcome
        })
    }

    fn collect_in_order<F>(
        &self,
        result_rx: &Receiver<BatchResult>,
        batch_count: usize,
        chunk_total: usize,
        sink: &mut F,
    ) -> Result<usize, BuildError>
    where
        F: FnMut(Vec<EmbeddingRecord>) -> Result<(), BuildError>,
    {
        let mut pending: BTreeMap<usize, Vec<EmbeddingRecord>> = BTreeMap::new();
        let mut next_id = 0usize;
        let mut embedded = 0usize;
        while next_id < batch_count {
            let (id, result) = result_rx.recv().map_err(|_| BuildError::WorkerLost)?;
            let records = result.map_err(|source| BuildError::Embed { batch: id, source })?;
            pending.insert(id, records);
            while let Some(records) = pending.remove(&next_id) {
                embedded += records.len();
                sink(records)?;
                tracing::info!(batch = next_id, embedded, total = chunk_total, "batch embedded");
                next_id += 1;
            }
        }
        Ok(embedded)
    }

    fn worker_loop(
        &self,
        worker_id: usize,
        receiver: Receiver<(usize, &[Chunk])>,
        sender: Sender<BatchResult>,
        abort: &AtomicBool,
    ) {
        for (batch_id, batch) in receiver.iter() {
            if abort.load(Ordering::SeqCst) {
                break;
            }
            tracing::debug!(worker = worker_id, batch = batch_id, chunks = batch.len(), "embedding batch");
            let result = self.embed_batch(batch);
            if result.is_err() {
                abort.store(true, Ordering::SeqCst);
            }
            if sender.send((batch_id, result)).is_err() {
                break;
            }
        }
    }

    /// Groups records by heading and writes one index per heading plus the
    /// heading list. Existing heading directories are replaced.
    pub fn build_indexes(
        &self,
        records: &[EmbeddingRecord],
        layout: &IndexLayout,
    ) -> Result<Vec<BuiltIndex>, BuildError> {
        build_heading_indexes(records, layout)
    }
}

type BatchResult = (usize, Result<Vec<EmbeddingRecord>, EmbedError>);

/// Groups records by heading (first-encounter order) and persists each group.
///
/// Fails before writing anything when two headings share a directory name
/// ([`BuildError::NameCollision`]) or a heading has no usable directory name
/// ([`BuildError::UnusableHeading`]).
pub fn build_heading_indexes(
    records: &[EmbeddingRecord],
    layout: &IndexLayout,
) -> Result<Vec<BuiltIndex>, BuildError> {
    let groups = group_by_heading(records);

    let mut by_name: HashMap<String, &str> = HashMap::new();
    for heading in groups.iter().map(|(heading, _)| *heading) {
        if layout.checked_heading_dir(heading).is_none() {
            return Err(BuildError::UnusableHeading(heading.to_string()));
        }
        let name = safe_heading_name(heading);
        if let Some(first) = by_name.insert(name.clone(), heading) {
            return Err(BuildError::NameCollision {
                first: first.to_string(),
                second: heading.to_string(),
                name,
            });
        }
    }

    let mut built = Vec::with_capacity(groups.len());
    for (heading, group) in &groups {
        let index = FlatIndex::build(heading, group)?;
        let dir = layout.heading_dir(heading);
        index.save(&dir)?;
        tracing::info!(heading = %heading, chunks = index.len(), dir = %dir.display(), "index written");
        built.push(BuiltIndex {
            heading: heading.to_string(),
            chunks: index.len(),
            dir,
        });
    }

    let headings: Vec<String> = groups.iter().map(|(h, _)| h.to_string()).collect();
    write_heading_list(&layout.headings_file(), &headings)?;
    Ok(built)
}

fn group_by_heading(records: &[EmbeddingRecord]) -> Vec<(&str, Vec<EmbeddingRecord>)> {
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(&str, Vec<EmbeddingRecord>)> = Vec::new();
    for record in records {
        let slot = *positions.entry(record.heading.as_str()).or_insert_with(|| {
            groups.push((record.heading.as_str(), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(record.clone());
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::tests::{FixedJitter, RecordingSleeper};
    use crate::vector_store::read_heading_list;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Embeds each text as `[len, 1]` and fails with 429 a set number of times.
    struct FlakyEmbedder {
        rate_limits_left: Mutex<usize>,
        calls: Mutex<usize>,
        fail_hard_on_call: Option<usize>,
    }

    impl FlakyEmbedder {
        fn new(rate_limits: usize) -> Self {
            Self {
                rate_limits_left: Mutex::new(rate_limits),
                calls: Mutex::new(0),
                fail_hard_on_call: None,
            }
        }
    }

    impl EmbeddingService for FlakyEmbedder {
        fn embed_documents(
            &self,
            texts: &[&str],
            _titles: &[&str],
        ) -> Result<Vec<Vec<f32>>, EmbedError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if self.fail_hard_on_call == Some(call) {
                return Err(EmbedError::Status {
                    status: 400,
                    body: "bad input".into(),
                });
            }
            let mut left = self.rate_limits_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(EmbedError::RateLimited {
                    status: 429,
                    body: "quota".into(),
                });
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }

        fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    fn chunks(n: usize) -> Vec<Chunk> {
        (0..n)
            .map(|i| Chunk::new("x".repeat(i + 1), Some(format!("H{}", i % 2))))
            .collect()
    }

    fn builder<'e>(
        embedder: &'e FlakyEmbedder,
        sleeper: &Arc<RecordingSleeper>,
        workers: usize,
    ) -> IndexBuilder<'e> {
        let config = PipelineConfig {
            workers,
            ..PipelineConfig::default()
        };
        IndexBuilder::new(embedder, &config).with_retry_policy(
            RetryPolicy::new(config.retry_limit)
                .with_sleeper(sleeper.clone())
                .with_jitter(Arc::new(FixedJitter(0.0))),
        )
    }

    #[test]
    fn batch_survives_two_rate_limits() {
        let embedder = FlakyEmbedder::new(2);
        let sleeper = Arc::new(RecordingSleeper::default());
        let input = chunks(5);
        let records = builder(&embedder, &sleeper, 1).embed_chunks(&input).unwrap();

        assert_eq!(records.len(), 5);
        assert_eq!(
            *sleeper.sleeps.lock().unwrap(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
        assert_eq!(records[4].embedding, vec![5.0, 1.0]);
        assert_eq!(records[4].heading, "H0");
    }

    #[test]
    fn exhausted_retries_surface_rate_limit() {
        let embedder = FlakyEmbedder::new(usize::MAX);
        let sleeper = Arc::new(RecordingSleeper::default());
        let err = builder(&embedder, &sleeper, 1)
            .embed_chunks(&chunks(3))
            .unwrap_err();

        assert!(matches!(
            err,
            BuildError::Embed {
                batch: 0,
                source: EmbedError::RateLimited { .. }
            }
        ));
        assert_eq!(*embedder.calls.lock().unwrap(), 5);
        assert_eq!(sleeper.sleeps.lock().unwrap().len(), 4);
    }

    #[test]
    fn writer_keeps_batches_flushed_before_failure() {
        let mut embedder = FlakyEmbedder::new(0);
        embedder.fail_hard_on_call = Some(2);
        let sleeper = Arc::new(RecordingSleeper::default());
        let mut out = Vec::new();
        let err = builder(&embedder, &sleeper, 1)
            .embed_chunks_to_writer(&chunks(7), &mut out)
            .unwrap_err();

        assert!(matches!(err, BuildError::Embed { batch: 1, .. }));
        assert!(sleeper.sleeps.lock().unwrap().is_empty());
        let written = String::from_utf8(out).unwrap();
        assert_eq!(written.lines().count(), 5);
    }

    #[test]
    fn parallel_workers_preserve_chunk_order() {
        let embedder = FlakyEmbedder::new(0);
        let sleeper = Arc::new(RecordingSleeper::default());
        let input = chunks(23);
        let records = builder(&embedder, &sleeper, 4).embed_chunks(&input).unwrap();

        let contents: Vec<&str> = records.iter().map(|r| r.content.as_str()).collect();
        let expected: Vec<&str> = input.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, expected);
    }

    #[test]
    fn indexes_are_partitioned_by_heading() {
        let dir = tempfile::tempdir().unwrap();
        let layout = IndexLayout::new(dir.path());
        let embedder = FlakyEmbedder::new(0);
        let sleeper = Arc::new(RecordingSleeper::default());
        let builder = builder(&embedder, &sleeper, 1);
        let records = builder
            .embed_chunks(&[
                Chunk::new("intro", None),
                Chunk::new("pool", Some("OBJECT POOLING".into())),
                Chunk::new("pool more", Some("OBJECT POOLING".into())),
            ])
            .unwrap();
        let built = builder.build_indexes(&records, &layout).unwrap();

        assert_eq!(built.len(), 2);
        assert_eq!(built[1].chunks, 2);
        assert_eq!(built[1].dir, dir.path().join("OBJECT_POOLING"));
        let pooled = FlatIndex::load(&built[1].dir).unwrap();
        assert_eq!(pooled.heading(), "OBJECT POOLING");
        assert_eq!(
            read_heading_list(&layout.headings_file()).unwrap(),
            vec!["_preamble", "OBJECT POOLING"]
        );
    }

    #[test]
    fn colliding_headings_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let layout = IndexLayout::new(dir.path());
        let records = vec![
            EmbeddingRecord {
                content: "a".into(),
                heading: "UI/UX".into(),
                embedding: vec![1.0],
            },
            EmbeddingRecord {
                content: "b".into(),
                heading: "UI UX".into(),
                embedding: vec![1.0],
            },
        ];
        let err = build_heading_indexes(&records, &layout).unwrap_err();
        assert!(matches!(err, BuildError::NameCollision { .. }), "{err}");
        assert!(!dir.path().join("UI_UX").exists());
    }

    #[test]
    fn preamble_stays_apart_from_a_preamble_heading() {
        let dir = tempfile::tempdir().unwrap();
        let layout = IndexLayout::new(dir.path());
        let records = vec![
            EmbeddingRecord::from_chunk(&Chunk::new("lead-in", None), vec![1.0]),
            EmbeddingRecord::from_chunk(&Chunk::new("body", Some("PREAMBLE".into())), vec![1.0]),
        ];
        let built = build_heading_indexes(&records, &layout).unwrap();

        let headings: Vec<&str> = built.iter().map(|b| b.heading.as_str()).collect();
        assert_eq!(headings, vec![crate::records::PREAMBLE_HEADING, "PREAMBLE"]);
        assert_ne!(built[0].dir, built[1].dir);
        assert_eq!(built.iter().map(|b| b.chunks).sum::<usize>(), 2);
    }

    #[test]
    fn dot_headings_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let layout = IndexLayout::new(dir.path().join("indexes"));
        let records = vec![EmbeddingRecord {
            content: "a".into(),
            heading: "..".into(),
            embedding: vec![1.0],
        }];
        let err = build_heading_indexes(&records, &layout).unwrap_err();
        assert!(matches!(err, BuildError::UnusableHeading(ref h) if h == ".."), "{err}");
        assert!(!layout.headings_file().exists());
    }
}
