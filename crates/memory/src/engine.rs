//! The memory engine: ingestion, retrieval, persistence.
//!
//! Readers take a cheap clone of the current `Arc<Snapshot>` and search it
//! without holding any lock. Writers serialize on a mutex, build the next
//! snapshot off to the side, persist it, and only then swap it in, so a
//! write in progress never blocks or disturbs a read. Snapshots share their
//! storage segments, so building the next one costs the size of the batch,
//! and so does persisting it: batches are appended to the files on disk.

use crate::chunker::Chunker;
use crate::persist::{self, IndexFile, IndexHeader, METADATA_VERSION, MetadataFile};
use crate::segment::Segmented;
use crate::vector::FlatIndex;
use chrono::Utc;
use ferrule_config::MemoryConfig;
use ferrule_core::error::MemoryError;
use ferrule_core::event::{DomainEvent, EventBus};
use ferrule_core::memory::{DocumentChunk, Embedder, MemoryQueryResult, Metric, ScoredChunk};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Engine settings independent of where the index lives.
#[derive(Debug, Clone)]
pub struct MemoryOptions {
    pub chunk_size: usize,
    pub overlap_ratio: f32,
    /// Metric for a new index; an existing index keeps its own
    pub metric: Metric,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            overlap_ratio: 0.15,
            metric: Metric::Cosine,
        }
    }
}

impl MemoryOptions {
    pub fn from_config(config: &MemoryConfig) -> Result<Self, MemoryError> {
        let metric = match config.metric.to_ascii_lowercase().as_str() {
            "cosine" => Metric::Cosine,
            "l2" => Metric::L2,
            other => {
                return Err(MemoryError::Storage(format!("unknown metric '{other}'")));
            }
        };
        Ok(Self {
            chunk_size: config.chunk_size,
            overlap_ratio: config.overlap_ratio,
            metric,
        })
    }
}

#[derive(Debug, Clone)]
struct Snapshot {
    generation: u64,
    base_generation: u64,
    index: FlatIndex,
    chunks: Segmented<DocumentChunk>,
}

impl Snapshot {
    fn empty(metric: Metric, dimension: usize) -> Self {
        Self {
            generation: 0,
            base_generation: 0,
            index: FlatIndex::new(metric, dimension),
            chunks: Segmented::new(),
        }
    }

    fn header(&self) -> IndexHeader {
        IndexHeader {
            generation: self.generation,
            base_generation: self.base_generation,
            metric: self.index.metric(),
            dimension: self.index.dimension(),
            count: self.index.len(),
        }
    }
}

/// What the writer knows about the files on disk.
#[derive(Debug, Default)]
struct WriteState {
    /// Header of the last consistent pair this engine loaded or wrote; the
    /// next batch can be appended after it
    on_disk: Option<IndexHeader>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryStats {
    pub chunks: usize,
    pub sources: usize,
    pub dimension: usize,
    pub metric: Metric,
    pub generation: u64,
    pub embedder: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_dir: Option<PathBuf>,
}

pub struct MemoryEngine {
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
    dir: Option<PathBuf>,
    state: RwLock<Arc<Snapshot>>,
    writer: Mutex<WriteState>,
    load_warning: Option<String>,
    events: Option<Arc<EventBus>>,
}

impl MemoryEngine {
    /// A non-persistent engine.
    pub fn in_memory(embedder: Arc<dyn Embedder>, options: MemoryOptions) -> Self {
        let snapshot = Snapshot::empty(options.metric, embedder.dimension());
        Self {
            chunker: Chunker::new(options.chunk_size, options.overlap_ratio),
            embedder,
            dir: None,
            state: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(WriteState::default()),
            load_warning: None,
            events: None,
        }
    }

    /// Open (or create) the index in `dir`.
    ///
    /// A corrupt, inconsistent, or incompatible index never fails the open:
    /// the engine starts empty and reports why through [`Self::load_warning`].
    pub fn open(
        dir: impl AsRef<Path>,
        embedder: Arc<dyn Embedder>,
        options: MemoryOptions,
    ) -> Result<Self, MemoryError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| MemoryError::Storage(format!("Failed to create index directory: {e}")))?;

        let outcome = persist::load(&dir);
        let mut warning = outcome.warning;
        let dimension = embedder.dimension();

        let snapshot = match outcome.loaded {
            Some(loaded) if loaded.dimension != dimension => {
                let reason = format!(
                    "index dimension {} does not match embedder '{}' dimension {dimension}; starting with an empty index",
                    loaded.dimension,
                    embedder.name()
                );
                warn!(dir = %dir.display(), "{reason}");
                warning = Some(reason);
                // The next write replaces the old vectors wholesale.
                Snapshot {
                    generation: loaded.generation,
                    base_generation: loaded.generation + 1,
                    ..Snapshot::empty(options.metric, dimension)
                }
            }
            Some(loaded) => {
                if loaded.metric != options.metric {
                    warn!(
                        persisted = %loaded.metric,
                        configured = %options.metric,
                        "Index metric is fixed at creation; using the persisted metric"
                    );
                }
                let index = FlatIndex::from_raw(loaded.metric, loaded.dimension, loaded.data)?;
                let chunks = loaded
                    .chunks
                    .into_iter()
                    .enumerate()
                    .map(|(i, mut c)| {
                        c.embedding = index.vector(i).map(<[f32]>::to_vec).unwrap_or_default();
                        c
                    })
                    .collect();
                Snapshot {
                    generation: loaded.generation,
                    base_generation: loaded.base_generation,
                    index,
                    chunks: Segmented::from_vec(chunks),
                }
            }
            None => Snapshot::empty(options.metric, dimension),
        };
        // Appends continue only from a pair that loaded cleanly.
        let on_disk = (warning.is_none() && !snapshot.chunks.is_empty()).then(|| snapshot.header());

        info!(
            dir = %dir.display(),
            chunks = snapshot.chunks.len(),
            generation = snapshot.generation,
            "Memory index opened"
        );

        Ok(Self {
            chunker: Chunker::new(options.chunk_size, options.overlap_ratio),
            embedder,
            dir: Some(dir),
            state: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(WriteState { on_disk }),
            load_warning: warning,
            events: None,
        })
    }

    /// Publish `MemoryIngested` events on `bus`.
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Why the persisted index was discarded or trimmed on open, if it was.
    pub fn load_warning(&self) -> Option<&str> {
        self.load_warning.as_deref()
    }

    pub fn index_dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    async fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&*self.state.read().await)
    }

    pub async fn len(&self) -> usize {
        self.snapshot().await.chunks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Chunk, embed, and index one document. Returns the number of chunks.
    pub async fn ingest(&self, source: &str, text: &str) -> Result<usize, MemoryError> {
        self.ingest_batch(&[(source.to_string(), text.to_string())])
            .await
    }

    /// Ingest several documents as one batch, persisted once.
    pub async fn ingest_batch(&self, documents: &[(String, String)]) -> Result<usize, MemoryError> {
        let mut pending: Vec<(String, u32, String)> = Vec::new();
        let mut per_document = Vec::with_capacity(documents.len());
        for (source, text) in documents {
            let spans = self.chunker.split(text);
            per_document.push((source.clone(), spans.len()));
            for (i, span) in spans.into_iter().enumerate() {
                pending.push((source.clone(), i as u32, span));
            }
        }
        if pending.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = pending.iter().map(|(_, _, t)| t.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(MemoryError::EmbeddingFailed(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                texts.len()
            )));
        }

        let mut writer = self.writer.lock().await;
        let current = self.snapshot().await;
        let mut next = Snapshot::clone(&current);
        let start = next.chunks.len();
        let now = Utc::now();

        for ((source, chunk_index, text), vector) in pending.into_iter().zip(vectors) {
            let ordinal = next.index.push(&vector)? as u64;
            next.chunks.push(DocumentChunk {
                ordinal,
                source,
                chunk_index,
                text,
                ingested_at: now,
                embedding: vector,
            });
        }
        next.generation += 1;

        let added = next.chunks.len() - start;
        self.persist_batch(&mut writer, &mut next, start)?;
        *self.state.write().await = Arc::new(next);

        debug!(chunks = added, documents = documents.len(), "Memory batch ingested");
        if let Some(bus) = &self.events {
            for (source, chunks) in per_document.into_iter().filter(|(_, n)| *n > 0) {
                bus.publish(DomainEvent::MemoryIngested {
                    source,
                    chunks,
                    timestamp: now,
                });
            }
        }
        Ok(added)
    }

    /// Top `top_k` chunks for `text`, best first.
    ///
    /// An empty index or `top_k == 0` gives an empty result, not an error.
    pub async fn query(&self, text: &str, top_k: usize) -> Result<MemoryQueryResult, MemoryError> {
        let snapshot = self.snapshot().await;
        if snapshot.chunks.is_empty() || top_k == 0 {
            return Ok(MemoryQueryResult::empty());
        }

        let mut vectors = self.embedder.embed(&[text.to_string()]).await?;
        let query = vectors
            .pop()
            .ok_or_else(|| MemoryError::EmbeddingFailed("embedder returned no vector".into()))?;

        let hits = snapshot
            .index
            .search(&query, top_k)?
            .into_iter()
            .filter_map(|(ordinal, score)| {
                snapshot.chunks.get(ordinal).map(|chunk| ScoredChunk {
                    chunk: chunk.clone(),
                    score,
                })
            })
            .collect();
        Ok(MemoryQueryResult { hits })
    }

    /// Make sure the current snapshot is on disk, rewriting both files if
    /// the last write did not land.
    pub async fn flush(&self) -> Result<(), MemoryError> {
        let mut writer = self.writer.lock().await;
        let current = self.snapshot().await;
        if self.dir.is_none() || writer.on_disk == Some(current.header()) {
            return Ok(());
        }
        let mut next = Snapshot::clone(&current);
        self.rewrite(&mut writer, &mut next)?;
        *self.state.write().await = Arc::new(next);
        Ok(())
    }

    /// Remove every chunk from `source` and rebuild the index.
    pub async fn evict_source(&self, source: &str) -> Result<usize, MemoryError> {
        let mut writer = self.writer.lock().await;
        let current = self.snapshot().await;
        let removed = current.chunks.iter().filter(|c| c.source == source).count();
        if removed == 0 {
            return Ok(0);
        }

        let generation = current.generation + 1;
        let mut next = Snapshot {
            generation,
            base_generation: generation,
            index: FlatIndex::new(current.index.metric(), current.index.dimension()),
            chunks: Segmented::new(),
        };
        for chunk in current.chunks.iter().filter(|c| c.source != source) {
            let vector = current
                .index
                .vector(chunk.ordinal as usize)
                .ok_or_else(|| MemoryError::Corruption(format!("missing vector {}", chunk.ordinal)))?;
            let ordinal = next.index.push(vector)? as u64;
            next.chunks.push(DocumentChunk {
                ordinal,
                ..chunk.clone()
            });
        }

        self.rewrite(&mut writer, &mut next)?;
        *self.state.write().await = Arc::new(next);
        info!(source, removed, "Evicted source from memory index");
        Ok(removed)
    }

    pub async fn stats(&self) -> MemoryStats {
        let snapshot = self.snapshot().await;
        let sources: BTreeSet<&str> = snapshot.chunks.iter().map(|c| c.source.as_str()).collect();
        MemoryStats {
            chunks: snapshot.chunks.len(),
            sources: sources.len(),
            dimension: snapshot.index.dimension(),
            metric: snapshot.index.metric(),
            generation: snapshot.generation,
            embedder: self.embedder.name().to_string(),
            index_dir: self.dir.clone(),
        }
    }

    /// Persist a batch that starts at ordinal `start`: appended when the
    /// files on disk end where `next` began, rewritten otherwise.
    fn persist_batch(
        &self,
        writer: &mut WriteState,
        next: &mut Snapshot,
        start: usize,
    ) -> Result<(), MemoryError> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let appendable = writer
            .on_disk
            .filter(|h| h.count == start && h.base_generation == next.base_generation);
        if let Some(committed) = appendable {
            let values: Vec<f32> = next.index.values_from(start).collect();
            let chunks: Vec<DocumentChunk> = next.chunks.tail(start).cloned().collect();
            match persist::append_batch(dir, &committed, next.generation, &values, &chunks) {
                Ok(true) => {
                    writer.on_disk = Some(next.header());
                    return Ok(());
                }
                Ok(false) => warn!(dir = %dir.display(), "Index files changed on disk; rewriting them"),
                Err(e) => {
                    writer.on_disk = None;
                    return Err(e);
                }
            }
        }
        self.rewrite(writer, next)
    }

    /// Rewrite both files from `next`, starting a new base generation.
    fn rewrite(&self, writer: &mut WriteState, next: &mut Snapshot) -> Result<(), MemoryError> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        writer.on_disk = None;
        next.base_generation = next.generation;
        let index = IndexFile {
            generation: next.generation,
            base_generation: next.base_generation,
            metric: next.index.metric(),
            dimension: next.index.dimension(),
            data: next.index.values_from(0).collect(),
        };
        let metadata = MetadataFile {
            version: METADATA_VERSION,
            generation: next.generation,
            metric: next.index.metric(),
            dimension: next.index.dimension(),
            embedder: self.embedder.name().to_string(),
            chunks: next.chunks.to_vec(),
        };
        persist::write_pair(dir, &index, &metadata)?;
        writer.on_disk = Some(next.header());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashingEmbedder;
    use crate::persist::{INDEX_FILE, METADATA_FILE};
    use tempfile::TempDir;

    fn embedder() -> Arc<dyn Embedder> {
        Arc::new(HashingEmbedder::new(128))
    }

    fn options() -> MemoryOptions {
        MemoryOptions {
            chunk_size: 120,
            overlap_ratio: 0.1,
            metric: Metric::Cosine,
        }
    }

    const RUST_DOC: &str = "Rust guarantees memory safety without a garbage collector. \
        Ownership and borrowing are checked at compile time. \
        The borrow checker rejects dangling references before the program runs.";
    const BREAD_DOC: &str = "Sourdough bread needs a lively starter and a long cold proof. \
        Bake it in a preheated dutch oven for a crisp crust.";

    #[tokio::test]
    async fn empty_index_query_is_empty() {
        let engine = MemoryEngine::in_memory(embedder(), options());
        let result = engine.query("anything at all", 5).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn empty_document_produces_no_chunks() {
        let engine = MemoryEngine::in_memory(embedder(), options());
        assert_eq!(engine.ingest("empty.txt", "   \n ").await.unwrap(), 0);
        assert!(engine.is_empty().await);
        assert_eq!(engine.stats().await.generation, 0);
    }

    #[tokio::test]
    async fn verbatim_substring_finds_its_document() {
        let engine = MemoryEngine::in_memory(embedder(), options());
        engine.ingest("rust.md", RUST_DOC).await.unwrap();
        engine.ingest("bread.md", BREAD_DOC).await.unwrap();

        let result = engine.query("a long cold proof", 2).await.unwrap();
        assert_eq!(result.hits[0].chunk.source, "bread.md");

        let result = engine.query("The borrow checker rejects dangling references", 1).await.unwrap();
        assert_eq!(result.hits[0].chunk.source, "rust.md");
    }

    #[tokio::test]
    async fn repeated_queries_are_identical() {
        let engine = MemoryEngine::in_memory(embedder(), options());
        engine.ingest("rust.md", RUST_DOC).await.unwrap();
        engine.ingest("bread.md", BREAD_DOC).await.unwrap();

        let first = engine.query("compile time checks", 3).await.unwrap();
        let second = engine.query("compile time checks", 3).await.unwrap();
        assert_eq!(first, second);
        assert!(first.len() <= 3);
        assert!(first.hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn equal_scores_keep_insertion_order() {
        let engine = MemoryEngine::in_memory(embedder(), options());
        engine.ingest("first", "identical text").await.unwrap();
        engine.ingest("second", "identical text").await.unwrap();

        let result = engine.query("identical text", 2).await.unwrap();
        assert_eq!(result.hits[0].chunk.source, "first");
        assert_eq!(result.hits[1].chunk.source, "second");
    }

    #[tokio::test]
    async fn index_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let engine = MemoryEngine::open(dir.path(), embedder(), options()).unwrap();
            engine.ingest("rust.md", RUST_DOC).await.unwrap();
            engine.ingest("bread.md", BREAD_DOC).await.unwrap();
        }

        let engine = MemoryEngine::open(dir.path(), embedder(), options()).unwrap();
        assert!(engine.load_warning().is_none());
        let stats = engine.stats().await;
        assert_eq!(stats.sources, 2);
        assert_eq!(stats.generation, 2);

        let result = engine.query("dutch oven crust", 1).await.unwrap();
        assert_eq!(result.hits[0].chunk.source, "bread.md");
        assert!(!result.hits[0].chunk.embedding.is_empty());
    }

    #[tokio::test]
    async fn later_batches_append_to_the_files() {
        let dir = TempDir::new().unwrap();
        let engine = MemoryEngine::open(dir.path(), embedder(), options()).unwrap();
        engine.ingest("rust.md", RUST_DOC).await.unwrap();
        let index_before = std::fs::read(dir.path().join(INDEX_FILE)).unwrap();
        let metadata_before = std::fs::read(dir.path().join(METADATA_FILE)).unwrap();

        engine.ingest("bread.md", BREAD_DOC).await.unwrap();
        let index_after = std::fs::read(dir.path().join(INDEX_FILE)).unwrap();
        let metadata_after = std::fs::read(dir.path().join(METADATA_FILE)).unwrap();

        // Vectors of the first batch stay where they were; only the header moved.
        assert!(index_after.len() > index_before.len());
        assert_eq!(&index_after[persist::HEADER_LEN..index_before.len()], &index_before[persist::HEADER_LEN..]);
        assert!(metadata_after.starts_with(&metadata_before));

        let reopened = MemoryEngine::open(dir.path(), embedder(), options()).unwrap();
        assert!(reopened.load_warning().is_none());
        assert_eq!(reopened.stats().await.sources, 2);

        // A reopened engine keeps appending.
        reopened.ingest("more.md", "A third document about ferries").await.unwrap();
        let appended = std::fs::read(dir.path().join(METADATA_FILE)).unwrap();
        assert!(appended.starts_with(&metadata_after));
    }

    #[tokio::test]
    async fn corrupt_index_starts_empty_with_warning() {
        let dir = TempDir::new().unwrap();
        {
            let engine = MemoryEngine::open(dir.path(), embedder(), options()).unwrap();
            engine.ingest("rust.md", RUST_DOC).await.unwrap();
        }
        std::fs::write(dir.path().join(INDEX_FILE), b"not an index").unwrap();

        let engine = MemoryEngine::open(dir.path(), embedder(), options()).unwrap();
        assert!(engine.load_warning().is_some());
        assert!(engine.is_empty().await);

        // The engine stays writable after discarding the bad files.
        engine.ingest("bread.md", BREAD_DOC).await.unwrap();
        let reopened = MemoryEngine::open(dir.path(), embedder(), options()).unwrap();
        assert!(reopened.load_warning().is_none());
        assert_eq!(reopened.stats().await.sources, 1);
    }

    #[tokio::test]
    async fn missing_directory_is_created_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("index");
        let engine = MemoryEngine::open(&path, embedder(), options()).unwrap();
        assert!(engine.is_empty().await);
        assert!(engine.load_warning().is_none());
        assert!(path.is_dir());
    }

    #[tokio::test]
    async fn interrupted_write_recovers_previous_batch() {
        let dir = TempDir::new().unwrap();
        let saved_metadata;
        {
            let engine = MemoryEngine::open(dir.path(), embedder(), options()).unwrap();
            engine.ingest("rust.md", RUST_DOC).await.unwrap();
            saved_metadata = std::fs::read(dir.path().join(METADATA_FILE)).unwrap();
            engine.ingest("bread.md", BREAD_DOC).await.unwrap();
        }
        // Index of batch 2 landed, metadata of batch 2 did not.
        std::fs::write(dir.path().join(METADATA_FILE), saved_metadata).unwrap();

        let engine = MemoryEngine::open(dir.path(), embedder(), options()).unwrap();
        assert!(engine.load_warning().is_some());
        let stats = engine.stats().await;
        assert_eq!(stats.sources, 1);
        assert_eq!(stats.generation, 1);

        let result = engine.query("borrow checker", 5).await.unwrap();
        assert!(result.hits.iter().all(|h| h.chunk.source == "rust.md"));
    }

    #[tokio::test]
    async fn persisted_metric_wins_over_configured() {
        let dir = TempDir::new().unwrap();
        {
            let l2 = MemoryOptions {
                metric: Metric::L2,
                ..options()
            };
            let engine = MemoryEngine::open(dir.path(), embedder(), l2).unwrap();
            engine.ingest("rust.md", RUST_DOC).await.unwrap();
        }
        let engine = MemoryEngine::open(dir.path(), embedder(), options()).unwrap();
        assert_eq!(engine.stats().await.metric, Metric::L2);
    }

    #[tokio::test]
    async fn dimension_change_starts_empty() {
        let dir = TempDir::new().unwrap();
        {
            let engine = MemoryEngine::open(dir.path(), embedder(), options()).unwrap();
            engine.ingest("rust.md", RUST_DOC).await.unwrap();
        }
        let wider: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(256));
        let engine = MemoryEngine::open(dir.path(), wider, options()).unwrap();
        assert!(engine.is_empty().await);
        assert!(engine.load_warning().unwrap().contains("dimension"));

        engine.ingest("bread.md", BREAD_DOC).await.unwrap();
        assert_eq!(engine.stats().await.dimension, 256);
    }

    #[tokio::test]
    async fn evict_source_rebuilds_ordinals() {
        let dir = TempDir::new().unwrap();
        let engine = MemoryEngine::open(dir.path(), embedder(), options()).unwrap();
        engine.ingest("rust.md", RUST_DOC).await.unwrap();
        engine.ingest("bread.md", BREAD_DOC).await.unwrap();

        let removed = engine.evict_source("rust.md").await.unwrap();
        assert!(removed > 0);
        assert_eq!(engine.evict_source("missing").await.unwrap(), 0);

        let result = engine.query("borrow checker", 10).await.unwrap();
        assert!(result.hits.iter().all(|h| h.chunk.source == "bread.md"));
        for (i, hit) in result.hits.iter().enumerate() {
            assert!(hit.chunk.ordinal < result.len() as u64, "hit {i} out of range");
        }

        let reopened = MemoryEngine::open(dir.path(), embedder(), options()).unwrap();
        assert!(reopened.load_warning().is_none());
        assert_eq!(reopened.stats().await.sources, 1);
    }

    #[tokio::test]
    async fn concurrent_readers_and_writer() {
        let engine = Arc::new(MemoryEngine::in_memory(embedder(), options()));
        engine.ingest("rust.md", RUST_DOC).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..4 {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                engine
                    .ingest(&format!("doc-{i}"), &format!("document number {i} about ferries"))
                    .await
                    .unwrap();
            }));
        }
        for _ in 0..4 {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                let result = engine.query("ownership and borrowing", 1).await.unwrap();
                assert_eq!(result.hits[0].chunk.source, "rust.md");
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = engine.stats().await;
        assert_eq!(stats.sources, 5);
        assert_eq!(stats.generation, 5);
    }

    #[tokio::test]
    async fn ingest_publishes_events() {
        let bus = Arc::new(EventBus::new(8));
        let mut rx = bus.subscribe();
        let engine = MemoryEngine::in_memory(embedder(), options()).with_events(Arc::clone(&bus));

        let n = engine.ingest("rust.md", RUST_DOC).await.unwrap();
        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::MemoryIngested { source, chunks, .. } => {
                assert_eq!(source, "rust.md");
                assert_eq!(*chunks, n);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn options_from_config_parse_metric() {
        let mut config = MemoryConfig::default();
        config.metric = "L2".into();
        assert_eq!(MemoryOptions::from_config(&config).unwrap().metric, Metric::L2);
        config.metric = "manhattan".into();
        assert!(MemoryOptions::from_config(&config).is_err());
    }
}
