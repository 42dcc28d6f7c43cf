//! Pipeline orchestration: lifecycle, index builds, and query handling.
//!
//! The pipeline moves through uninitialized -> initializing -> ready, or to
//! an error state when the model or a persisted index cannot be brought up.
//! State is published on a watch channel so queries can wait for readiness
//! without polling, and health checks can observe it without blocking.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock, watch};

use crate::error::{ConfigError, IndexError, PipelineError};
use crate::models::{
    Answer, Config, HealthReport, IndexReport, PipelineState, QueryOptions, SourceDocument,
};
use crate::services::chunker::TextChunker;
use crate::services::embedding::Embedder;
use crate::services::generator::{AnswerStream, GenerationBackend, Generator, HttpBackend};
use crate::services::retriever::{Retriever, SharedIndex};
use crate::services::vector_index::{IndexEntry, VectorIndex};
use crate::utils::file::{collect_corpus_files, read_file_content};
use crate::utils::text::has_meaningful_content;

/// Orchestrates chunking, embedding, indexing, retrieval, and generation.
///
/// Intended to be shared as `Arc<RagPipeline>`: queries, index builds, and
/// health checks may run concurrently from separate tasks.
pub struct RagPipeline {
    config: Config,
    embedder: Arc<Embedder>,
    retriever: Retriever,
    generator: Generator,
    index_slot: SharedIndex,
    state_tx: watch::Sender<PipelineState>,
    // Serializes initialization and index builds
    init_lock: Mutex<()>,
}

impl RagPipeline {
    /// Pipeline with the configured ONNX embedder and HTTP generation
    /// backend. Construction is cheap; the model loads on first use.
    pub fn new(config: Config) -> Result<Self, PipelineError> {
        let embedder = Arc::new(Embedder::with_onnx(&config.embedding));
        let backend: Arc<dyn GenerationBackend> = Arc::new(HttpBackend::new(&config.generation)?);
        Self::with_backends(config, embedder, backend)
            .map_err(|e| PipelineError::InitializationFailed(e.to_string()))
    }

    /// Pipeline over explicit backends. Used directly by tests; `new` is the
    /// production path.
    pub fn with_backends(
        config: Config,
        embedder: Arc<Embedder>,
        generation: Arc<dyn GenerationBackend>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let index_slot: SharedIndex = Arc::new(RwLock::new(None));
        let retriever = Retriever::new(embedder.clone(), index_slot.clone(), &config.retrieval);
        let generator = Generator::new(generation, &config.generation);
        let (state_tx, _) = watch::channel(PipelineState::Uninitialized);

        Ok(Self {
            config,
            embedder,
            retriever,
            generator,
            index_slot,
            state_tx,
            init_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current lifecycle state. Cheap snapshot, never blocks.
    pub fn state(&self) -> PipelineState {
        self.state_tx.borrow().clone()
    }

    /// Watch the lifecycle state for changes.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: PipelineState) {
        self.state_tx.send_replace(state);
    }

    /// Eagerly initialize: load the embedding model and any persisted index.
    /// Callers that want the first query to be fast call this at startup.
    pub async fn warm_up(&self) -> Result<(), PipelineError> {
        self.initialize().await
    }

    /// Leave the error state by re-running initialization from scratch.
    pub async fn retry_init(&self) -> Result<(), PipelineError> {
        {
            let _guard = self.init_lock.lock().await;
            if matches!(self.state(), PipelineState::Error(_)) {
                self.set_state(PipelineState::Uninitialized);
            }
        }
        self.initialize().await
    }

    /// One-shot initialization behind the init lock. Concurrent callers all
    /// wait for the same attempt; a failure is recorded in the state and
    /// sticks until `retry_init` or a successful index build.
    async fn initialize(&self) -> Result<(), PipelineError> {
        let _guard = self.init_lock.lock().await;

        match self.state() {
            PipelineState::Ready => return Ok(()),
            PipelineState::Error(reason) => {
                return Err(PipelineError::InitializationFailed(reason));
            }
            _ => {}
        }

        self.set_state(PipelineState::Initializing);
        match self.run_init().await {
            Ok(()) => {
                self.set_state(PipelineState::Ready);
                Ok(())
            }
            Err(e) => {
                self.set_state(PipelineState::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn run_init(&self) -> Result<(), PipelineError> {
        self.embedder.ensure_loaded().await?;
        let dimension = self.embedder.dimension().await?;

        match VectorIndex::load(&self.config.index_dir()) {
            Ok(index) => {
                index.validate_model(self.embedder.model_id(), dimension)?;
                *self.index_slot.write().await = Some(Arc::new(index));
            }
            // No persisted index yet: the pipeline is still ready, queries
            // fail with not-ready until a corpus is indexed.
            Err(IndexError::NotFound(_)) => {}
            Err(e) => return Err(PipelineError::Index(e)),
        }

        Ok(())
    }

    /// Block until the pipeline is ready, up to the configured wait. A zero
    /// wait fails immediately when not ready. An error-state pipeline fails
    /// with the recorded reason instead of waiting.
    pub async fn ensure_ready(self: &Arc<Self>) -> Result<(), PipelineError> {
        match self.state() {
            PipelineState::Ready => return Ok(()),
            PipelineState::Error(reason) => {
                return Err(PipelineError::InitializationFailed(reason));
            }
            _ => {}
        }

        let wait = Duration::from_millis(self.config.pipeline.init_wait_timeout_ms);
        if wait.is_zero() {
            return Err(PipelineError::InitializationTimeout);
        }

        // Drive initialization on a detached task so a caller timing out
        // does not cancel the load for everyone else. Spawning while already
        // Initializing is deliberate: if the previous driver was cancelled
        // mid-load the state would otherwise never advance, and `initialize`
        // is idempotent behind the init lock.
        let mut state_rx = self.subscribe();
        if !matches!(
            self.state(),
            PipelineState::Ready | PipelineState::Error(_)
        ) {
            let pipeline = Arc::clone(self);
            tokio::spawn(async move {
                let _ = pipeline.initialize().await;
            });
        }

        let outcome = tokio::time::timeout(wait, async {
            loop {
                match state_rx.borrow_and_update().clone() {
                    PipelineState::Ready => return Ok(()),
                    PipelineState::Error(reason) => {
                        return Err(PipelineError::InitializationFailed(reason));
                    }
                    _ => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(PipelineError::InitializationFailed(
                        "pipeline dropped during initialization".to_string(),
                    ));
                }
            }
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(PipelineError::InitializationTimeout),
        }
    }

    /// Answer a question from the indexed corpus.
    ///
    /// When retrieval yields nothing above the relevance floor, the backend
    /// still answers and the result carries `grounded: false`.
    pub async fn query(
        self: &Arc<Self>,
        question: &str,
        options: &QueryOptions,
    ) -> Result<Answer, PipelineError> {
        self.ensure_ready().await?;

        let k = options
            .top_k
            .map(|k| k as usize)
            .unwrap_or_else(|| self.retriever.default_top_k());
        let chunks = self.retriever.retrieve(question, k).await?;
        let answer = self
            .generator
            .answer(question, &chunks, options.include_context)
            .await?;
        Ok(answer)
    }

    /// Streaming variant of [`query`](Self::query). The returned stream
    /// yields answer fragments as the backend produces them; dropping it
    /// cancels the generation.
    pub async fn query_stream(
        self: &Arc<Self>,
        question: &str,
        options: &QueryOptions,
    ) -> Result<AnswerStream, PipelineError> {
        self.ensure_ready().await?;

        let k = options
            .top_k
            .map(|k| k as usize)
            .unwrap_or_else(|| self.retriever.default_top_k());
        let chunks = self.retriever.retrieve(question, k).await?;
        let stream = self.generator.answer_stream(question, &chunks).await?;
        Ok(stream)
    }

    /// Build the index from a corpus directory and atomically swap it in.
    ///
    /// The previous index keeps serving queries until the new one is
    /// persisted and swapped. A successful build also repairs an error-state
    /// pipeline. Chunks that fail to embed are skipped and counted, never
    /// aborting the build.
    pub async fn index_corpus(&self, corpus_dir: &Path) -> Result<IndexReport, PipelineError> {
        let _guard = self.init_lock.lock().await;

        // A first-time build doubles as initialization, so the state must
        // show it; a rebuild from Ready keeps the old index servable and
        // stays Ready throughout.
        let previous = self.state();
        if previous != PipelineState::Ready {
            self.set_state(PipelineState::Initializing);
        }

        match self.run_index_build(corpus_dir).await {
            Ok(report) => {
                self.set_state(PipelineState::Ready);
                Ok(report)
            }
            Err(e) => {
                if matches!(e, PipelineError::Model(_)) {
                    self.set_state(PipelineState::Error(e.to_string()));
                } else if previous != PipelineState::Ready {
                    // Corpus-level failures are not fatal to the pipeline;
                    // put the state back rather than strand Initializing.
                    self.set_state(previous);
                }
                Err(e)
            }
        }
    }

    async fn run_index_build(&self, corpus_dir: &Path) -> Result<IndexReport, PipelineError> {
        let started = Instant::now();

        self.embedder.ensure_loaded().await?;
        let dimension = self.embedder.dimension().await?;

        let files = collect_corpus_files(corpus_dir, &self.config.index.exclude_patterns)
            .map_err(|e| PipelineError::Corpus(e.to_string()))?;
        if files.is_empty() {
            return Err(PipelineError::EmptyCorpus);
        }

        let chunker = TextChunker::new(&self.config.chunking)
            .map_err(|e| PipelineError::Corpus(e.to_string()))?;

        let mut documents_indexed = 0u64;
        let mut skipped_chunks = 0u64;
        let mut all_chunks = Vec::new();

        for path in &files {
            let text = match read_file_content(path, self.config.index.max_file_size) {
                Ok(text) => text,
                Err(e) => {
                    eprintln!("skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            if !has_meaningful_content(&text) {
                continue;
            }

            let document = SourceDocument::new(path.to_string_lossy(), text);
            all_chunks.extend(chunker.chunk(&document));
            documents_indexed += 1;
        }

        if all_chunks.is_empty() {
            return Err(PipelineError::EmptyCorpus);
        }

        let texts: Vec<String> = all_chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_many(&texts).await?;

        let mut index = VectorIndex::new(self.embedder.model_id(), dimension);
        for (chunk, embedding) in all_chunks.iter().zip(embeddings) {
            match embedding {
                Ok(vector) => index.add(IndexEntry::from_chunk(chunk), &vector)?,
                Err(e) => {
                    eprintln!("skipping chunk {}: {}", chunk.id, e);
                    skipped_chunks += 1;
                }
            }
        }

        if index.is_empty() {
            return Err(PipelineError::Corpus(
                "no chunks could be embedded".to_string(),
            ));
        }

        let chunk_count = index.len() as u64;
        index.save(&self.config.index_dir())?;

        // Swap: in-flight queries keep their clone of the old index
        *self.index_slot.write().await = Some(Arc::new(index));

        Ok(IndexReport {
            status: "ok".to_string(),
            documents_indexed,
            chunk_count,
            skipped_chunks,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Health snapshot. Reports the true lifecycle state even while an
    /// initialization or index build is in flight; the slot's write lock is
    /// only ever held for an assignment, so this read does not wait on
    /// model loads or builds.
    pub async fn health(&self) -> HealthReport {
        let (index_ready, chunk_count) = match self.index_slot.read().await.as_ref() {
            Some(index) => (true, index.len() as u64),
            None => (false, 0),
        };

        HealthReport {
            state: self.state(),
            index_ready,
            chunk_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GenerationError, ModelError};
    use crate::services::embedding::{BackendLoader, EmbeddingBackend};
    use crate::services::generator::{FragmentStream, Prompt};
    use async_trait::async_trait;
    use futures::stream;

    struct HashBackend;

    impl EmbeddingBackend for HashBackend {
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = [0.1f32; 3];
                    for (i, b) in t.bytes().enumerate() {
                        v[i % 3] += b as f32;
                    }
                    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
                    v.iter().map(|x| x / norm).collect()
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    struct CannedBackend;

    #[async_trait]
    impl GenerationBackend for CannedBackend {
        async fn complete(&self, _prompt: &Prompt) -> Result<String, GenerationError> {
            Ok("إجابة".to_string())
        }

        async fn complete_stream(
            &self,
            _prompt: &Prompt,
        ) -> Result<FragmentStream, GenerationError> {
            Ok(Box::pin(stream::iter(vec![Ok("إجابة".to_string())])))
        }
    }

    fn test_embedder() -> Arc<Embedder> {
        let loader: BackendLoader = Box::new(|| {
            Box::pin(async { Ok(Arc::new(HashBackend) as Arc<dyn EmbeddingBackend>) })
        });
        Arc::new(Embedder::new("hash-model", 4, loader))
    }

    fn test_config(index_dir: &Path) -> Config {
        let mut config = Config::default();
        config.index.data_dir = Some(index_dir.to_string_lossy().to_string());
        config.chunking.chunk_size_words = 20;
        config.chunking.overlap_words = 5;
        config
    }

    fn pipeline(index_dir: &Path) -> Arc<RagPipeline> {
        Arc::new(
            RagPipeline::with_backends(
                test_config(index_dir),
                test_embedder(),
                Arc::new(CannedBackend),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_starts_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        assert_eq!(p.state(), PipelineState::Uninitialized);

        let health = p.health().await;
        assert_eq!(health.state, PipelineState::Uninitialized);
        assert!(!health.index_ready);
        assert_eq!(health.chunk_count, 0);
    }

    #[tokio::test]
    async fn test_warm_up_without_index_is_ready() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        p.warm_up().await.unwrap();
        assert_eq!(p.state(), PipelineState::Ready);

        // Ready but empty: queries report not-ready rather than answering
        let result = p.query("ما هو الفاعل؟", &QueryOptions::default()).await;
        assert!(matches!(
            result,
            Err(PipelineError::Retrieval(
                crate::error::RetrievalError::NotReady
            ))
        ));
    }

    #[tokio::test]
    async fn test_zero_wait_query_fails_immediately_while_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.pipeline.init_wait_timeout_ms = 0;
        let p = Arc::new(
            RagPipeline::with_backends(config, test_embedder(), Arc::new(CannedBackend)).unwrap(),
        );

        let result = p.query("سؤال", &QueryOptions::default()).await;
        assert!(matches!(result, Err(PipelineError::InitializationTimeout)));
    }

    #[tokio::test]
    async fn test_failed_model_load_reaches_error_state() {
        let dir = tempfile::tempdir().unwrap();
        let loader: BackendLoader = Box::new(|| {
            Box::pin(async { Err(ModelError::NotFound("no weights".to_string())) })
        });
        let embedder = Arc::new(Embedder::new("broken", 4, loader));
        let p = Arc::new(
            RagPipeline::with_backends(test_config(dir.path()), embedder, Arc::new(CannedBackend))
                .unwrap(),
        );

        assert!(p.warm_up().await.is_err());
        assert!(matches!(p.state(), PipelineState::Error(_)));

        // Queries surface the recorded reason without re-attempting the load
        let result = p.query("سؤال", &QueryOptions::default()).await;
        assert!(matches!(
            result,
            Err(PipelineError::InitializationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_index_and_query_roundtrip() {
        let corpus = tempfile::tempdir().unwrap();
        let index_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            corpus.path().join("lesson.txt"),
            "الفاعل اسم مرفوع يدل على من قام بالفعل وهو ركن أساسي في الجملة الفعلية عند النحاة",
        )
        .unwrap();

        let p = pipeline(index_dir.path());
        let report = p.index_corpus(corpus.path()).await.unwrap();
        assert_eq!(report.documents_indexed, 1);
        assert!(report.chunk_count >= 1);
        assert_eq!(report.skipped_chunks, 0);
        assert_eq!(p.state(), PipelineState::Ready);

        let answer = p
            .query("ما هو الفاعل؟", &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(answer.text, "إجابة");
        assert!(answer.grounded);

        let health = p.health().await;
        assert!(health.index_ready);
        assert_eq!(health.chunk_count, report.chunk_count);
    }

    #[tokio::test]
    async fn test_index_empty_corpus_is_an_error() {
        let corpus = tempfile::tempdir().unwrap();
        let index_dir = tempfile::tempdir().unwrap();
        let p = pipeline(index_dir.path());

        assert!(matches!(
            p.index_corpus(corpus.path()).await,
            Err(PipelineError::EmptyCorpus)
        ));
    }

    #[tokio::test]
    async fn test_init_loads_persisted_index() {
        let corpus = tempfile::tempdir().unwrap();
        let index_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            corpus.path().join("lesson.txt"),
            "المفعول به اسم منصوب يقع عليه فعل الفاعل في الجملة الفعلية التامة عند علماء النحو",
        )
        .unwrap();

        // First pipeline builds and persists
        let first = pipeline(index_dir.path());
        first.index_corpus(corpus.path()).await.unwrap();

        // Second pipeline finds the index during initialization
        let second = pipeline(index_dir.path());
        second.warm_up().await.unwrap();
        let health = second.health().await;
        assert!(health.index_ready);
        assert!(health.chunk_count >= 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_queries_share_one_model_load() {
        let corpus = tempfile::tempdir().unwrap();
        let index_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            corpus.path().join("lesson.txt"),
            "النعت تابع يصف اسما قبله ويطابقه في الإعراب والتعريف والتنكير والإفراد والتثنية والجمع",
        )
        .unwrap();

        let loads = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = loads.clone();
        let loader: BackendLoader = Box::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(Arc::new(HashBackend) as Arc<dyn EmbeddingBackend>)
            })
        });
        let embedder = Arc::new(Embedder::new("hash-model", 4, loader));
        let p = Arc::new(
            RagPipeline::with_backends(
                test_config(index_dir.path()),
                embedder,
                Arc::new(CannedBackend),
            )
            .unwrap(),
        );
        p.index_corpus(corpus.path()).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..6 {
            let p = p.clone();
            handles.push(tokio::spawn(async move {
                p.query(&format!("سؤال {}", i), &QueryOptions::default())
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(loads.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rebuild_swaps_index_under_live_pipeline() {
        let index_dir = tempfile::tempdir().unwrap();
        let p = pipeline(index_dir.path());

        let first = tempfile::tempdir().unwrap();
        std::fs::write(
            first.path().join("a.txt"),
            "الحال اسم منصوب يبين هيئة الفاعل أو المفعول به عند وقوع الفعل في الجملة الفعلية",
        )
        .unwrap();
        let report_a = p.index_corpus(first.path()).await.unwrap();

        let second = tempfile::tempdir().unwrap();
        std::fs::write(
            second.path().join("b.txt"),
            "التمييز اسم نكرة منصوب يذكر لبيان المقصود من اسم مبهم قبله في الجملة العربية الفصيحة",
        )
        .unwrap();
        std::fs::write(
            second.path().join("c.txt"),
            "المبتدأ اسم مرفوع يقع في أول الجملة الاسمية والخبر هو الجزء الذي تتم به الفائدة معه",
        )
        .unwrap();
        let report_b = p.index_corpus(second.path()).await.unwrap();

        assert_eq!(report_a.documents_indexed, 1);
        assert_eq!(report_b.documents_indexed, 2);

        // Health reflects the new index, and queries keep working
        let health = p.health().await;
        assert_eq!(health.chunk_count, report_b.chunk_count);
        assert!(
            p.query("ما هو التمييز؟", &QueryOptions::default())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_corrupt_persisted_index_fails_init() {
        let corpus = tempfile::tempdir().unwrap();
        let index_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            corpus.path().join("lesson.txt"),
            "الخبر هو الجزء الذي تتم به الفائدة مع المبتدأ وقد يكون مفردا أو جملة أو شبه جملة",
        )
        .unwrap();

        let first = pipeline(index_dir.path());
        first.index_corpus(corpus.path()).await.unwrap();

        // Truncate the vector file of the active generation
        for entry in std::fs::read_dir(index_dir.path()).unwrap().flatten() {
            if entry.path().is_dir() {
                let vectors = entry.path().join("vectors.bin");
                let bytes = std::fs::read(&vectors).unwrap();
                std::fs::write(&vectors, &bytes[..bytes.len() - 8]).unwrap();
            }
        }

        let second = pipeline(index_dir.path());
        assert!(second.warm_up().await.is_err());
        assert!(matches!(second.state(), PipelineState::Error(_)));
    }

    #[tokio::test]
    async fn test_overlapping_chunks_from_larger_document() {
        // 40 words with chunk size 20 and overlap 5 must produce 3 chunks
        let corpus = tempfile::tempdir().unwrap();
        let index_dir = tempfile::tempdir().unwrap();
        let words: Vec<String> = (0..40).map(|i| format!("كلمة{}", i)).collect();
        std::fs::write(corpus.path().join("long.txt"), words.join(" ")).unwrap();

        let p = pipeline(index_dir.path());
        let report = p.index_corpus(corpus.path()).await.unwrap();
        assert_eq!(report.chunk_count, 3);
    }

    fn slow_embedder(delay_ms: u64) -> Arc<Embedder> {
        let loader: BackendLoader = Box::new(move || {
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                Ok(Arc::new(HashBackend) as Arc<dyn EmbeddingBackend>)
            })
        });
        Arc::new(Embedder::new("hash-model", 4, loader))
    }

    #[tokio::test]
    async fn test_first_index_build_reports_initializing() {
        let corpus = tempfile::tempdir().unwrap();
        let index_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            corpus.path().join("lesson.txt"),
            "الجر من علامات الاسم ويكون بحرف الجر أو بالإضافة أو بالتبعية لاسم مجرور قبله",
        )
        .unwrap();

        let p = Arc::new(
            RagPipeline::with_backends(
                test_config(index_dir.path()),
                slow_embedder(150),
                Arc::new(CannedBackend),
            )
            .unwrap(),
        );

        let builder = {
            let p = p.clone();
            let dir = corpus.path().to_path_buf();
            tokio::spawn(async move { p.index_corpus(&dir).await })
        };

        // Sample mid-build, while the model load is still in flight
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let health = p.health().await;
        assert_eq!(health.state, PipelineState::Initializing);
        assert!(!health.index_ready);
        assert_eq!(health.chunk_count, 0);

        builder.await.unwrap().unwrap();
        assert_eq!(p.state(), PipelineState::Ready);
    }

    #[tokio::test]
    async fn test_failed_first_build_restores_uninitialized() {
        let corpus = tempfile::tempdir().unwrap();
        let index_dir = tempfile::tempdir().unwrap();
        let p = pipeline(index_dir.path());

        assert!(matches!(
            p.index_corpus(corpus.path()).await,
            Err(PipelineError::EmptyCorpus)
        ));
        // A corpus-level failure must not leave the state at Initializing
        assert_eq!(p.state(), PipelineState::Uninitialized);
    }

    #[tokio::test]
    async fn test_query_recovers_from_interrupted_warm_up() {
        let corpus = tempfile::tempdir().unwrap();
        let index_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            corpus.path().join("lesson.txt"),
            "التوكيد تابع يذكر لتقرير المؤكد ودفع احتمال السهو أو المجاز عنه في الكلام العربي",
        )
        .unwrap();
        pipeline(index_dir.path())
            .index_corpus(corpus.path())
            .await
            .unwrap();

        let p = Arc::new(
            RagPipeline::with_backends(
                test_config(index_dir.path()),
                slow_embedder(100),
                Arc::new(CannedBackend),
            )
            .unwrap(),
        );

        // Kill the warm-up mid model load, stranding the initializing state
        // with nothing driving it
        let warm = {
            let p = p.clone();
            tokio::spawn(async move { p.warm_up().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        warm.abort();
        assert!(warm.await.is_err());
        assert_eq!(p.state(), PipelineState::Initializing);

        // A later query must restart initialization and succeed
        let answer = p
            .query("ما هو التوكيد؟", &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(answer.text, "إجابة");
        assert_eq!(p.state(), PipelineState::Ready);
    }

    #[tokio::test]
    async fn test_retry_init_leaves_error_state() {
        let dir = tempfile::tempdir().unwrap();
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = attempts.clone();
        // Fails on the first load attempt, succeeds on later ones
        let loader: BackendLoader = Box::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                    Err(ModelError::LoadError("transient".to_string()))
                } else {
                    Ok(Arc::new(HashBackend) as Arc<dyn EmbeddingBackend>)
                }
            })
        });
        let embedder = Arc::new(Embedder::new("hash-model", 4, loader));
        let p = Arc::new(
            RagPipeline::with_backends(test_config(dir.path()), embedder, Arc::new(CannedBackend))
                .unwrap(),
        );

        assert!(p.warm_up().await.is_err());
        assert!(matches!(p.state(), PipelineState::Error(_)));

        p.retry_init().await.unwrap();
        assert_eq!(p.state(), PipelineState::Ready);
    }
}
