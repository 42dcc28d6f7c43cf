//! Embedding with a lazily-loaded local ONNX model.
//!
//! The model is not loaded at construction time; the first embed call
//! triggers a one-time load behind `tokio::sync::OnceCell`, so concurrent
//! first callers share a single load instead of racing redundant ones.

use std::path::Path;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tokenizers::{PaddingParams, PaddingStrategy, TruncationParams, TruncationStrategy};
use tokio::sync::OnceCell;

use crate::error::{EmbeddingError, ModelError};
use crate::models::EmbeddingConfig;
use crate::utils::text::normalize_arabic;

/// A loaded embedding model. Implementations must produce vectors of a
/// single fixed dimension for their whole lifetime.
pub trait EmbeddingBackend: Send + Sync {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError>;
    fn dimension(&self) -> usize;
}

/// Deferred backend construction, invoked at most once per embedder.
pub type BackendLoader =
    Box<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn EmbeddingBackend>, ModelError>> + Send + Sync>;

/// Maps text to fixed-dimension vectors, loading its backend on first use.
pub struct Embedder {
    model_id: String,
    batch_size: usize,
    loader: BackendLoader,
    backend: OnceCell<Arc<dyn EmbeddingBackend>>,
}

impl Embedder {
    pub fn new(model_id: impl Into<String>, batch_size: usize, loader: BackendLoader) -> Self {
        Self {
            model_id: model_id.into(),
            batch_size: batch_size.max(1),
            loader,
            backend: OnceCell::new(),
        }
    }

    /// Embedder backed by ONNX Runtime, per the embedding config.
    pub fn with_onnx(config: &EmbeddingConfig) -> Self {
        let load_config = config.clone();
        let loader: BackendLoader = Box::new(move || {
            let config = load_config.clone();
            Box::pin(async move {
                let backend = tokio::task::spawn_blocking(move || OnnxBackend::load(&config))
                    .await
                    .map_err(|e| ModelError::LoadError(e.to_string()))??;
                Ok(Arc::new(backend) as Arc<dyn EmbeddingBackend>)
            })
        });
        Self::new(&config.model_id, config.batch_size as usize, loader)
    }

    /// Identity of the model this embedder produces vectors with. Recorded
    /// in the index manifest so indexes built by a different model are
    /// rejected instead of silently compared.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Force the one-time model load. Concurrent callers block on the same
    /// load; failure here is fatal to pipeline readiness.
    pub async fn ensure_loaded(&self) -> Result<(), ModelError> {
        self.backend().await?;
        Ok(())
    }

    pub async fn dimension(&self) -> Result<usize, ModelError> {
        Ok(self.backend().await?.dimension())
    }

    async fn backend(&self) -> Result<&Arc<dyn EmbeddingBackend>, ModelError> {
        self.backend.get_or_try_init(|| (self.loader)()).await
    }

    /// Embed a single query or chunk.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let normalized = normalize_arabic(text);
        if normalized.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let backend = self
            .backend()
            .await
            .map_err(|e| EmbeddingError::ModelUnavailable(e.to_string()))?
            .clone();

        let vectors = run_inference(backend, vec![normalized]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Failed("backend returned no vector".to_string()))
    }

    /// Embed a batch, preserving input order. A failure on one input is
    /// reported in its slot and never aborts the rest of the batch; only a
    /// model-load failure is batch-fatal.
    pub async fn embed_many(
        &self,
        texts: &[String],
    ) -> Result<Vec<Result<Vec<f32>, EmbeddingError>>, ModelError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let backend = self.backend().await?.clone();
        let mut results: Vec<Option<Result<Vec<f32>, EmbeddingError>>> =
            (0..texts.len()).map(|_| None).collect();

        for batch_start in (0..texts.len()).step_by(self.batch_size) {
            let batch_end = (batch_start + self.batch_size).min(texts.len());

            let mut positions = Vec::new();
            let mut inputs = Vec::new();
            for (offset, text) in texts[batch_start..batch_end].iter().enumerate() {
                let normalized = normalize_arabic(text);
                if normalized.is_empty() {
                    results[batch_start + offset] = Some(Err(EmbeddingError::EmptyInput));
                } else {
                    positions.push(batch_start + offset);
                    inputs.push(normalized);
                }
            }

            if inputs.is_empty() {
                continue;
            }

            match run_inference(backend.clone(), inputs).await {
                Ok(vectors) => {
                    for (pos, vector) in positions.into_iter().zip(vectors) {
                        results[pos] = Some(Ok(vector));
                    }
                }
                Err(e) => {
                    // Inference failure is local to this batch's items
                    let msg = e.to_string();
                    for pos in positions {
                        results[pos] = Some(Err(EmbeddingError::Failed(msg.clone())));
                    }
                }
            }
        }

        Ok(results
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(EmbeddingError::Failed("input was not processed".to_string()))
                })
            })
            .collect())
    }
}

/// Inference is CPU-bound; run it off the async worker threads.
async fn run_inference(
    backend: Arc<dyn EmbeddingBackend>,
    texts: Vec<String>,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    tokio::task::spawn_blocking(move || backend.embed(&texts))
        .await
        .map_err(|e| EmbeddingError::Failed(e.to_string()))?
        .map_err(|e| EmbeddingError::Failed(e.to_string()))
}

/// ONNX Runtime embedding backend.
pub struct OnnxBackend {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    dimension: usize,
}

impl OnnxBackend {
    pub fn load(config: &EmbeddingConfig) -> Result<Self, ModelError> {
        let model_dir = config.resolved_model_dir().ok_or_else(|| {
            ModelError::NotFound("could not determine model directory".to_string())
        })?;
        Self::load_from_dir(config, &model_dir)
    }

    pub fn load_from_dir(config: &EmbeddingConfig, model_dir: &Path) -> Result<Self, ModelError> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");
        let max_tokens = config.max_tokens as usize;

        if !model_path.exists() {
            return Err(ModelError::NotFound(format!(
                "model not found: {}",
                model_path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e: ort::Error| ModelError::LoadError(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e: ort::Error| ModelError::LoadError(e.to_string()))?
            .with_intra_threads(num_cpus())
            .map_err(|e: ort::Error| ModelError::LoadError(e.to_string()))?
            .commit_from_file(&model_path)
            .map_err(|e: ort::Error| ModelError::LoadError(e.to_string()))?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| ModelError::TokenizerError(e.to_string()))?;

        // Truncate long chunks rather than OOM on them
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_tokens,
                strategy: TruncationStrategy::LongestFirst,
                ..Default::default()
            }))
            .map_err(|e| ModelError::TokenizerError(e.to_string()))?;

        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            dimension: config.dimension as usize,
        })
    }
}

impl EmbeddingBackend for OnnxBackend {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| ModelError::TokenizerError(e.to_string()))?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0);
        let batch_size = encodings.len();

        let mut input_ids = vec![0i64; batch_size * max_len];
        let mut attention_mask = vec![0i64; batch_size * max_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            for (j, (&id, &m)) in ids.iter().zip(mask.iter()).enumerate() {
                input_ids[i * max_len + j] = id as i64;
                attention_mask[i * max_len + j] = m as i64;
            }
        }

        let input_ids_tensor = Tensor::from_array(([batch_size, max_len], input_ids))
            .map_err(|e: ort::Error| ModelError::InferenceError(e.to_string()))?;
        let attention_mask_tensor =
            Tensor::from_array(([batch_size, max_len], attention_mask.clone()))
                .map_err(|e: ort::Error| ModelError::InferenceError(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ModelError::InferenceError("session lock poisoned".to_string()))?;

        let outputs = session
            .run(ort::inputs![input_ids_tensor, attention_mask_tensor])
            .map_err(|e: ort::Error| ModelError::InferenceError(e.to_string()))?;

        let output_array = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e: ort::Error| ModelError::InferenceError(e.to_string()))?;

        let shape = output_array.shape();

        let embeddings: Vec<Vec<f32>> = if shape.len() == 3 {
            // Token-level output: mean-pool over attended positions
            (0..batch_size)
                .map(|i| {
                    let mask = &attention_mask[i * max_len..(i + 1) * max_len];
                    let attended = mask.iter().filter(|&&m| m == 1).count().max(1) as f32;
                    let embedding: Vec<f32> = (0..self.dimension)
                        .map(|d| {
                            let sum: f32 = (0..max_len)
                                .filter(|&j| mask[j] == 1)
                                .map(|j| output_array[[i, j, d]])
                                .sum();
                            sum / attended
                        })
                        .collect();
                    normalize(&embedding)
                })
                .collect()
        } else if shape.len() == 2 {
            (0..batch_size)
                .map(|i| {
                    let embedding: Vec<f32> =
                        (0..self.dimension).map(|d| output_array[[i, d]]).collect();
                    normalize(&embedding)
                })
                .collect()
        } else {
            return Err(ModelError::InferenceError(format!(
                "unexpected output shape: {:?}",
                shape
            )));
        };

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// L2-normalize so the index's cosine metric reduces to a dot product.
fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic fake backend: hashes each text into a small vector and
    /// counts how many times it was loaded.
    pub struct FakeBackend;

    impl EmbeddingBackend for FakeBackend {
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
            Ok(texts.iter().map(|t| fake_vector(t)).collect())
        }

        fn dimension(&self) -> usize {
            4
        }
    }

    fn fake_vector(text: &str) -> Vec<f32> {
        let mut v = [0f32; 4];
        for (i, b) in text.bytes().enumerate() {
            v[i % 4] += b as f32;
        }
        normalize(&v)
    }

    fn counting_embedder(loads: Arc<AtomicUsize>) -> Embedder {
        let loader: BackendLoader = Box::new(move || {
            let loads = loads.clone();
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(FakeBackend) as Arc<dyn EmbeddingBackend>)
            })
        });
        Embedder::new("fake-model", 2, loader)
    }

    #[tokio::test]
    async fn test_lazy_load_happens_once_under_concurrency() {
        let loads = Arc::new(AtomicUsize::new(0));
        let embedder = Arc::new(counting_embedder(loads.clone()));
        assert_eq!(loads.load(Ordering::SeqCst), 0);

        let mut handles = Vec::new();
        for i in 0..8 {
            let embedder = embedder.clone();
            handles.push(tokio::spawn(async move {
                embedder.embed_one(&format!("نص رقم {}", i)).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_embed_many_preserves_order() {
        let embedder = counting_embedder(Arc::new(AtomicUsize::new(0)));
        let texts: Vec<String> = (0..5).map(|i| format!("جملة {}", i)).collect();

        let results = embedder.embed_many(&texts).await.unwrap();
        assert_eq!(results.len(), 5);
        for (text, result) in texts.iter().zip(&results) {
            let vector = result.as_ref().unwrap();
            assert_eq!(vector, &fake_vector(&normalize_arabic(text)));
        }
    }

    #[tokio::test]
    async fn test_empty_input_fails_locally_not_batchwide() {
        let embedder = counting_embedder(Arc::new(AtomicUsize::new(0)));
        let texts = vec![
            "الفاعل".to_string(),
            "   ".to_string(),
            "المفعول به".to_string(),
        ];

        let results = embedder.embed_many(&texts).await.unwrap();
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(EmbeddingError::EmptyInput)));
        assert!(results[2].is_ok());
    }

    #[tokio::test]
    async fn test_embed_one_rejects_empty_query() {
        let embedder = counting_embedder(Arc::new(AtomicUsize::new(0)));
        assert!(matches!(
            embedder.embed_one("  \n ").await,
            Err(EmbeddingError::EmptyInput)
        ));
    }

    #[tokio::test]
    async fn test_load_failure_is_fatal() {
        let loader: BackendLoader = Box::new(|| {
            Box::pin(async { Err(ModelError::NotFound("missing weights".to_string())) })
        });
        let embedder = Embedder::new("broken", 4, loader);
        assert!(embedder.ensure_loaded().await.is_err());
        assert!(matches!(
            embedder.embed_one("سؤال").await,
            Err(EmbeddingError::ModelUnavailable(_))
        ));
    }
}
