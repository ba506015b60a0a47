//! Embedding provider implementations

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use fnv::FnvHasher;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

/// Result of embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text
    pub embeddings: Vec<Vec<f32>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result.
    ///
    /// The dimension is inferred from the first embedding vector, or 0 when
    /// there are no embeddings.
    pub fn new(embeddings: Vec<Vec<f32>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    /// Returns the number of embedding vectors in this result.
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    /// Returns `true` if this result contains no embedding vectors.
    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Type alias for cached model entries (model, dimension)
type ModelCacheEntry = (Arc<Mutex<TextEmbedding>>, usize);

/// Global cache for initialized embedding models to avoid reloading
static MODEL_CACHE: OnceLock<Mutex<HashMap<String, ModelCacheEntry>>> = OnceLock::new();

/// Get the global model cache
fn get_model_cache() -> &'static Mutex<HashMap<String, ModelCacheEntry>> {
    MODEL_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Trait for embedding providers that can generate embeddings from text.
///
/// Providers start uninitialized. [`initialize`](EmbeddingProvider::initialize)
/// must be idempotent, and [`dispose`](EmbeddingProvider::dispose) releases
/// whatever `initialize` acquired.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Load the model or connect to the service backing this provider
    async fn initialize(&self) -> Result<()>;

    /// Whether the provider can embed text right now
    fn is_ready(&self) -> bool;

    /// Generate an embedding for a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch processing)
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;

    /// Release model resources. The provider may be initialized again afterwards.
    async fn dispose(&self) -> Result<()>;
}

/// FastEmbed-based embedding provider using local ONNX models
pub struct FastEmbedProvider {
    config: EmbedConfig,
    model: RwLock<Option<Arc<Mutex<TextEmbedding>>>>,
    dimension: AtomicUsize,
    init_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("config", &self.config)
            .field("model", &self.is_ready())
            .field("dimension", &self.embedding_dimension())
            .finish()
    }
}

/// Find a built-in fastembed model by model code or variant name.
fn resolve_model(name: &str) -> Option<(EmbeddingModel, usize)> {
    TextEmbedding::list_supported_models()
        .into_iter()
        .find(|info| {
            info.model_code.eq_ignore_ascii_case(name)
                || format!("{:?}", info.model).eq_ignore_ascii_case(name)
        })
        .map(|info| (info.model, info.dim))
}

impl FastEmbedProvider {
    /// Creates a new uninitialized provider.
    ///
    /// The reported dimension comes from fastembed's model registry until the
    /// model is loaded, and is 0 for unknown model names.
    pub fn new(config: EmbedConfig) -> Self {
        let dimension = resolve_model(config.model_name())
            .map(|(_, dim)| dim)
            .unwrap_or(0);
        Self {
            config,
            model: RwLock::new(None),
            dimension: AtomicUsize::new(dimension),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Creates and initializes a provider in one step.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        let provider = Self::new(config);
        provider.initialize().await?;
        Ok(provider)
    }

    pub fn config(&self) -> &EmbedConfig {
        &self.config
    }

    fn current_model(&self) -> Option<Arc<Mutex<TextEmbedding>>> {
        self.model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_model(&self, model: Option<Arc<Mutex<TextEmbedding>>>) {
        *self.model.write().unwrap_or_else(PoisonError::into_inner) = model;
    }

    /// Create a cache key based on the model configuration
    fn create_cache_key(&self) -> Result<String> {
        let config_json = serde_json::to_string(&self.config)
            .map_err(|e| EmbedError::External { source: e.into() })?;

        // Hash with FNV for deterministic, fast hashing
        let mut hasher = FnvHasher::default();
        hasher.write(b"v1:");
        hasher.write(config_json.as_bytes());

        Ok(format!("v1:{:x}", hasher.finish()))
    }

    /// Loads the model, reusing a cached instance when one exists.
    async fn load(&self) -> Result<()> {
        self.config.validate()?;
        let cache_key = self.create_cache_key()?;

        let cached = {
            let cache = get_model_cache()
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            cache
                .get(&cache_key)
                .map(|(model, dim)| (Arc::clone(model), *dim))
        };

        if let Some((model, dimension)) = cached {
            tracing::info!("Using cached model for: {}", self.config.model_name());
            self.set_model(Some(model));
            self.dimension.store(dimension, Ordering::SeqCst);
            return self.validate_model().await;
        }

        let (embedding_model, _) = resolve_model(self.config.model_name()).ok_or_else(|| {
            EmbedError::invalid_config(format!(
                "Unknown fastembed model '{}'",
                self.config.model_name()
            ))
        })?;

        let config = self.config.clone();
        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                tracing::info!("Loading embedding model: {}", config.model_name());

                let mut init_options = InitOptions::new(embedding_model)
                    .with_show_download_progress(config.show_download_progress);
                if let Some(cache_dir) = &config.cache_dir {
                    init_options = init_options.with_cache_dir(cache_dir.clone());
                }

                let mut model = TextEmbedding::try_new(init_options)
                    .map_err(|e| EmbedError::External { source: e })?;

                // Get dimension by generating a test embedding
                let probe = model
                    .embed(vec!["test".to_string()], None)
                    .map_err(|e| EmbedError::External { source: e })?;
                let dimension = probe.first().map(|emb| emb.len()).unwrap_or(0);

                tracing::info!("Model loaded successfully. Dimension: {}", dimension);
                Ok((model, dimension))
            })
            .await??;

        let model = Arc::new(Mutex::new(model));
        get_model_cache()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cache_key, (Arc::clone(&model), dimension));

        self.set_model(Some(model));
        self.dimension.store(dimension, Ordering::SeqCst);
        self.validate_model().await
    }

    /// Validate that the model is working correctly
    async fn validate_model(&self) -> Result<()> {
        let model = self
            .current_model()
            .ok_or_else(|| EmbedError::not_initialized(self.provider_name()))?;

        let validation = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut guard = model.lock().unwrap_or_else(PoisonError::into_inner);
            guard
                .embed(vec!["validation test".to_string()], None)
                .map_err(|e| EmbedError::External { source: e })
        })
        .await??;

        let embedding = validation.first().ok_or_else(|| {
            EmbedError::invalid_config("Model validation failed: no embeddings generated")
        })?;

        let expected = self.embedding_dimension();
        if embedding.is_empty() || embedding.len() != expected {
            return Err(EmbedError::invalid_config(format!(
                "Model validation failed: expected dimension {}, got {}",
                expected,
                embedding.len()
            )));
        }

        if embedding.iter().any(|value| !value.is_finite()) {
            return Err(EmbedError::invalid_config(
                "Model validation failed: non-finite values in embedding",
            ));
        }

        tracing::debug!("Model validation passed for: {}", self.config.model_name());
        Ok(())
    }

    /// Clears the global model cache.
    pub fn clear_cache() {
        get_model_cache()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        tracing::info!("Model cache cleared");
    }

    /// Returns the number of cached models.
    pub fn cache_size() -> usize {
        get_model_cache()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Scale a vector to unit length. Zero vectors are left unchanged.
pub fn normalize(embedding: &mut [f32]) {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in embedding.iter_mut() {
            *value /= norm;
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn initialize(&self) -> Result<()> {
        let _guard = self.init_lock.lock().await;
        if self.is_ready() {
            return Ok(());
        }

        tracing::info!(
            "Initializing FastEmbed provider for model: {}",
            self.config.model_name()
        );
        let result = self.load().await;
        if result.is_err() {
            self.set_model(None);
        }
        result
    }

    fn is_ready(&self) -> bool {
        self.current_model().is_some()
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let texts = vec![text.to_string()];
        let result = self.embed_texts(&texts).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::invalid_config("No embedding generated for text"))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        let model = self
            .current_model()
            .ok_or_else(|| EmbedError::not_initialized(self.provider_name()))?;

        tracing::debug!("Generating embeddings for {} texts", texts.len());

        let mut all_embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.config.batch_size.max(1)) {
            let batch = batch.to_vec();
            let model = Arc::clone(&model);

            let embeddings = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                tracing::debug!("Processing batch of {} texts", batch.len());

                let mut guard = model.lock().unwrap_or_else(PoisonError::into_inner);
                guard
                    .embed(batch, None)
                    .map_err(|e| EmbedError::External { source: e })
            })
            .await??;

            for mut embedding in embeddings {
                if self.config.normalize {
                    normalize(&mut embedding);
                }
                all_embeddings.push(embedding);
            }
        }

        if all_embeddings.len() != texts.len() {
            return Err(EmbedError::invalid_config(format!(
                "Expected {} embeddings, model returned {}",
                texts.len(),
                all_embeddings.len()
            )));
        }

        tracing::debug!("Generated {} embeddings", all_embeddings.len());
        Ok(EmbeddingResult::new(all_embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension.load(Ordering::SeqCst)
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }

    async fn dispose(&self) -> Result<()> {
        let _guard = self.init_lock.lock().await;
        if self.current_model().is_some() {
            tracing::info!("Releasing model: {}", self.config.model_name());
        }
        self.set_model(None);
        Ok(())
    }
}
