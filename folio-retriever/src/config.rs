//! Retriever configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working keyword-only setup rooted at `./projects`.
//!
//! ```toml
//! projects_root = "/srv/folio/projects"
//!
//! [chunking]
//! max_tokens = 400
//! overlap_ratio = 0.1
//!
//! [vector]
//! url = "http://localhost:6333"
//! auto_provision = true
//!
//! [embedding]
//! provider = "fastembed"
//! ```

use crate::error::{Result, RetrieverError};
use folio_context::{ChunkingEngine, FileCategory};
use folio_embed::EmbedConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    /// Directory holding one subdirectory per project.
    pub projects_root: PathBuf,
    pub chunking: ChunkingConfig,
    pub layout: LayoutConfig,
    pub keyword: KeywordConfig,
    pub vector: VectorConfig,
    pub embedding: EmbeddingConfig,
    pub watcher: WatcherConfig,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            projects_root: PathBuf::from("projects"),
            chunking: ChunkingConfig::default(),
            layout: LayoutConfig::default(),
            keyword: KeywordConfig::default(),
            vector: VectorConfig::default(),
            embedding: EmbeddingConfig::default(),
            watcher: WatcherConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    pub overlap_ratio: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 400,
            overlap_ratio: 0.1,
        }
    }
}

impl ChunkingConfig {
    pub fn engine(&self) -> ChunkingEngine {
        ChunkingEngine::new(self.max_tokens, self.overlap_ratio)
    }
}

/// Where documents live inside a project, and which files count as documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Directories (relative to the project) holding content documents.
    pub content_dirs: Vec<String>,
    /// Directories (relative to the project) holding settings documents.
    pub settings_dirs: Vec<String>,
    /// File extensions to index, without the leading dot.
    pub extensions: Vec<String>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            content_dirs: vec!["manuscript".to_string(), "notes".to_string()],
            settings_dirs: vec!["settings".to_string()],
            extensions: vec!["md".to_string(), "txt".to_string()],
        }
    }
}

impl LayoutConfig {
    /// Every configured directory with the category of the files inside it.
    pub fn directories(&self) -> impl Iterator<Item = (&str, FileCategory)> {
        self.content_dirs
            .iter()
            .map(|d| (d.as_str(), FileCategory::Content))
            .chain(
                self.settings_dirs
                    .iter()
                    .map(|d| (d.as_str(), FileCategory::Settings)),
            )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordConfig {
    /// Tokens shorter than this many characters are not indexed.
    pub min_token_length: usize,
    /// Characters of document text shown around a keyword hit.
    pub snippet_length: usize,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self {
            min_token_length: 2,
            snippet_length: 200,
        }
    }
}

/// Vector store connection and auto-provisioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// Explicit connection target. `memory://<name>` selects the in-process store.
    pub url: Option<String>,
    pub auto_provision: bool,
    pub collection: String,
    /// Host port the provisioned instance listens on.
    pub port: u16,
    pub image: String,
    pub container_name: String,
    /// Host directory mounted as the instance's storage.
    pub data_dir: Option<PathBuf>,
    pub health_timeout_secs: u64,
    pub health_poll_interval_ms: u64,
    pub score_threshold: f32,
    /// Snippet length in characters.
    pub snippet_length: usize,
    /// Number of chunks embedded per request.
    pub batch_size: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            url: None,
            auto_provision: false,
            collection: "folio_chunks".to_string(),
            port: 6333,
            image: "qdrant/qdrant:latest".to_string(),
            container_name: "folio-qdrant".to_string(),
            data_dir: None,
            health_timeout_secs: 60,
            health_poll_interval_ms: 500,
            score_threshold: 0.0,
            snippet_length: 200,
            batch_size: 32,
        }
    }
}

impl VectorConfig {
    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_millis(self.health_poll_interval_ms)
    }

    /// URL of the auto-provisioned instance.
    pub fn provisioned_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    #[default]
    Fastembed,
    Hashing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    /// FastEmbed settings, used when `provider = "fastembed"`.
    pub fastembed: EmbedConfig,
    /// Vector size, used when `provider = "hashing"`.
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            fastembed: EmbedConfig::default(),
            dimension: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub debounce_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self { debounce_ms: 500 }
    }
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl RetrieverConfig {
    /// Create a default configuration rooted at `projects_root`.
    pub fn new(projects_root: impl Into<PathBuf>) -> Self {
        Self {
            projects_root: projects_root.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| RetrieverError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| RetrieverError::io(path, e))?;
        Self::from_toml_str(&text)
    }

    /// Set the chunk token budget (builder style)
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.chunking.max_tokens = max_tokens;
        self
    }

    /// Set the chunk overlap ratio (builder style)
    pub fn with_overlap_ratio(mut self, overlap_ratio: f64) -> Self {
        self.chunking.overlap_ratio = overlap_ratio;
        self
    }

    /// Set the explicit vector store URL (builder style)
    pub fn with_vector_url(mut self, url: impl Into<String>) -> Self {
        self.vector.url = Some(url.into());
        self
    }

    /// Enable or disable auto-provisioning (builder style)
    pub fn with_auto_provision(mut self, enabled: bool) -> Self {
        self.vector.auto_provision = enabled;
        self
    }

    /// Use the offline hashing embedding provider (builder style)
    pub fn with_hashing_embeddings(mut self, dimension: usize) -> Self {
        self.embedding.provider = EmbeddingProviderKind::Hashing;
        self.embedding.dimension = dimension;
        self
    }

    /// Set the watcher debounce window (builder style)
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.watcher.debounce_ms = debounce.as_millis() as u64;
        self
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_tokens == 0 {
            return Err(RetrieverError::Config(
                "chunking.max_tokens must be greater than zero".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.chunking.overlap_ratio) {
            return Err(RetrieverError::Config(format!(
                "chunking.overlap_ratio must be in [0, 1), got {}",
                self.chunking.overlap_ratio
            )));
        }
        if self.layout.content_dirs.is_empty() && self.layout.settings_dirs.is_empty() {
            return Err(RetrieverError::Config(
                "layout must name at least one content or settings directory".to_string(),
            ));
        }
        if self.layout.extensions.is_empty() {
            return Err(RetrieverError::Config(
                "layout.extensions must not be empty".to_string(),
            ));
        }
        if self.vector.collection.trim().is_empty() {
            return Err(RetrieverError::Config(
                "vector.collection must not be empty".to_string(),
            ));
        }
        if self.vector.batch_size == 0 {
            return Err(RetrieverError::Config(
                "vector.batch_size must be greater than zero".to_string(),
            ));
        }
        if self.embedding.provider == EmbeddingProviderKind::Hashing && self.embedding.dimension == 0
        {
            return Err(RetrieverError::Config(
                "embedding.dimension must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = RetrieverConfig::from_toml_str("").unwrap();
        assert_eq!(config, RetrieverConfig::default());
        assert_eq!(config.watcher.debounce(), Duration::from_millis(500));
        assert_eq!(config.vector.port, 6333);
        assert!(config.vector.url.is_none());
    }

    #[test]
    fn test_partial_toml() {
        let config = RetrieverConfig::from_toml_str(
            r#"
projects_root = "/data/projects"

[chunking]
max_tokens = 120

[keyword]
snippet_length = 80

[vector]
url = "memory://test"
score_threshold = 0.25

[embedding]
provider = "hashing"
dimension = 64

[embedding.fastembed]
batch_size = 8
"#,
        )
        .unwrap();

        assert_eq!(config.projects_root, PathBuf::from("/data/projects"));
        assert_eq!(config.chunking.max_tokens, 120);
        assert_eq!(config.chunking.overlap_ratio, 0.1);
        assert_eq!(config.keyword.snippet_length, 80);
        assert_eq!(config.keyword.min_token_length, 2);
        assert_eq!(config.vector.snippet_length, 200);
        assert_eq!(config.vector.url.as_deref(), Some("memory://test"));
        assert_eq!(config.vector.score_threshold, 0.25);
        assert_eq!(config.embedding.provider, EmbeddingProviderKind::Hashing);
        assert_eq!(config.embedding.fastembed.batch_size, 8);
        assert_eq!(config.layout.content_dirs, vec!["manuscript", "notes"]);
    }

    #[test]
    fn test_validation_errors() {
        let err = RetrieverConfig::from_toml_str("[chunking]\nmax_tokens = 0\n").unwrap_err();
        assert!(matches!(err, RetrieverError::Config(_)));

        let bad_ratio = RetrieverConfig::default().with_overlap_ratio(1.5);
        assert!(bad_ratio.validate().is_err());

        let err = RetrieverConfig::from_toml_str("projects_root = 5").unwrap_err();
        assert!(matches!(err, RetrieverError::Config(_)));
    }

    #[test]
    fn test_layout_directories() {
        let layout = LayoutConfig::default();
        let dirs: Vec<_> = layout.directories().collect();
        assert_eq!(
            dirs,
            vec![
                ("manuscript", FileCategory::Content),
                ("notes", FileCategory::Content),
                ("settings", FileCategory::Settings),
            ]
        );
    }

    #[test]
    fn test_builders() {
        let config = RetrieverConfig::new("/tmp/p")
            .with_max_tokens(50)
            .with_vector_url("memory://x")
            .with_auto_provision(true)
            .with_hashing_embeddings(32)
            .with_debounce(Duration::from_millis(20));
        assert_eq!(config.chunking.engine().max_tokens(), 50);
        assert!(config.vector.auto_provision);
        assert_eq!(config.embedding.dimension, 32);
        assert_eq!(config.watcher.debounce_ms, 20);
        assert!(config.validate().is_ok());
    }
}
