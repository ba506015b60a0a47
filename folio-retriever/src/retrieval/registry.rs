//! Lazily created, per-project indexers.
//!
//! The registry hands out one [`ProjectIndexer`] per project id. Creation is
//! single-flight: concurrent first requests for the same project share one
//! construction and initialization, and a failed initialization leaves the
//! slot empty so the next request retries.

use super::backend::{BackendKind, RetrievalBackend};
use super::chunking_strategy::ChunkingStrategy;
use super::document_reader::DocumentReader;
use super::keyword::KeywordBackend;
use super::project_indexer::{IndexerStats, ProjectIndexer, validate_project_id};
use super::semantic::VectorBackend;
use crate::config::{RetrieverConfig, VectorConfig};
use crate::error::{Result, RetrieverError};
use crate::vector_store::VectorStore;
use folio_context::Tokenizer;
use folio_embed::EmbeddingProvider;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, warn};

/// Builds a fresh backend for a project.
pub trait BackendFactory: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn create(&self, project_id: &str) -> Arc<dyn RetrievalBackend>;
}

pub struct KeywordBackendFactory {
    tokenizer: Arc<dyn Tokenizer>,
    reader: Arc<dyn DocumentReader>,
    min_token_length: usize,
    snippet_length: usize,
}

impl KeywordBackendFactory {
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        reader: Arc<dyn DocumentReader>,
        config: &RetrieverConfig,
    ) -> Self {
        Self {
            tokenizer,
            reader,
            min_token_length: config.keyword.min_token_length,
            snippet_length: config.keyword.snippet_length,
        }
    }
}

impl BackendFactory for KeywordBackendFactory {
    fn kind(&self) -> BackendKind {
        BackendKind::Keyword
    }

    fn create(&self, _project_id: &str) -> Arc<dyn RetrievalBackend> {
        Arc::new(
            KeywordBackend::new(self.tokenizer.clone(), self.reader.clone())
                .with_min_token_length(self.min_token_length)
                .with_snippet_length(self.snippet_length),
        )
    }
}

/// Vector backends sharing one store and one embedding provider.
pub struct VectorBackendFactory {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: VectorConfig,
}

impl VectorBackendFactory {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &VectorConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config: config.clone(),
        }
    }
}

impl BackendFactory for VectorBackendFactory {
    fn kind(&self) -> BackendKind {
        BackendKind::Vector
    }

    fn create(&self, _project_id: &str) -> Arc<dyn RetrievalBackend> {
        Arc::new(VectorBackend::new(
            self.store.clone(),
            self.embedder.clone(),
            &self.config,
        ))
    }
}

type Slot = Arc<OnceCell<Arc<ProjectIndexer>>>;

/// Outcome of [`IndexerRegistry::cleanup`].
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub cleaned: usize,
    pub failed: Vec<String>,
}

pub struct IndexerRegistry {
    projects_root: PathBuf,
    strategy: ChunkingStrategy,
    factory: Arc<dyn BackendFactory>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl IndexerRegistry {
    pub fn new(config: &RetrieverConfig, factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            projects_root: config.projects_root.clone(),
            strategy: ChunkingStrategy::new(&config.chunking, config.layout.clone()),
            factory,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.factory.kind()
    }

    /// The indexer for `project_id`, created and initialized on first use.
    pub async fn get_or_create(&self, project_id: &str) -> Result<Arc<ProjectIndexer>> {
        validate_project_id(project_id)?;
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.entry(project_id.to_string()).or_default().clone()
        };

        let indexer = slot
            .get_or_try_init(|| async {
                let backend = self.factory.create(project_id);
                let indexer = ProjectIndexer::new(
                    project_id,
                    &self.projects_root,
                    self.strategy.clone(),
                    backend,
                )?;
                indexer.initialize().await?;
                info!("Created {} indexer for project {}", self.kind(), project_id);
                Ok::<_, RetrieverError>(Arc::new(indexer))
            })
            .await?;
        Ok(indexer.clone())
    }

    /// The indexer for `project_id` if one has been created.
    pub async fn get(&self, project_id: &str) -> Option<Arc<ProjectIndexer>> {
        let slots = self.slots.lock().await;
        slots.get(project_id).and_then(|slot| slot.get().cloned())
    }

    /// Ids of projects with a live indexer, sorted.
    pub async fn project_ids(&self) -> Vec<String> {
        let slots = self.slots.lock().await;
        let mut ids: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Clean up and forget the indexer for `project_id`. Returns whether one existed.
    pub async fn remove_indexer(&self, project_id: &str) -> Result<bool> {
        let slot = self.slots.lock().await.remove(project_id);
        let Some(indexer) = slot.and_then(|slot| slot.get().cloned()) else {
            return Ok(false);
        };
        indexer.cleanup().await?;
        info!("Removed {} indexer for project {}", self.kind(), project_id);
        Ok(true)
    }

    /// Clean up every indexer. One failure does not stop the others.
    pub async fn cleanup(&self) -> CleanupReport {
        let drained: Vec<(String, Slot)> = self.slots.lock().await.drain().collect();
        let indexers: Vec<(String, Arc<ProjectIndexer>)> = drained
            .into_iter()
            .filter_map(|(id, slot)| slot.get().cloned().map(|indexer| (id, indexer)))
            .collect();

        let outcomes = futures::future::join_all(indexers.iter().map(|(id, indexer)| async move {
            (id.clone(), indexer.cleanup().await)
        }))
        .await;

        let mut report = CleanupReport::default();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => report.cleaned += 1,
                Err(e) => {
                    warn!("Failed to clean up indexer for {}: {}", id, e);
                    report.failed.push(id);
                }
            }
        }
        report
    }

    /// Stats of every live indexer, sorted by project id.
    pub async fn stats(&self) -> Vec<(String, IndexerStats)> {
        let indexers: Vec<Arc<ProjectIndexer>> = {
            let slots = self.slots.lock().await;
            slots.values().filter_map(|slot| slot.get().cloned()).collect()
        };
        let mut stats = Vec::with_capacity(indexers.len());
        for indexer in indexers {
            stats.push((indexer.project_id().to_string(), indexer.stats().await));
        }
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }
}
