//! Retrieval service: one keyword registry, an optional semantic registry
//! and the vector store bootstrap behind a single entry point.

use crate::bootstrap::{BootstrapOutcome, DockerRuntime, ProvisioningRuntime, VectorStoreBootstrap};
use crate::config::{EmbeddingProviderKind, RetrieverConfig};
use crate::error::{Result, RetrieverError};
use crate::retrieval::backend::{BackendKind, RetrievalResult};
use crate::retrieval::directory_watcher::{ChangeKind, FileChangeEvent};
use crate::retrieval::document_reader::{DocumentReader, FsDocumentReader};
use crate::retrieval::project_indexer::{FileProcessingResult, IndexSummary, IndexerStats};
use crate::retrieval::registry::{IndexerRegistry, KeywordBackendFactory, VectorBackendFactory};
use crate::vector_store::{DefaultConnector, StoreConnector};
use folio_context::{FileCategory, Tokenizer, WordTokenizer};
use folio_embed::{EmbeddingProvider, FastEmbedProvider, HashingProvider};
use futures::StreamExt;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

/// Collaborators the service is built from.
pub struct RetrievalDeps {
    pub tokenizer: Arc<dyn Tokenizer>,
    pub reader: Arc<dyn DocumentReader>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub connector: Arc<dyn StoreConnector>,
    pub runtime: Arc<dyn ProvisioningRuntime>,
}

impl RetrievalDeps {
    /// Production collaborators for `config`.
    pub fn from_config(config: &RetrieverConfig) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> = match config.embedding.provider {
            EmbeddingProviderKind::Fastembed => {
                Arc::new(FastEmbedProvider::new(config.embedding.fastembed.clone()))
            }
            EmbeddingProviderKind::Hashing => Arc::new(
                HashingProvider::new(config.embedding.dimension)
                    .map_err(|e| RetrieverError::Config(e.to_string()))?,
            ),
        };

        Ok(Self {
            tokenizer: Arc::new(WordTokenizer::new()),
            reader: Arc::new(FsDocumentReader::new(config.projects_root.clone())),
            embedder,
            connector: Arc::new(DefaultConnector::new()),
            runtime: Arc::new(DockerRuntime::new()),
        })
    }
}

/// Per-backend stats of one project.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectStats {
    pub project_id: String,
    pub backend: BackendKind,
    pub stats: IndexerStats,
}

pub struct RetrievalService {
    config: RetrieverConfig,
    keyword: IndexerRegistry,
    semantic: Option<IndexerRegistry>,
    bootstrap: VectorStoreBootstrap,
    outcome: BootstrapOutcome,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl RetrievalService {
    /// Validate the configuration, run the vector store bootstrap once and
    /// build the registries. A degraded vector store is not an error.
    pub async fn start(config: RetrieverConfig, deps: RetrievalDeps) -> Result<Self> {
        config.validate()?;

        let bootstrap = VectorStoreBootstrap::new(
            config.vector.clone(),
            deps.connector.clone(),
            deps.runtime.clone(),
        );
        let outcome = bootstrap.initialize().await;

        let keyword = IndexerRegistry::new(
            &config,
            Arc::new(KeywordBackendFactory::new(
                deps.tokenizer.clone(),
                deps.reader.clone(),
                &config,
            )),
        );

        let semantic = match bootstrap.store() {
            Some(store) => Some(IndexerRegistry::new(
                &config,
                Arc::new(VectorBackendFactory::new(
                    store,
                    deps.embedder.clone(),
                    &config.vector,
                )),
            )),
            None => {
                warn!("Running keyword-only: {}", outcome.unavailable_reason());
                None
            }
        };

        info!("Retrieval service started (vector store: {})", outcome.mode);

        Ok(Self {
            config,
            keyword,
            semantic,
            bootstrap,
            outcome,
            embedder: deps.embedder,
        })
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    pub fn semantic_status(&self) -> &BootstrapOutcome {
        &self.outcome
    }

    pub fn semantic_available(&self) -> bool {
        self.semantic.is_some()
    }

    fn registries(&self) -> impl Iterator<Item = &IndexerRegistry> {
        std::iter::once(&self.keyword).chain(self.semantic.as_ref())
    }

    pub async fn keyword_search(
        &self,
        project_id: &str,
        query: &str,
        limit: usize,
        category: Option<FileCategory>,
    ) -> Result<Vec<RetrievalResult>> {
        let indexer = self.keyword.get_or_create(project_id).await?;
        indexer.search(query, limit, category).await
    }

    /// Fails with [`RetrieverError::SemanticSearchUnavailable`] when the
    /// vector store could not be acquired.
    pub async fn semantic_search(
        &self,
        project_id: &str,
        query: &str,
        limit: usize,
        category: Option<FileCategory>,
    ) -> Result<Vec<RetrievalResult>> {
        let Some(semantic) = &self.semantic else {
            return Err(RetrieverError::SemanticSearchUnavailable {
                reason: self.outcome.unavailable_reason(),
            });
        };
        let indexer = semantic.get_or_create(project_id).await?;
        indexer.search(query, limit, category).await
    }

    /// Index every document of a project into every live backend.
    pub async fn index_project(&self, project_id: &str) -> Result<Vec<(BackendKind, IndexSummary)>> {
        let mut summaries = Vec::new();
        let mut first_error = None;
        for registry in self.registries() {
            let outcome = match registry.get_or_create(project_id).await {
                Ok(indexer) => indexer.index_all().await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(summary) => summaries.push((registry.kind(), summary)),
                Err(e) => {
                    error!("Indexing {} ({}) failed: {}", project_id, registry.kind(), e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(summaries),
        }
    }

    /// Re-index one document in every live backend.
    pub async fn process_file(
        &self,
        project_id: &str,
        path: &Path,
    ) -> Result<Vec<(BackendKind, FileProcessingResult)>> {
        let mut results = Vec::new();
        let mut first_error = None;
        for registry in self.registries() {
            let outcome = match registry.get_or_create(project_id).await {
                Ok(indexer) => indexer.process_file(path, None).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(result) => results.push((registry.kind(), result)),
                Err(e) => {
                    warn!(
                        "Processing {}/{} ({}) failed: {}",
                        project_id,
                        path.display(),
                        registry.kind(),
                        e
                    );
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }

    /// Drop one document from every live backend.
    pub async fn remove_file(&self, project_id: &str, path: &Path) -> Result<()> {
        let mut first_error = None;
        for registry in self.registries() {
            let outcome = match registry.get_or_create(project_id).await {
                Ok(indexer) => indexer.remove_file(path).await,
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                warn!(
                    "Removing {}/{} ({}) failed: {}",
                    project_id,
                    path.display(),
                    registry.kind(),
                    e
                );
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Delete everything indexed for a project and forget its indexers.
    pub async fn purge_project(&self, project_id: &str) -> Result<()> {
        let mut first_error = None;
        for registry in self.registries() {
            let outcome = match registry.get_or_create(project_id).await {
                Ok(indexer) => indexer.purge().await,
                Err(e) => Err(e),
            };
            let outcome = match outcome {
                Ok(()) => registry.remove_indexer(project_id).await.map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                warn!("Purging {} ({}) failed: {}", project_id, registry.kind(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Route a watcher event to the matching update.
    pub async fn apply_change(&self, event: &FileChangeEvent) -> Result<()> {
        debug!("Applying {} {}/{}", event.kind, event.project_id, event.path);
        let path = Path::new(&event.path);
        match event.kind {
            ChangeKind::Add | ChangeKind::Change => {
                self.process_file(&event.project_id, path).await.map(|_| ())
            }
            ChangeKind::Unlink => self.remove_file(&event.project_id, path).await,
        }
    }

    /// Apply watcher events in arrival order until the channel closes.
    pub async fn run_change_consumer(self: Arc<Self>, rx: mpsc::Receiver<FileChangeEvent>) {
        ReceiverStream::new(rx)
            .for_each(|event| {
                let service = self.clone();
                async move {
                    if let Err(e) = service.apply_change(&event).await {
                        error!(
                            "Failed to apply {} for {}/{}: {}",
                            event.kind, event.project_id, event.path, e
                        );
                    }
                }
            })
            .await;
        debug!("Change consumer stopped");
    }

    /// Stats of every live indexer, keyword first.
    pub async fn stats(&self) -> Vec<ProjectStats> {
        let mut all = Vec::new();
        for registry in self.registries() {
            all.extend(
                registry
                    .stats()
                    .await
                    .into_iter()
                    .map(|(project_id, stats)| ProjectStats {
                        project_id,
                        backend: registry.kind(),
                        stats,
                    }),
            );
        }
        all
    }

    /// Best-effort release of every indexer, the embedding provider and the
    /// vector store connection. Safe to call more than once.
    pub async fn shutdown(&self) {
        for registry in self.registries() {
            let report = registry.cleanup().await;
            if !report.failed.is_empty() {
                warn!(
                    "{} cleanup failed for projects: {}",
                    registry.kind(),
                    report.failed.join(", ")
                );
            }
        }
        if let Err(e) = self.embedder.dispose().await {
            warn!("Failed to dispose embedding provider: {}", e);
        }
        if let Some(store) = self.bootstrap.store() {
            if store.is_connected() {
                if let Err(e) = store.disconnect().await {
                    warn!("Failed to disconnect from {}: {}", store.url(), e);
                }
            }
        }
        info!("Retrieval service stopped");
    }
}
