//! Per-project indexing pipeline.
//!
//! A [`ProjectIndexer`] owns one backend for one project. It discovers the
//! project's documents, chunks them with its [`ChunkingStrategy`] and keeps
//! the backend in step with the files on disk.
//!
//! Writes to a file's chunks (remove the old ones, add the new ones) happen
//! under an exclusive lock, and searches take the shared side of the same
//! lock, so a search never observes a file half re-indexed. Reading and
//! chunking happen before the lock is taken.

use super::backend::{RetrievalBackend, RetrievalResult, SearchRequest};
use super::chunking_strategy::ChunkingStrategy;
use crate::error::{Result, RetrieverError};
use chrono::{DateTime, Utc};
use folio_context::FileCategory;
use ignore::WalkBuilder;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Result of processing a single file
#[derive(Debug, Clone, PartialEq)]
pub struct FileProcessingResult {
    pub path: String,
    pub chunks_indexed: usize,
    pub processing_time: Duration,
}

/// Outcome of a full project index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    pub files_indexed: usize,
    pub files_failed: usize,
    pub chunks_indexed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexerStats {
    pub files_processed: usize,
    pub files_removed: usize,
    pub chunks_indexed: usize,
    pub errors: usize,
    pub last_indexed_at: Option<DateTime<Utc>>,
}

/// Checks that `project_id` names a single visible directory.
pub fn validate_project_id(project_id: &str) -> Result<()> {
    let valid = !project_id.trim().is_empty()
        && !project_id.starts_with('.')
        && !project_id.contains(['/', '\\'])
        && project_id.trim() == project_id;
    if valid {
        Ok(())
    } else {
        Err(RetrieverError::invalid_input(format!(
            "Invalid project id '{project_id}'"
        )))
    }
}

/// Whether the directory walk of a full index would visit `full_path`, given
/// the ignore files around it. Missing files are left for the read to report.
async fn walk_includes(full_path: &Path) -> bool {
    let Some(parent) = full_path.parent().map(Path::to_path_buf) else {
        return false;
    };
    if !full_path.is_file() {
        return true;
    }
    let target = full_path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        WalkBuilder::new(&parent)
            .hidden(true)
            .max_depth(Some(1))
            .build()
            .filter_map(|entry| entry.ok())
            .any(|entry| entry.path() == target)
    })
    .await
    .unwrap_or(false)
}

pub struct ProjectIndexer {
    project_id: String,
    project_root: PathBuf,
    strategy: ChunkingStrategy,
    backend: Arc<dyn RetrievalBackend>,
    lock: RwLock<()>,
    stats: RwLock<IndexerStats>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ProjectIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectIndexer")
            .field("project_id", &self.project_id)
            .field("project_root", &self.project_root)
            .field("backend", &self.backend.kind())
            .finish()
    }
}

impl ProjectIndexer {
    /// Create an indexer for `<projects_root>/<project_id>`.
    ///
    /// The backend is not initialized here; call [`initialize`](Self::initialize).
    pub fn new(
        project_id: &str,
        projects_root: &Path,
        strategy: ChunkingStrategy,
        backend: Arc<dyn RetrievalBackend>,
    ) -> Result<Self> {
        validate_project_id(project_id)?;
        Ok(Self {
            project_id: project_id.to_string(),
            project_root: projects_root.join(project_id),
            strategy,
            backend,
            lock: RwLock::new(()),
            stats: RwLock::new(IndexerStats::default()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub async fn initialize(&self) -> Result<()> {
        self.backend.initialize().await
    }

    pub fn is_ready(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.backend.is_ready()
    }

    pub async fn stats(&self) -> IndexerStats {
        self.stats.read().await.clone()
    }

    /// Project-relative form of `path`, with `/` separators.
    ///
    /// Absolute paths must lie inside the project directory. Relative paths
    /// must not climb out of it.
    pub fn relative_path(&self, path: &Path) -> Result<String> {
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.project_root).map_err(|_| {
                RetrieverError::invalid_input(format!(
                    "{} is outside project {}",
                    path.display(),
                    self.project_id
                ))
            })?
        } else {
            path
        };

        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => {
                    return Err(RetrieverError::invalid_input(format!(
                        "{} escapes project {}",
                        path.display(),
                        self.project_id
                    )));
                }
            }
        }
        if parts.is_empty() {
            return Err(RetrieverError::invalid_input("Empty document path"));
        }
        Ok(parts.join("/"))
    }

    /// Documents under the configured directories, with their categories.
    async fn discover(&self) -> Result<Vec<(PathBuf, FileCategory)>> {
        let roots: Vec<(PathBuf, FileCategory)> = self
            .strategy
            .layout()
            .directories()
            .map(|(dir, category)| (self.project_root.join(dir), category))
            .collect();
        let strategy = self.strategy.clone();

        tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            for (root, category) in roots {
                if !root.is_dir() {
                    debug!("Skipping missing directory {}", root.display());
                    continue;
                }
                for entry in WalkBuilder::new(&root).hidden(true).build() {
                    match entry {
                        Ok(entry) => {
                            let path = entry.path();
                            if path.is_file() && strategy.should_index_file(path) {
                                files.push((path.to_path_buf(), category));
                            }
                        }
                        Err(e) => warn!("Failed to walk {}: {}", root.display(), e),
                    }
                }
            }
            files.sort_by(|a, b| a.0.cmp(&b.0));
            files
        })
        .await
        .map_err(|e| RetrieverError::external("discover documents", e))
    }

    /// Index every document of the project. Failures on single files are
    /// logged and counted, never fatal.
    pub async fn index_all(&self) -> Result<IndexSummary> {
        info!(
            "Indexing project {} from {}",
            self.project_id,
            self.project_root.display()
        );

        let mut summary = IndexSummary::default();
        for (path, category) in self.discover().await? {
            match self.process_file(&path, Some(category)).await {
                Ok(result) => {
                    summary.files_indexed += 1;
                    summary.chunks_indexed += result.chunks_indexed;
                }
                Err(e) => {
                    warn!("Failed to index {}: {}", path.display(), e);
                    summary.files_failed += 1;
                }
            }
        }

        info!(
            "Indexed project {} ({}): {} files, {} chunks, {} failures",
            self.project_id,
            self.backend.kind(),
            summary.files_indexed,
            summary.chunks_indexed,
            summary.files_failed
        );
        Ok(summary)
    }

    /// Re-index one document, replacing whatever was indexed for it before.
    ///
    /// `category` defaults to the category of the document's top-level directory.
    pub async fn process_file(
        &self,
        path: &Path,
        category: Option<FileCategory>,
    ) -> Result<FileProcessingResult> {
        let start_time = Instant::now();
        let relative = self.relative_path(path)?;
        let full_path = self.project_root.join(&relative);

        if !self.strategy.is_document(&relative) || !walk_includes(&full_path).await {
            debug!("Not a document, skipping: {}", relative);
            return Ok(FileProcessingResult {
                path: relative,
                chunks_indexed: 0,
                processing_time: start_time.elapsed(),
            });
        }

        let result = self.reindex(&relative, &full_path, category).await;

        let mut stats = self.stats.write().await;
        match &result {
            Ok(chunks) => {
                stats.files_processed += 1;
                stats.chunks_indexed += chunks;
                stats.last_indexed_at = Some(Utc::now());
            }
            Err(_) => stats.errors += 1,
        }
        drop(stats);

        let chunks_indexed = result?;
        debug!(
            "Indexed {}/{}: {} chunks",
            self.project_id, relative, chunks_indexed
        );
        Ok(FileProcessingResult {
            path: relative,
            chunks_indexed,
            processing_time: start_time.elapsed(),
        })
    }

    async fn reindex(
        &self,
        relative: &str,
        full_path: &Path,
        category: Option<FileCategory>,
    ) -> Result<usize> {
        let content = tokio::fs::read_to_string(full_path)
            .await
            .map_err(|e| RetrieverError::io(full_path, e))?;
        let category = category.unwrap_or_else(|| self.strategy.category_for(relative));
        let chunks = self
            .strategy
            .chunk_content(&self.project_id, relative, &content, category);

        let _guard = self.lock.write().await;
        self.backend
            .remove_by_path(&self.project_id, relative)
            .await?;
        self.backend.add(&chunks).await
    }

    /// Drop a document's chunks. Unknown documents are a no-op.
    pub async fn remove_file(&self, path: &Path) -> Result<()> {
        let relative = self.relative_path(path)?;
        {
            let _guard = self.lock.write().await;
            self.backend
                .remove_by_path(&self.project_id, &relative)
                .await?;
        }
        self.stats.write().await.files_removed += 1;
        debug!("Removed {}/{} from the index", self.project_id, relative);
        Ok(())
    }

    /// Drop everything indexed for this project.
    pub async fn purge(&self) -> Result<()> {
        let _guard = self.lock.write().await;
        self.backend.remove_project(&self.project_id).await?;
        info!("Purged project {} ({})", self.project_id, self.backend.kind());
        Ok(())
    }

    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        category: Option<FileCategory>,
    ) -> Result<Vec<RetrievalResult>> {
        let request = SearchRequest::new(&self.project_id, query, limit).with_category(category);
        let _guard = self.lock.read().await;
        self.backend.search(&request).await
    }

    /// Release the backend. Safe to call more than once.
    pub async fn cleanup(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.backend.cleanup().await
    }
}
