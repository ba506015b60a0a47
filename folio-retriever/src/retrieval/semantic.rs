//! Semantic retrieval over a vector store.
//!
//! Chunks are embedded from their composite text (title, blank line, body)
//! and stored as points whose payload carries the chunk id and location.
//! Every query is filtered by project, so tenants sharing a collection never
//! see each other's chunks.

use super::backend::{
    BackendKind, RetrievalBackend, RetrievalResult, ResultPayload, SearchRequest, make_snippet,
};
use crate::config::VectorConfig;
use crate::error::{Result, RetrieverError};
use crate::vector_store::{Payload, PayloadFilter, VectorPoint, VectorQuery, VectorStore};
use async_trait::async_trait;
use folio_context::{Chunk, FileCategory};
use folio_embed::EmbeddingProvider;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;

/// Store id for a chunk of one project: the first 16 bytes of the blake3
/// digest of `project_id`, a NUL byte and the chunk id, formatted as a UUID
/// so any store accepts it. Chunk ids do not name their project, so the
/// project must take part in the hash for tenants to never share a point.
pub fn point_id(project_id: &str, chunk_id: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(project_id.as_bytes());
    hasher.update(&[0]);
    hasher.update(chunk_id.as_bytes());
    let hash = hasher.finalize();
    let hex = hash.to_hex();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

fn chunk_payload(chunk: &Chunk) -> Payload {
    let value = json!({
        "chunk_id": chunk.id,
        "project_id": chunk.project_id,
        "path": chunk.path,
        "title": chunk.title,
        "body": chunk.body,
        "start_line": chunk.start_line,
        "end_line": chunk.end_line,
        "ordinal": chunk.ordinal,
        "category": chunk.category.as_str(),
        "tags": chunk.tags,
        "content_hash": chunk.content_hash,
    });
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

fn text_field(payload: &Payload, key: &str) -> String {
    payload
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn line_field(payload: &Payload, key: &str) -> usize {
    payload.get(key).and_then(Value::as_u64).unwrap_or(0) as usize
}

/// Vector search backend for one project.
pub struct VectorBackend {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    collection: String,
    score_threshold: f32,
    snippet_length: usize,
    batch_size: usize,
    init: OnceCell<()>,
    closed: AtomicBool,
    /// Point ids written per (project, path), after the store confirmed them.
    indexed: Mutex<HashMap<(String, String), HashSet<String>>>,
}

impl VectorBackend {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &VectorConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            collection: config.collection.clone(),
            score_threshold: config.score_threshold,
            snippet_length: config.snippet_length,
            batch_size: config.batch_size.max(1),
            init: OnceCell::new(),
            closed: AtomicBool::new(false),
            indexed: Mutex::new(HashMap::new()),
        }
    }

    /// Number of points this backend has written and not removed.
    pub fn point_count(&self) -> usize {
        self.indexed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(HashSet::len)
            .sum()
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) || !self.init.initialized() {
            return Err(RetrieverError::not_initialized("Vector backend"));
        }
        Ok(())
    }

    async fn embed_batch(&self, batch: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = batch.iter().map(Chunk::composite_text).collect();
        let result = self
            .embedder
            .embed_texts(&texts)
            .await
            .map_err(|e| RetrieverError::external("embed chunks", e))?;
        if result.len() != batch.len() {
            return Err(RetrieverError::external(
                "embed chunks",
                format!(
                    "provider returned {} embeddings for {} texts",
                    result.len(),
                    batch.len()
                ),
            ));
        }
        Ok(result.embeddings)
    }

    /// Drop specific chunks of one project by chunk id.
    pub async fn remove_ids(&self, project_id: &str, chunk_ids: &[String]) -> Result<()> {
        self.ensure_ready()?;
        let ids: Vec<String> = chunk_ids
            .iter()
            .map(|id| point_id(project_id, id))
            .collect();
        self.store.delete(&self.collection, &ids).await?;

        let mut indexed = self.indexed.lock().unwrap_or_else(PoisonError::into_inner);
        indexed.retain(|(project, _), points| {
            if project == project_id {
                for id in &ids {
                    points.remove(id);
                }
            }
            !points.is_empty()
        });
        drop(indexed);
        tracing::debug!(
            "Removed {} vector points from project {}",
            ids.len(),
            project_id
        );
        Ok(())
    }

    fn forget(&self, matches: impl Fn(&(String, String)) -> bool) {
        self.indexed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|key, _| !matches(key));
    }
}

#[async_trait]
impl RetrievalBackend for VectorBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Vector
    }

    async fn initialize(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RetrieverError::not_initialized("Vector backend"));
        }
        self.init
            .get_or_try_init(|| async {
                self.embedder
                    .initialize()
                    .await
                    .map_err(|e| RetrieverError::external("initialize embedding provider", e))?;
                if !self.store.is_connected() {
                    self.store.connect().await?;
                }
                self.store
                    .ensure_collection(&self.collection, self.embedder.embedding_dimension())
                    .await?;
                tracing::info!(
                    "Vector backend ready: {} via {} ({} dimensions)",
                    self.collection,
                    self.store.url(),
                    self.embedder.embedding_dimension()
                );
                Ok::<(), RetrieverError>(())
            })
            .await?;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.init.initialized() && !self.closed.load(Ordering::SeqCst) && self.store.is_connected()
    }

    async fn add(&self, chunks: &[Chunk]) -> Result<usize> {
        self.ensure_ready()?;

        let mut added = 0;
        for batch in chunks.chunks(self.batch_size) {
            let vectors = self.embed_batch(batch).await?;
            let points: Vec<VectorPoint> = batch
                .iter()
                .zip(vectors)
                .map(|(chunk, vector)| VectorPoint {
                    id: point_id(&chunk.project_id, &chunk.id),
                    vector,
                    payload: chunk_payload(chunk),
                })
                .collect();
            self.store.upsert(&self.collection, points).await?;

            {
                let mut indexed = self.indexed.lock().unwrap_or_else(PoisonError::into_inner);
                for chunk in batch {
                    indexed
                        .entry((chunk.project_id.clone(), chunk.path.clone()))
                        .or_default()
                        .insert(point_id(&chunk.project_id, &chunk.id));
                }
            }
            added += batch.len();
        }
        Ok(added)
    }

    async fn remove_by_path(&self, project_id: &str, path: &str) -> Result<()> {
        self.ensure_ready()?;
        let filter = PayloadFilter::new()
            .must_match("project_id", project_id)
            .must_match("path", path);
        self.store.delete_by_filter(&self.collection, &filter).await?;
        self.forget(|(p, f)| p == project_id && f == path);
        Ok(())
    }

    async fn remove_project(&self, project_id: &str) -> Result<()> {
        self.ensure_ready()?;
        let filter = PayloadFilter::new().must_match("project_id", project_id);
        self.store.delete_by_filter(&self.collection, &filter).await?;
        self.forget(|(p, _)| p == project_id);
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<RetrievalResult>> {
        self.ensure_ready()?;
        if request.query.trim().is_empty() {
            return Err(RetrieverError::invalid_input("Search query must not be empty"));
        }
        if request.limit == 0 {
            return Ok(Vec::new());
        }

        let vector = self
            .embedder
            .embed_text(&request.query)
            .await
            .map_err(|e| RetrieverError::external("embed query", e))?;

        let mut filter = PayloadFilter::new().must_match("project_id", request.project_id.as_str());
        if let Some(category) = request.category {
            filter = filter.must_match("category", category.as_str());
        }

        let hits = self
            .store
            .search(
                &self.collection,
                VectorQuery {
                    vector,
                    limit: request.limit,
                    score_threshold: Some(self.score_threshold),
                    filter,
                },
            )
            .await?;

        Ok(hits
            .into_iter()
            .map(|hit| {
                let payload = &hit.payload;
                let chunk_id = match text_field(payload, "chunk_id") {
                    id if id.is_empty() => hit.id.clone(),
                    id => id,
                };
                let tags = payload
                    .get("tags")
                    .and_then(Value::as_array)
                    .map(|tags| {
                        tags.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                RetrievalResult {
                    id: chunk_id,
                    score: hit.score.clamp(0.0, 1.0),
                    snippet: make_snippet(
                        &text_field(payload, "body"),
                        &request.query,
                        self.snippet_length,
                    ),
                    payload: ResultPayload {
                        path: text_field(payload, "path"),
                        start_line: line_field(payload, "start_line"),
                        end_line: line_field(payload, "end_line"),
                        title: text_field(payload, "title"),
                        category: text_field(payload, "category")
                            .parse()
                            .unwrap_or(FileCategory::Content),
                        tags,
                    },
                }
            })
            .collect())
    }

    async fn cleanup(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.indexed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            tracing::debug!("Vector backend for {} closed", self.collection);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::MemoryVectorStore;
    use folio_context::chunk;
    use folio_embed::HashingProvider;

    fn chunks_for(project: &str, path: &str, text: &str, category: FileCategory) -> Vec<Chunk> {
        chunk(text, path, 400, 0.1)
            .into_iter()
            .map(|c| c.with_owner(project, category))
            .collect()
    }

    async fn backend() -> (VectorBackend, Arc<MemoryVectorStore>) {
        let store = Arc::new(MemoryVectorStore::new("memory://semantic-test"));
        let embedder = Arc::new(HashingProvider::new(256).unwrap());
        let config = VectorConfig {
            batch_size: 2,
            ..VectorConfig::default()
        };
        let backend = VectorBackend::new(store.clone(), embedder, &config);
        backend.initialize().await.unwrap();
        (backend, store)
    }

    const STORM: &str = "# Storm\nThe storm broke over the lighthouse.\n\n# Bakery\nWarm bread and cinnamon rolls.\n\n# Tide\nThe tide pulled at the pier.\n";

    #[test]
    fn test_point_id_is_uuid_shaped_and_stable() {
        let id = point_id("p1", "a.md::1-3::chunk-0@deadbeef");
        assert_eq!(id.len(), 36);
        assert_eq!(id.matches('-').count(), 4);
        assert_eq!(id, point_id("p1", "a.md::1-3::chunk-0@deadbeef"));
        assert_ne!(id, point_id("p1", "a.md::1-3::chunk-1@deadbeef"));
        assert_ne!(id, point_id("p2", "a.md::1-3::chunk-0@deadbeef"));
        // The separator keeps the project/chunk boundary unambiguous.
        assert_ne!(point_id("p1a", ".md"), point_id("p1", "a.md"));
    }

    #[tokio::test]
    async fn test_requires_initialize() {
        let store = Arc::new(MemoryVectorStore::new("memory://x"));
        let embedder = Arc::new(HashingProvider::new(8).unwrap());
        let backend = VectorBackend::new(store, embedder, &VectorConfig::default());
        let err = backend.add(&[]).await.unwrap_err();
        assert!(matches!(err, RetrieverError::NotInitialized { .. }));
        assert!(!backend.is_ready());
    }

    #[tokio::test]
    async fn test_initialize_connects_and_creates_collection() {
        let (backend, store) = backend().await;
        assert!(backend.is_ready());
        let info = store.collection_info("folio_chunks").await.unwrap().unwrap();
        assert_eq!(info.dimension, 256);

        // second call is a no-op
        backend.initialize().await.unwrap();
    }

    #[tokio::test]
    async fn test_add_and_search_in_batches() {
        let (backend, store) = backend().await;
        let chunks = chunks_for("p1", "manuscript/a.md", STORM, FileCategory::Content);
        assert_eq!(chunks.len(), 3);

        let added = backend.add(&chunks).await.unwrap();
        assert_eq!(added, 3);
        assert_eq!(backend.point_count(), 3);
        let info = store.collection_info("folio_chunks").await.unwrap().unwrap();
        assert_eq!(info.points_count, 3);

        let results = backend
            .search(&SearchRequest::new("p1", "warm bread cinnamon", 3))
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].payload.title, "Bakery");
        assert_eq!(results[0].id, chunks[1].id);
        assert!(results[0].score > 0.0 && results[0].score <= 1.0);
        assert!(results[0].snippet.contains("cinnamon"));
        assert_eq!(results[0].payload.start_line, 4);
    }

    #[tokio::test]
    async fn test_search_is_project_and_category_scoped() {
        let (backend, _) = backend().await;
        backend
            .add(&chunks_for("p1", "manuscript/a.md", STORM, FileCategory::Content))
            .await
            .unwrap();
        backend
            .add(&chunks_for("p2", "settings/a.md", STORM, FileCategory::Settings))
            .await
            .unwrap();

        let results = backend
            .search(&SearchRequest::new("p1", "storm lighthouse", 10))
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.payload.path == "manuscript/a.md"));

        let results = backend
            .search(
                &SearchRequest::new("p2", "storm lighthouse", 10)
                    .with_category(Some(FileCategory::Content)),
            )
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_remove_by_path_project_and_ids() {
        let (backend, store) = backend().await;
        let chunks = chunks_for("p1", "manuscript/a.md", STORM, FileCategory::Content);
        backend.add(&chunks).await.unwrap();
        backend
            .add(&chunks_for("p1", "manuscript/b.md", STORM, FileCategory::Content))
            .await
            .unwrap();
        backend
            .add(&chunks_for("p2", "manuscript/a.md", STORM, FileCategory::Content))
            .await
            .unwrap();

        assert_eq!(backend.point_count(), 9);

        backend.remove_ids("p1", &[chunks[0].id.clone()]).await.unwrap();
        let info = store.collection_info("folio_chunks").await.unwrap().unwrap();
        assert_eq!(info.points_count, 8);
        assert_eq!(backend.point_count(), 8);

        // Another project's chunk id never reaches this project's points.
        backend.remove_ids("p3", &[chunks[1].id.clone()]).await.unwrap();
        assert_eq!(backend.point_count(), 8);
        let info = store.collection_info("folio_chunks").await.unwrap().unwrap();
        assert_eq!(info.points_count, 8);

        backend.remove_by_path("p1", "manuscript/a.md").await.unwrap();
        let info = store.collection_info("folio_chunks").await.unwrap().unwrap();
        assert_eq!(info.points_count, 6);

        backend.remove_project("p1").await.unwrap();
        let info = store.collection_info("folio_chunks").await.unwrap().unwrap();
        assert_eq!(info.points_count, 3);
        assert_eq!(backend.point_count(), 3);
    }

    #[tokio::test]
    async fn test_identical_documents_in_two_projects_stay_separate() {
        let (backend, store) = backend().await;
        let alpha = chunks_for("alpha", "manuscript/a.md", STORM, FileCategory::Content);
        let beta = chunks_for("beta", "manuscript/a.md", STORM, FileCategory::Content);
        assert_eq!(alpha[0].id, beta[0].id);
        backend.add(&alpha).await.unwrap();
        backend.add(&beta).await.unwrap();

        let info = store.collection_info("folio_chunks").await.unwrap().unwrap();
        assert_eq!(info.points_count, 6);
        assert_eq!(backend.point_count(), 6);

        let request = SearchRequest::new("alpha", "warm bread cinnamon", 3);
        let hits = backend.search(&request).await.unwrap();
        assert_eq!(hits[0].payload.title, "Bakery");

        backend.remove_project("beta").await.unwrap();
        let hits = backend.search(&request).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].payload.title, "Bakery");
        assert_eq!(hits[0].id, alpha[1].id);
        assert_eq!(backend.point_count(), 3);

        // Re-adding the same chunks overwrites their points in place.
        backend.add(&alpha).await.unwrap();
        assert_eq!(backend.point_count(), 3);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_fails_initialize() {
        let store = Arc::new(MemoryVectorStore::new("memory://dims"));
        store.connect().await.unwrap();
        store.ensure_collection("folio_chunks", 16).await.unwrap();

        let embedder = Arc::new(HashingProvider::new(32).unwrap());
        let backend = VectorBackend::new(store, embedder, &VectorConfig::default());
        assert!(backend.initialize().await.is_err());
        assert!(!backend.is_ready());
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let (backend, _) = backend().await;
        backend.cleanup().await.unwrap();
        backend.cleanup().await.unwrap();
        assert!(!backend.is_ready());
        assert!(backend.search(&SearchRequest::new("p1", "x", 1)).await.is_err());
    }
}
