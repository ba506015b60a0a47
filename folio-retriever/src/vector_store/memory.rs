use super::{CollectionInfo, PayloadFilter, ScoredPoint, VectorPoint, VectorQuery, VectorStore};
use crate::error::{Result, RetrieverError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

pub const SCHEME: &str = "memory://";

#[derive(Debug, Default)]
struct Collection {
    dimension: usize,
    points: HashMap<String, VectorPoint>,
}

/// In-process vector store with exact cosine search.
#[derive(Debug)]
pub struct MemoryVectorStore {
    url: String,
    connected: AtomicBool,
    collections: RwLock<HashMap<String, Collection>>,
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

impl MemoryVectorStore {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connected: AtomicBool::new(false),
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(RetrieverError::BackendUnavailable {
                reason: format!("{} is not connected", self.url),
            })
        }
    }

    fn missing(collection: &str) -> RetrieverError {
        RetrieverError::invalid_input(format!("Collection '{collection}' does not exist"))
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<()> {
        self.ensure_connected()?;
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = collections
            .entry(collection.to_string())
            .or_insert_with(|| Collection {
                dimension,
                points: HashMap::new(),
            });
        if entry.dimension != dimension {
            return Err(RetrieverError::invalid_input(format!(
                "Collection '{collection}' has dimension {}, expected {dimension}",
                entry.dimension
            )));
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        self.ensure_connected()?;
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| Self::missing(collection))?;

        if let Some(bad) = points.iter().find(|p| p.vector.len() != target.dimension) {
            return Err(RetrieverError::invalid_input(format!(
                "Point {} has dimension {}, collection expects {}",
                bad.id,
                bad.vector.len(),
                target.dimension
            )));
        }

        for point in points {
            target.points.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn search(&self, collection: &str, query: VectorQuery) -> Result<Vec<ScoredPoint>> {
        self.ensure_connected()?;
        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let target = collections
            .get(collection)
            .ok_or_else(|| Self::missing(collection))?;

        let mut hits: Vec<ScoredPoint> = target
            .points
            .values()
            .filter(|point| query.filter.matches(&point.payload))
            .map(|point| ScoredPoint {
                id: point.id.clone(),
                score: cosine_similarity(&query.vector, &point.vector),
                payload: point.payload.clone(),
            })
            .filter(|hit| query.score_threshold.is_none_or(|t| hit.score >= t))
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(query.limit);
        Ok(hits)
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()> {
        self.ensure_connected()?;
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(target) = collections.get_mut(collection) {
            for id in ids {
                target.points.remove(id);
            }
        }
        Ok(())
    }

    async fn delete_by_filter(&self, collection: &str, filter: &PayloadFilter) -> Result<()> {
        self.ensure_connected()?;
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(target) = collections.get_mut(collection) {
            target.points.retain(|_, point| !filter.matches(&point.payload));
        }
        Ok(())
    }

    async fn delete_collection(&self, collection: &str) -> Result<()> {
        self.ensure_connected()?;
        self.collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(collection);
        Ok(())
    }

    async fn collection_info(&self, collection: &str) -> Result<Option<CollectionInfo>> {
        self.ensure_connected()?;
        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(collections.get(collection).map(|c| CollectionInfo {
            name: collection.to_string(),
            dimension: c.dimension,
            points_count: c.points.len(),
        }))
    }

    fn url(&self) -> &str {
        &self.url
    }
}
