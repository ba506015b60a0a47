//! Vector store abstraction.
//!
//! A [`VectorStore`] holds named collections of points (id, vector, JSON
//! payload) and answers filtered nearest-neighbour queries. Two stores ship
//! with the crate:
//!
//! - [`MemoryVectorStore`]: in-process cosine search, selected by `memory://<name>`
//! - [`QdrantStore`]: the Qdrant REST API, selected by `http://` and `https://` URLs
//!
//! Stores are built from a connection target by a [`StoreConnector`], which
//! lets the bootstrap and tests swap in their own stores.

pub mod memory;
pub mod qdrant;

pub use memory::MemoryVectorStore;
pub use qdrant::QdrantStore;

use crate::error::{Result, RetrieverError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// JSON object stored next to each vector.
pub type Payload = Map<String, Value>;

/// A point to insert or replace.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

/// Conjunction of exact-match conditions on payload fields.
///
/// A condition on an array field matches when the array contains the value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadFilter {
    pub must: Vec<(String, Value)>,
}

impl PayloadFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a `key == value` condition (builder style)
    pub fn must_match(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.must.push((key.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
    }

    /// Whether `payload` satisfies every condition.
    pub fn matches(&self, payload: &Payload) -> bool {
        self.must.iter().all(|(key, expected)| match payload.get(key) {
            Some(Value::Array(items)) => items.contains(expected),
            Some(actual) => actual == expected,
            None => false,
        })
    }
}

/// Parameters of a nearest-neighbour query.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorQuery {
    pub vector: Vec<f32>,
    pub limit: usize,
    /// Hits scoring below this are dropped.
    pub score_threshold: Option<f32>,
    pub filter: PayloadFilter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: String,
    pub dimension: usize,
    pub points_count: usize,
}

/// Storage and similarity search over named collections.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Check the store is reachable and mark it connected.
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Create the collection when missing. Fails when it exists with a different dimension.
    async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<()>;

    /// Insert or replace points by id.
    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()>;

    /// Hits ordered by descending score.
    async fn search(&self, collection: &str, query: VectorQuery) -> Result<Vec<ScoredPoint>>;

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()>;

    async fn delete_by_filter(&self, collection: &str, filter: &PayloadFilter) -> Result<()>;

    async fn delete_collection(&self, collection: &str) -> Result<()>;

    /// `None` when the collection does not exist.
    async fn collection_info(&self, collection: &str) -> Result<Option<CollectionInfo>>;

    /// Connection target this store was built for.
    fn url(&self) -> &str;
}

/// Builds a store for a connection target.
pub trait StoreConnector: Send + Sync {
    fn open(&self, url: &str) -> Result<Arc<dyn VectorStore>>;
}

/// Chooses the store implementation from the URL scheme.
///
/// `memory://` stores are kept per name, so every `open` of the same
/// target shares one set of collections.
#[derive(Default)]
pub struct DefaultConnector {
    memory: Mutex<HashMap<String, Arc<MemoryVectorStore>>>,
}

impl DefaultConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoreConnector for DefaultConnector {
    fn open(&self, url: &str) -> Result<Arc<dyn VectorStore>> {
        if url.starts_with(memory::SCHEME) {
            let mut stores = self.memory.lock().unwrap_or_else(PoisonError::into_inner);
            let store = stores
                .entry(url.to_string())
                .or_insert_with(|| Arc::new(MemoryVectorStore::new(url)));
            return Ok(Arc::clone(store) as Arc<dyn VectorStore>);
        }

        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(Arc::new(QdrantStore::new(url)?));
        }

        Err(RetrieverError::invalid_input(format!(
            "Unsupported vector store URL '{url}'. Use http(s)://host:port or memory://name"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_matching() {
        let payload = json!({"project_id": "p1", "tags": ["night", "harbour"]});
        let payload = payload.as_object().cloned().unwrap_or_default();

        assert!(PayloadFilter::new().matches(&payload));
        assert!(PayloadFilter::new().must_match("project_id", "p1").matches(&payload));
        assert!(!PayloadFilter::new().must_match("project_id", "p2").matches(&payload));
        assert!(PayloadFilter::new().must_match("tags", "night").matches(&payload));
        assert!(!PayloadFilter::new().must_match("missing", "x").matches(&payload));
    }

    #[test]
    fn test_connector_schemes() {
        let connector = DefaultConnector::new();
        let a = connector.open("memory://shared").unwrap();
        let b = connector.open("memory://shared").unwrap();
        assert_eq!(a.url(), "memory://shared");
        assert!(Arc::ptr_eq(&a, &b));

        let qdrant = connector.open("http://localhost:6333").unwrap();
        assert_eq!(qdrant.url(), "http://localhost:6333");

        assert!(connector.open("ftp://nope").is_err());
    }
}
