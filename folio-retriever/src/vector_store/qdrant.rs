//! Qdrant REST client.
//!
//! Only the handful of endpoints retrieval needs are wrapped. Writes are sent
//! with `wait=true` so a successful call means the points are persisted.

use super::{
    CollectionInfo, Payload, PayloadFilter, ScoredPoint, VectorPoint, VectorQuery, VectorStore,
};
use crate::error::{Result, RetrieverError};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Payload fields that get a keyword index when a collection is created.
const INDEXED_FIELDS: &[&str] = &["project_id", "path", "category"];

#[derive(Debug)]
pub struct QdrantStore {
    base_url: String,
    client: Client,
    connected: AtomicBool,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Payload>,
}

#[derive(Debug, Deserialize)]
struct CollectionDescription {
    #[serde(default)]
    points_count: Option<usize>,
    config: CollectionConfig,
}

#[derive(Debug, Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Debug, Deserialize)]
struct CollectionParams {
    vectors: VectorParams,
}

#[derive(Debug, Deserialize)]
struct VectorParams {
    size: usize,
}

/// Qdrant filter JSON for a [`PayloadFilter`].
pub fn filter_json(filter: &PayloadFilter) -> Value {
    let must: Vec<Value> = filter
        .must
        .iter()
        .map(|(key, value)| json!({"key": key, "match": {"value": value}}))
        .collect();
    json!({ "must": must })
}

fn point_id_to_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl QdrantStore {
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RetrieverError::external("build HTTP client", e))?;
        Ok(Self {
            base_url: url.trim_end_matches('/').to_string(),
            client,
            connected: AtomicBool::new(false),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(RetrieverError::BackendUnavailable {
                reason: format!("not connected to {}", self.base_url),
            })
        }
    }

    /// Sends a request and fails on any non-success status.
    async fn send(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<reqwest::Response> {
        let mut request = self.client.request(method, self.endpoint(path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| RetrieverError::external(operation, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(RetrieverError::external(
            operation,
            format!("HTTP {status}: {text}"),
        ))
    }

    async fn describe(&self, collection: &str) -> Result<Option<CollectionDescription>> {
        let operation = format!("describe collection {collection}");
        let response = self
            .client
            .get(self.endpoint(&format!("/collections/{collection}")))
            .send()
            .await
            .map_err(|e| RetrieverError::external(&operation, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| RetrieverError::external(&operation, e))?;
        let envelope: Envelope<CollectionDescription> = response
            .json()
            .await
            .map_err(|e| RetrieverError::external(&operation, e))?;
        Ok(Some(envelope.result))
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn connect(&self) -> Result<()> {
        self.send("connect to vector store", Method::GET, "/collections", None)
            .await?;
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!("Connected to Qdrant at {}", self.base_url);
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

        if let Some(existing) = self.describe(collection).await? {
            let size = existing.config.params.vectors.size;
            if size != dimension {
                return Err(RetrieverError::invalid_input(format!(
                    "Collection '{collection}' has dimension {size}, expected {dimension}"
                )));
            }
            return Ok(());
        }

        tracing::info!(
            "Creating collection {} (dimension {}) at {}",
            collection,
            dimension,
            self.base_url
        );
        self.send(
            "create collection",
            Method::PUT,
            &format!("/collections/{collection}"),
            Some(json!({"vectors": {"size": dimension, "distance": "Cosine"}})),
        )
        .await?;

        for field in INDEXED_FIELDS {
            if let Err(e) = self
                .send(
                    "create payload index",
                    Method::PUT,
                    &format!("/collections/{collection}/index?wait=true"),
                    Some(json!({"field_name": field, "field_schema": "keyword"})),
                )
                .await
            {
                tracing::warn!("Failed to index payload field {}: {}", field, e);
            }
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        self.ensure_connected()?;
        if points.is_empty() {
            return Ok(());
        }
        let points: Vec<Value> = points
            .into_iter()
            .map(|p| json!({"id": p.id, "vector": p.vector, "payload": p.payload}))
            .collect();
        self.send(
            "upsert points",
            Method::PUT,
            &format!("/collections/{collection}/points?wait=true"),
            Some(json!({ "points": points })),
        )
        .await?;
        Ok(())
    }

    async fn search(&self, collection: &str, query: VectorQuery) -> Result<Vec<ScoredPoint>> {
        self.ensure_connected()?;
        let mut body = json!({
            "vector": query.vector,
            "limit": query.limit,
            "with_payload": true,
        });
        if let Some(threshold) = query.score_threshold {
            body["score_threshold"] = json!(threshold);
        }
        if !query.filter.is_empty() {
            body["filter"] = filter_json(&query.filter);
        }

        let response = self
            .send(
                "search points",
                Method::POST,
                &format!("/collections/{collection}/points/search"),
                Some(body),
            )
            .await?;
        let envelope: Envelope<Vec<SearchHit>> = response
            .json()
            .await
            .map_err(|e| RetrieverError::external("decode search response", e))?;

        Ok(envelope
            .result
            .into_iter()
            .map(|hit| ScoredPoint {
                id: point_id_to_string(&hit.id),
                score: hit.score,
                payload: hit.payload.unwrap_or_default(),
            })
            .collect())
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()> {
        self.ensure_connected()?;
        if ids.is_empty() {
            return Ok(());
        }
        self.send(
            "delete points",
            Method::POST,
            &format!("/collections/{collection}/points/delete?wait=true"),
            Some(json!({ "points": ids })),
        )
        .await?;
        Ok(())
    }

    async fn delete_by_filter(&self, collection: &str, filter: &PayloadFilter) -> Result<()> {
        self.ensure_connected()?;
        self.send(
            "delete points by filter",
            Method::POST,
            &format!("/collections/{collection}/points/delete?wait=true"),
            Some(json!({ "filter": filter_json(filter) })),
        )
        .await?;
        Ok(())
    }

    async fn delete_collection(&self, collection: &str) -> Result<()> {
        self.ensure_connected()?;
        self.send(
            "delete collection",
            Method::DELETE,
            &format!("/collections/{collection}"),
            None,
        )
        .await?;
        Ok(())
    }

    async fn collection_info(&self, collection: &str) -> Result<Option<CollectionInfo>> {
        self.ensure_connected()?;
        Ok(self.describe(collection).await?.map(|d| CollectionInfo {
            name: collection.to_string(),
            dimension: d.config.params.vectors.size,
            points_count: d.points_count.unwrap_or(0),
        }))
    }

    fn url(&self) -> &str {
        &self.base_url
    }
}
