//! folio-retriever: tenant-scoped document indexing and retrieval
//!
//! Projects live as subdirectories of a projects root. Each project's
//! documents are chunked along their headings and indexed twice: into an
//! in-memory keyword index and, when a vector store can be reached, into a
//! shared vector collection partitioned by project id.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: Keyword and vector backends, per-project indexers,
//!   the indexer registry and the file change watcher
//! - **[`bootstrap`]**: Explicit, auto-provisioned or degraded vector store
//! - **[`vector_store`]**: Vector store contract with in-memory and Qdrant stores
//! - **[`service`]**: Everything above behind one entry point
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use folio_retriever::{RetrievalDeps, RetrievalService, RetrieverConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = RetrieverConfig::new("./projects").with_vector_url("http://localhost:6333");
//! let deps = RetrievalDeps::from_config(&config)?;
//! let service = RetrievalService::start(config, deps).await?;
//!
//! service.index_project("my-novel").await?;
//! let hits = service.keyword_search("my-novel", "lighthouse", 10, None).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! FileChangeWatcher → RetrievalService → IndexerRegistry (keyword) → KeywordBackend
//!                           ↓          ↘ IndexerRegistry (vector)  → VectorBackend → VectorStore
//!                 VectorStoreBootstrap → explicit | auto-provisioned | degraded
//! ```

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod retrieval;
pub mod service;
pub mod vector_store;

pub use config::RetrieverConfig;
pub use error::{ProvisioningError, Result, RetrieverError};
pub use service::{RetrievalDeps, RetrievalService};
