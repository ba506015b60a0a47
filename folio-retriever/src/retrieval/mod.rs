//! Indexing and search: backends, per-project indexers and the file watcher.

pub mod backend;
pub mod chunking_strategy;
pub mod directory_watcher;
pub mod document_reader;
pub mod keyword;
pub mod project_indexer;
pub mod registry;
pub mod semantic;

pub use backend::{BackendKind, RetrievalBackend, RetrievalResult, ResultPayload, SearchRequest};
pub use chunking_strategy::ChunkingStrategy;
pub use directory_watcher::{ChangeKind, FileChangeEvent, FileChangeWatcher};
pub use document_reader::{DocumentReader, FsDocumentReader};
pub use keyword::KeywordBackend;
pub use project_indexer::{IndexSummary, IndexerStats, ProjectIndexer};
pub use registry::{BackendFactory, IndexerRegistry, KeywordBackendFactory, VectorBackendFactory};
pub use semantic::VectorBackend;
