//! Error types for indexing, retrieval and vector-store bootstrap.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, RetrieverError>;

/// Errors raised by retrieval backends, indexers and the bootstrap.
#[derive(Error, Debug)]
pub enum RetrieverError {
    #[error("{component} is not initialized. Call initialize() first.")]
    NotInitialized { component: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Vector store unavailable: {reason}")]
    BackendUnavailable { reason: String },

    /// Semantic search was requested while the vector store is degraded.
    #[error(
        "Semantic search is unavailable: {reason}\nSuggestion: Use keyword search instead, or set [vector] url / enable auto_provision and restart"
    )]
    SemanticSearchUnavailable { reason: String },

    #[error("{operation} failed: {source}")]
    ExternalCall {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl RetrieverError {
    pub fn not_initialized(component: impl Into<String>) -> Self {
        Self::NotInitialized {
            component: component.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Wraps a failure from an external collaborator.
    pub fn external<E>(operation: impl Into<String>, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::ExternalCall {
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error means semantic search cannot be served right now.
    pub fn is_semantic_unavailable(&self) -> bool {
        matches!(
            self,
            Self::SemanticSearchUnavailable { .. } | Self::BackendUnavailable { .. }
        )
    }
}

/// Hard-gate failures while auto-provisioning a vector store instance.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProvisioningError {
    #[error(
        "Port {port} is already in use by another process\nSuggestion: Stop the process using it or change [vector] port"
    )]
    PortConflict { port: u16 },

    #[error(
        "Permission denied for {runtime}: {detail}\nSuggestion: Make sure {runtime} is installed, running and usable by the current user"
    )]
    PermissionDenied { runtime: String, detail: String },

    #[error("Vector store at {url} did not become healthy within {timeout:?}")]
    HealthTimeout { url: String, timeout: Duration },

    #[error("Provisioning runtime error: {0}")]
    Runtime(String),
}
