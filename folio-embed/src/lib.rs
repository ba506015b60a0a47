//! # folio-embed
//!
//! Text embedding providers for semantic retrieval, with a focus on local
//! ONNX models via FastEmbed. Designed for async operation behind a single
//! provider trait so retrieval code never depends on a concrete model.
//!
//! ## Features
//!
//! - **Local ONNX Models**: Run embedding models locally without external API calls
//! - **Async-First Design**: Model work runs on tokio's blocking pool
//! - **Model Caching**: Loaded models are shared between providers with the same configuration
//! - **Offline Provider**: Deterministic feature hashing for tests and air-gapped machines
//!
//! ## Quick Start
//!
//! ```no_run
//! use folio_embed::{EmbedConfig, EmbeddingProvider, FastEmbedProvider};
//!
//! # async fn example() -> folio_embed::Result<()> {
//! let provider = FastEmbedProvider::create(EmbedConfig::default()).await?;
//!
//! let texts = vec!["Hello world".to_string(), "How are you?".to_string()];
//! let result = provider.embed_texts(&texts).await?;
//!
//! println!("Generated {} embeddings of dimension {}",
//!          result.len(), result.dimension);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`config`]: Configuration for FastEmbed models
//! - [`provider`]: The [`EmbeddingProvider`] trait and the FastEmbed implementation
//! - [`hashing`]: Offline feature-hashing provider
//! - [`error`]: Error types and result handling
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`] using the crate's [`EmbedError`] type.

pub mod config;
pub mod error;
pub mod hashing;
pub mod provider;

// Re-export main types for easy access
pub use config::EmbedConfig;
pub use error::{EmbedError, Result};
pub use hashing::HashingProvider;
pub use provider::{EmbeddingProvider, EmbeddingResult, FastEmbedProvider};
