//! Offline embedding provider based on feature hashing.
//!
//! Each lowercase word and each adjacent word pair is hashed with FNV into one
//! of `dimension` buckets with a hash-derived sign, and the resulting vector
//! is normalized. Texts sharing vocabulary end up close in cosine space. No
//! model files are needed and output is fully deterministic, which makes this
//! provider suitable for tests and for machines without model access.

use crate::error::{EmbedError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingResult, normalize};
use async_trait::async_trait;
use fnv::FnvHasher;
use std::hash::Hasher;

pub const DEFAULT_HASHING_DIMENSION: usize = 256;

#[derive(Debug, Clone)]
pub struct HashingProvider {
    dimension: usize,
}

impl Default for HashingProvider {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_HASHING_DIMENSION,
        }
    }
}

impl HashingProvider {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(EmbedError::invalid_config(
                "hashing dimension must be greater than zero",
            ));
        }
        Ok(Self { dimension })
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let mut hasher = FnvHasher::default();
        hasher.write(feature.as_bytes());
        let hash = hasher.finish();
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        ((hash % self.dimension as u64) as usize, sign)
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();

        for word in &words {
            let (idx, sign) = self.bucket(word);
            vector[idx] += sign;
        }
        for pair in words.windows(2) {
            let (idx, sign) = self.bucket(&format!("{} {}", pair[0], pair[1]));
            vector[idx] += 0.5 * sign;
        }

        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_one(text))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        Ok(EmbeddingResult::new(
            texts.iter().map(|text| self.embed_one(text)).collect(),
        ))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "hashing"
    }

    async fn dispose(&self) -> Result<()> {
        Ok(())
    }
}
