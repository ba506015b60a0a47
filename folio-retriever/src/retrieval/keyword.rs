//! Keyword retrieval over an in-memory inverted index.
//!
//! Each indexed chunk keeps its token occurrences (surface, lemma and
//! reading) and its location, never its text. A query is tokenized the same
//! way as documents; every query token is looked up by surface, lemma and
//! reading, and a chunk's score is the number of matching occurrences over
//! ten, capped at one.
//!
//! Queries that tokenize to nothing (punctuation, symbols) fall back to a
//! case-insensitive literal scan of the project's chunks.

use super::backend::{
    BackendKind, RetrievalBackend, RetrievalResult, ResultPayload, SearchRequest, make_snippet,
};
use super::document_reader::{DocumentReader, slice_lines};
use crate::error::{Result, RetrieverError};
use async_trait::async_trait;
use folio_context::{Chunk, FileCategory, Token, Tokenizer};
use itertools::Itertools;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Matches needed for a score of 1.0.
const SCORE_SATURATION: f32 = 10.0;

const DEFAULT_SNIPPET_LENGTH: usize = 200;

#[derive(Debug, Clone)]
struct ChunkMeta {
    chunk_id: String,
    project_id: String,
    path: String,
    title: String,
    start_line: usize,
    end_line: usize,
    category: FileCategory,
    tags: Vec<String>,
}

#[derive(Debug, Clone)]
struct Occurrence {
    surface: String,
    lemma: String,
    reading: Option<String>,
}

impl Occurrence {
    fn matches(&self, query: &Occurrence) -> bool {
        self.surface == query.surface
            || self.lemma == query.lemma
            || (query.reading.is_some() && self.reading == query.reading)
    }
}

#[derive(Debug)]
struct IndexedChunk {
    meta: ChunkMeta,
    occurrences: Vec<Occurrence>,
}

#[derive(Debug, Default)]
struct InvertedIndex {
    chunks: HashMap<u64, IndexedChunk>,
    by_surface: HashMap<String, HashSet<u64>>,
    by_lemma: HashMap<String, HashSet<u64>>,
    by_reading: HashMap<String, HashSet<u64>>,
    /// (project, chunk id) -> key
    by_chunk_id: HashMap<(String, String), u64>,
    /// (project, path) -> keys
    by_path: HashMap<(String, String), Vec<u64>>,
    next_key: u64,
}

impl InvertedIndex {
    fn insert(&mut self, meta: ChunkMeta, occurrences: Vec<Occurrence>) {
        let chunk_key = (meta.project_id.clone(), meta.chunk_id.clone());
        if let Some(existing) = self.by_chunk_id.get(&chunk_key).copied() {
            self.remove_key(existing);
        }

        let key = self.next_key;
        self.next_key += 1;

        for occurrence in &occurrences {
            self.by_surface
                .entry(occurrence.surface.clone())
                .or_default()
                .insert(key);
            self.by_lemma
                .entry(occurrence.lemma.clone())
                .or_default()
                .insert(key);
            if let Some(reading) = &occurrence.reading {
                self.by_reading
                    .entry(reading.clone())
                    .or_default()
                    .insert(key);
            }
        }
        self.by_path
            .entry((meta.project_id.clone(), meta.path.clone()))
            .or_default()
            .push(key);
        self.by_chunk_id.insert(chunk_key, key);
        self.chunks.insert(key, IndexedChunk { meta, occurrences });
    }

    fn remove_key(&mut self, key: u64) {
        let Some(chunk) = self.chunks.remove(&key) else {
            return;
        };
        for occurrence in &chunk.occurrences {
            unlink(&mut self.by_surface, &occurrence.surface, key);
            unlink(&mut self.by_lemma, &occurrence.lemma, key);
            if let Some(reading) = &occurrence.reading {
                unlink(&mut self.by_reading, reading, key);
            }
        }
        let path_key = (chunk.meta.project_id.clone(), chunk.meta.path.clone());
        if let Some(keys) = self.by_path.get_mut(&path_key) {
            keys.retain(|k| *k != key);
            if keys.is_empty() {
                self.by_path.remove(&path_key);
            }
        }
        self.by_chunk_id
            .remove(&(chunk.meta.project_id, chunk.meta.chunk_id));
    }

    fn remove_path(&mut self, project_id: &str, path: &str) -> usize {
        let keys = self
            .by_path
            .remove(&(project_id.to_string(), path.to_string()))
            .unwrap_or_default();
        for key in &keys {
            self.remove_key(*key);
        }
        keys.len()
    }

    fn remove_project(&mut self, project_id: &str) -> usize {
        let keys: Vec<u64> = self
            .chunks
            .iter()
            .filter(|(_, c)| c.meta.project_id == project_id)
            .map(|(k, _)| *k)
            .collect();
        for key in &keys {
            self.remove_key(*key);
        }
        keys.len()
    }

    /// Keys of chunks holding at least one occurrence matching a query token.
    fn candidates(&self, query: &[Occurrence]) -> HashSet<u64> {
        let mut keys = HashSet::new();
        for token in query {
            if let Some(set) = self.by_surface.get(&token.surface) {
                keys.extend(set);
            }
            if let Some(set) = self.by_lemma.get(&token.lemma) {
                keys.extend(set);
            }
            if let Some(set) = token.reading.as_ref().and_then(|r| self.by_reading.get(r)) {
                keys.extend(set);
            }
        }
        keys
    }
}

fn unlink(postings: &mut HashMap<String, HashSet<u64>>, term: &str, key: u64) {
    if let Some(set) = postings.get_mut(term) {
        set.remove(&key);
        if set.is_empty() {
            postings.remove(term);
        }
    }
}

fn in_scope(meta: &ChunkMeta, request: &SearchRequest) -> bool {
    meta.project_id == request.project_id
        && request.category.is_none_or(|c| c == meta.category)
}

fn score(matches: usize) -> f32 {
    (matches as f32 / SCORE_SATURATION).min(1.0)
}

/// Keyword search backend.
pub struct KeywordBackend {
    tokenizer: Arc<dyn Tokenizer>,
    reader: Arc<dyn DocumentReader>,
    min_token_length: usize,
    snippet_length: usize,
    initialized: AtomicBool,
    index: RwLock<InvertedIndex>,
}

impl KeywordBackend {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, reader: Arc<dyn DocumentReader>) -> Self {
        Self {
            tokenizer,
            reader,
            min_token_length: 2,
            snippet_length: DEFAULT_SNIPPET_LENGTH,
            initialized: AtomicBool::new(false),
            index: RwLock::new(InvertedIndex::default()),
        }
    }

    /// Set the minimum indexed token length in characters (builder style)
    pub fn with_min_token_length(mut self, min_token_length: usize) -> Self {
        self.min_token_length = min_token_length;
        self
    }

    /// Set the snippet length in characters (builder style)
    pub fn with_snippet_length(mut self, snippet_length: usize) -> Self {
        self.snippet_length = snippet_length;
        self
    }

    /// Number of chunks currently indexed.
    pub fn chunk_count(&self) -> usize {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .chunks
            .len()
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RetrieverError::not_initialized("Keyword backend"))
        }
    }

    /// Analyzes text into the occurrences worth indexing.
    fn occurrences(&self, text: &str) -> Result<Vec<Occurrence>> {
        let tokens = self
            .tokenizer
            .analyze(text)
            .map_err(|e| RetrieverError::external("tokenize text", e))?;
        Ok(tokens
            .into_iter()
            .filter(|t| self.keeps(t))
            .map(|t| Occurrence {
                surface: t.surface,
                lemma: t.lemma,
                reading: t.reading,
            })
            .collect())
    }

    fn keeps(&self, token: &Token) -> bool {
        token.is_lexical() && token.surface.chars().count() >= self.min_token_length
    }

    /// Ranks matched chunks and fetches their snippets.
    async fn finish(
        &self,
        mut ranked: Vec<(usize, ChunkMeta)>,
        request: &SearchRequest,
        texts: &mut HashMap<String, String>,
    ) -> Vec<RetrievalResult> {
        ranked = ranked
            .into_iter()
            .sorted_by(|(a_count, a), (b_count, b)| {
                b_count.cmp(a_count).then_with(|| a.chunk_id.cmp(&b.chunk_id))
            })
            .take(request.limit)
            .collect();

        let mut results = Vec::with_capacity(ranked.len());
        for (matches, meta) in ranked {
            let snippet = match self.chunk_text(&meta, texts).await {
                Some(text) => make_snippet(&text, &request.query, self.snippet_length),
                None => String::new(),
            };
            results.push(RetrievalResult {
                id: meta.chunk_id,
                score: score(matches),
                snippet,
                payload: ResultPayload {
                    path: meta.path,
                    start_line: meta.start_line,
                    end_line: meta.end_line,
                    title: meta.title,
                    category: meta.category,
                    tags: meta.tags,
                },
            });
        }
        results
    }

    /// Source lines of a chunk. Files are read once per search.
    async fn chunk_text(
        &self,
        meta: &ChunkMeta,
        texts: &mut HashMap<String, String>,
    ) -> Option<String> {
        if !texts.contains_key(&meta.path) {
            match self.reader.read(&meta.project_id, &meta.path).await {
                Ok(text) => {
                    texts.insert(meta.path.clone(), text);
                }
                Err(e) => {
                    tracing::warn!("Could not read {} for snippet: {}", meta.path, e);
                    return None;
                }
            }
        }
        texts
            .get(&meta.path)
            .map(|text| slice_lines(text, meta.start_line, meta.end_line))
    }

    async fn literal_search(&self, request: &SearchRequest) -> Result<Vec<RetrievalResult>> {
        let needle = request.query.trim().to_lowercase();
        let scoped: Vec<ChunkMeta> = {
            let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
            index
                .chunks
                .values()
                .filter(|c| in_scope(&c.meta, request))
                .map(|c| c.meta.clone())
                .collect()
        };
        tracing::debug!(
            "Query '{}' has no keyword tokens, scanning {} chunks literally",
            request.query,
            scoped.len()
        );

        let mut texts = HashMap::new();
        let mut ranked = Vec::new();
        for meta in scoped {
            let Some(text) = self.chunk_text(&meta, &mut texts).await else {
                continue;
            };
            let count = text.to_lowercase().matches(&needle).count();
            if count > 0 {
                ranked.push((count, meta));
            }
        }
        Ok(self.finish(ranked, request, &mut texts).await)
    }
}

#[async_trait]
impl RetrievalBackend for KeywordBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Keyword
    }

    async fn initialize(&self) -> Result<()> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn add(&self, chunks: &[Chunk]) -> Result<usize> {
        self.ensure_initialized()?;

        let mut prepared = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if chunk.project_id.is_empty() {
                tracing::warn!("Skipping chunk {} without a project", chunk.id);
                continue;
            }
            let occurrences = match self.occurrences(&chunk.body) {
                Ok(occurrences) => occurrences,
                Err(e) => {
                    tracing::warn!("Skipping chunk {}: {}", chunk.id, e);
                    continue;
                }
            };
            let meta = ChunkMeta {
                chunk_id: chunk.id.clone(),
                project_id: chunk.project_id.clone(),
                path: chunk.path.clone(),
                title: chunk.title.clone(),
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                category: chunk.category,
                tags: chunk.tags.clone(),
            };
            prepared.push((meta, occurrences));
        }

        let added = prepared.len();
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        for (meta, occurrences) in prepared {
            index.insert(meta, occurrences);
        }
        Ok(added)
    }

    async fn remove_by_path(&self, project_id: &str, path: &str) -> Result<()> {
        self.ensure_initialized()?;
        let removed = self
            .index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove_path(project_id, path);
        if removed > 0 {
            tracing::debug!("Removed {} keyword chunks for {}/{}", removed, project_id, path);
        }
        Ok(())
    }

    async fn remove_project(&self, project_id: &str) -> Result<()> {
        self.ensure_initialized()?;
        let removed = self
            .index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove_project(project_id);
        tracing::debug!("Removed {} keyword chunks for project {}", removed, project_id);
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<RetrievalResult>> {
        self.ensure_initialized()?;
        if request.query.trim().is_empty() {
            return Err(RetrieverError::invalid_input("Search query must not be empty"));
        }
        if request.limit == 0 {
            return Ok(Vec::new());
        }

        let query = self.occurrences(&request.query)?;
        if query.is_empty() {
            return self.literal_search(request).await;
        }

        let ranked: Vec<(usize, ChunkMeta)> = {
            let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
            index
                .candidates(&query)
                .into_iter()
                .filter_map(|key| index.chunks.get(&key))
                .filter(|chunk| in_scope(&chunk.meta, request))
                .map(|chunk| {
                    let matches: usize = query
                        .iter()
                        .map(|q| chunk.occurrences.iter().filter(|o| o.matches(q)).count())
                        .sum();
                    (matches, chunk.meta.clone())
                })
                .filter(|(matches, _)| *matches > 0)
                .collect()
        };

        let mut texts = HashMap::new();
        Ok(self.finish(ranked, request, &mut texts).await)
    }

    async fn cleanup(&self) -> Result<()> {
        if self.initialized.swap(false, Ordering::SeqCst) {
            *self.index.write().unwrap_or_else(PoisonError::into_inner) = InvertedIndex::default();
        }
        Ok(())
    }
}
