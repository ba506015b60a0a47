//! The retrieval backend contract shared by keyword and vector search.

use crate::error::Result;
use async_trait::async_trait;
use folio_context::{Chunk, FileCategory};
use serde::Serialize;
use std::fmt;

/// Which retrieval strategy a backend implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Keyword,
    Vector,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Keyword => write!(f, "keyword"),
            BackendKind::Vector => write!(f, "vector"),
        }
    }
}

/// A query scoped to one project.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub project_id: String,
    pub query: String,
    pub limit: usize,
    pub category: Option<FileCategory>,
}

impl SearchRequest {
    pub fn new(project_id: impl Into<String>, query: impl Into<String>, limit: usize) -> Self {
        Self {
            project_id: project_id.into(),
            query: query.into(),
            limit,
            category: None,
        }
    }

    /// Restrict results to one file category (builder style)
    pub fn with_category(mut self, category: Option<FileCategory>) -> Self {
        self.category = category;
        self
    }
}

/// Where a result came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultPayload {
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub title: String,
    pub category: FileCategory,
    pub tags: Vec<String>,
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    /// Chunk id.
    pub id: String,
    /// Relevance in `[0, 1]`.
    pub score: f32,
    pub snippet: String,
    pub payload: ResultPayload,
}

/// Storage and search of chunks for retrieval.
///
/// Every operation except `initialize` fails with
/// [`RetrieverError::NotInitialized`](crate::error::RetrieverError::NotInitialized)
/// until `initialize` has succeeded.
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Prepare the backend. Safe to call repeatedly and concurrently.
    async fn initialize(&self) -> Result<()>;

    fn is_ready(&self) -> bool;

    /// Index chunks. Returns how many were indexed.
    async fn add(&self, chunks: &[Chunk]) -> Result<usize>;

    /// Drop every chunk of `path` in `project_id`. Unknown paths are a no-op.
    async fn remove_by_path(&self, project_id: &str, path: &str) -> Result<()>;

    /// Drop every chunk of `project_id`.
    async fn remove_project(&self, project_id: &str) -> Result<()>;

    async fn search(&self, request: &SearchRequest) -> Result<Vec<RetrievalResult>>;

    /// Release resources. Safe to call repeatedly.
    async fn cleanup(&self) -> Result<()>;
}

/// Cuts a window of about `length` characters out of `text`, centred on the
/// first occurrence of any query word, or from the start when no word occurs.
pub fn make_snippet(text: &str, query: &str, length: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= length {
        return text.trim().to_string();
    }

    let lowered: Vec<char> = chars.iter().map(|c| fold_char(*c)).collect();
    let hit = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .filter_map(|word| {
            let needle: Vec<char> = word.chars().map(fold_char).collect();
            find_chars(&lowered, &needle)
        })
        .min();

    let start = match hit {
        Some(pos) => pos.saturating_sub(length / 2),
        None => 0,
    };
    let start = start.min(chars.len() - length);
    chars[start..start + length]
        .iter()
        .collect::<String>()
        .trim()
        .to_string()
}

fn fold_char(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

fn find_chars(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_returned_whole() {
        assert_eq!(make_snippet("  short text ", "anything", 50), "short text");
    }

    #[test]
    fn test_window_is_centred_on_first_match() {
        let text = format!("{}needle{}", "a".repeat(100), "b".repeat(100));
        let snippet = make_snippet(&text, "Needle", 20);
        assert_eq!(snippet.chars().count(), 20);
        assert!(snippet.contains("needle"));
        assert!(snippet.starts_with('a'));
    }

    #[test]
    fn test_no_match_uses_leading_window() {
        let text = "x".repeat(300);
        assert_eq!(make_snippet(&text, "zzz", 10), "x".repeat(10));
    }

    #[test]
    fn test_match_near_end_stays_in_bounds() {
        let text = format!("{}end", "a".repeat(100));
        let snippet = make_snippet(&text, "end", 20);
        assert!(snippet.ends_with("end"));
        assert_eq!(snippet.chars().count(), 20);
    }

    #[test]
    fn test_request_builder() {
        let request = SearchRequest::new("p1", "harbour", 5).with_category(Some(FileCategory::Settings));
        assert_eq!(request.category, Some(FileCategory::Settings));
        assert_eq!(BackendKind::Vector.to_string(), "vector");
    }
}
