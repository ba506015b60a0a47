use crate::config::{ChunkingConfig, LayoutConfig};
use folio_context::{Chunk, ChunkingEngine, FileCategory};
use std::path::Path;

/// Decides which project files are documents, what category they belong to,
/// and chunks them.
#[derive(Debug, Clone)]
pub struct ChunkingStrategy {
    engine: ChunkingEngine,
    layout: LayoutConfig,
}

impl ChunkingStrategy {
    pub fn new(chunking: &ChunkingConfig, layout: LayoutConfig) -> Self {
        Self {
            engine: chunking.engine(),
            layout,
        }
    }

    pub fn layout(&self) -> &LayoutConfig {
        &self.layout
    }

    /// Chunk a document and stamp every chunk with its owner.
    pub fn chunk_content(
        &self,
        project_id: &str,
        path: &str,
        content: &str,
        category: FileCategory,
    ) -> Vec<Chunk> {
        let chunks: Vec<Chunk> = self
            .engine
            .chunk_document(content, path)
            .into_iter()
            .map(|chunk| chunk.with_owner(project_id, category))
            .collect();

        tracing::debug!(
            "Chunked {}/{} into {} chunks (max tokens: {})",
            project_id,
            path,
            chunks.len(),
            self.engine.max_tokens()
        );

        chunks
    }

    /// Category of a project-relative path, from its top-level directory.
    /// Paths outside every configured directory count as content.
    pub fn category_for(&self, relative_path: &str) -> FileCategory {
        let top = relative_path.split('/').next().unwrap_or_default();
        if self.layout.settings_dirs.iter().any(|d| d == top) {
            FileCategory::Settings
        } else {
            FileCategory::Content
        }
    }

    /// Whether a project-relative path names a document: it sits under a
    /// configured directory, no segment is hidden, and its extension is allowed.
    pub fn is_document(&self, relative_path: &str) -> bool {
        let segments: Vec<&str> = relative_path.split('/').collect();
        let in_layout = segments.len() > 1
            && self
                .layout
                .directories()
                .any(|(dir, _)| dir == segments[0]);
        in_layout
            && !segments.iter().any(|s| s.is_empty() || s.starts_with('.'))
            && self.should_index_file(Path::new(relative_path))
    }

    /// Check if a file should be indexed based on its path
    pub fn should_index_file(&self, file_path: &Path) -> bool {
        if let Some(filename) = file_path.file_name().and_then(|n| n.to_str()) {
            if filename.starts_with('.') {
                return false;
            }
        }

        match file_path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => self
                .layout
                .extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy() -> ChunkingStrategy {
        ChunkingStrategy::new(&ChunkingConfig::default(), LayoutConfig::default())
    }

    #[test]
    fn test_chunk_content_sets_owner() {
        let chunks = strategy().chunk_content(
            "p1",
            "settings/world.md",
            "# World\nAn island.\n",
            FileCategory::Settings,
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].project_id, "p1");
        assert_eq!(chunks[0].category, FileCategory::Settings);
        assert_eq!(chunks[0].path, "settings/world.md");
    }

    #[test]
    fn test_category_for() {
        let strategy = strategy();
        assert_eq!(strategy.category_for("settings/world.md"), FileCategory::Settings);
        assert_eq!(strategy.category_for("manuscript/ch1.md"), FileCategory::Content);
        assert_eq!(strategy.category_for("loose.md"), FileCategory::Content);
    }

    #[test]
    fn test_is_document_follows_layout() {
        let strategy = strategy();
        assert!(strategy.is_document("manuscript/ch1.md"));
        assert!(strategy.is_document("manuscript/part1/ch1.md"));
        assert!(strategy.is_document("settings/world.txt"));

        assert!(!strategy.is_document("archive/old.md"));
        assert!(!strategy.is_document("loose.md"));
        assert!(!strategy.is_document("manuscript"));
        assert!(!strategy.is_document("manuscript/.drafts/ch1.md"));
        assert!(!strategy.is_document("manuscript/cover.png"));
    }

    #[test]
    fn test_should_index_file() {
        let strategy = strategy();

        assert!(strategy.should_index_file(Path::new("manuscript/ch1.md")));
        assert!(strategy.should_index_file(Path::new("notes/todo.TXT")));

        assert!(!strategy.should_index_file(Path::new("manuscript/cover.png")));
        assert!(!strategy.should_index_file(Path::new("manuscript/.draft.md")));
        assert!(!strategy.should_index_file(Path::new("README")));
    }
}
