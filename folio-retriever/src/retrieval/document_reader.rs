use crate::error::{Result, RetrieverError};
use async_trait::async_trait;
use std::path::PathBuf;

/// Reads project documents on demand.
///
/// The keyword index keeps no chunk text, so result snippets and literal
/// fallback matching go back to the source through this trait.
#[async_trait]
pub trait DocumentReader: Send + Sync {
    /// Full text of `path` (relative to the project directory).
    async fn read(&self, project_id: &str, path: &str) -> Result<String>;
}

/// Reads `<root>/<project_id>/<path>` from disk.
#[derive(Debug, Clone)]
pub struct FsDocumentReader {
    root: PathBuf,
}

impl FsDocumentReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl DocumentReader for FsDocumentReader {
    async fn read(&self, project_id: &str, path: &str) -> Result<String> {
        let full = self.root.join(project_id).join(path);
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| RetrieverError::io(full, e))
    }
}

/// Lines `start..=end` (1-based) of `text`, joined with `\n`.
pub fn slice_lines(text: &str, start: usize, end: usize) -> String {
    text.lines()
        .skip(start.saturating_sub(1))
        .take((end + 1).saturating_sub(start.max(1)))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_slice_lines() {
        let text = "one\ntwo\nthree\nfour";
        assert_eq!(slice_lines(text, 2, 3), "two\nthree");
        assert_eq!(slice_lines(text, 1, 1), "one");
        assert_eq!(slice_lines(text, 4, 9), "four");
        assert_eq!(slice_lines(text, 5, 6), "");
    }

    #[tokio::test]
    async fn test_fs_reader() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("p1/notes")).unwrap();
        std::fs::write(dir.path().join("p1/notes/a.md"), "hello").unwrap();

        let reader = FsDocumentReader::new(dir.path());
        assert_eq!(reader.read("p1", "notes/a.md").await.unwrap(), "hello");
        assert!(matches!(
            reader.read("p1", "notes/missing.md").await,
            Err(RetrieverError::Io { .. })
        ));
    }
}
