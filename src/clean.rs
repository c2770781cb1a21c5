use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Instant;

use camino::Utf8PathBuf;
use glob::glob;
use tracing::{debug, info};

use crate::error::CleanupError;
use crate::utils::as_overhead;

/// Deletes every path matching a fixed set of patterns.
///
/// Patterns may be literal paths (`dist`) or globs (`.tmp/*.css`). Matched
/// directories are removed recursively. Nothing matching is not an error.
#[derive(Debug, Clone)]
pub struct Cleanup {
    patterns: Vec<String>,
}

impl Cleanup {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Removes the matched paths and returns the ones actually deleted.
    pub async fn clean(&self) -> Result<Vec<Utf8PathBuf>, CleanupError> {
        let s = Instant::now();
        let mut removed = Vec::new();

        for path in self.matches()? {
            let metadata = match tokio::fs::symlink_metadata(&path).await {
                Ok(metadata) => metadata,
                // already gone with a previously removed parent
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(CleanupError::Remove(path, e)),
            };

            let result = if metadata.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };

            match result {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(CleanupError::Remove(path, e)),
            }

            debug!("removed {}", path.display());
            removed.extend(Utf8PathBuf::from_path_buf(path).ok());
        }

        info!(
            "cleaned {} path(s) matching [{}] {}",
            removed.len(),
            self.patterns.join(", "),
            as_overhead(s)
        );

        Ok(removed)
    }

    fn matches(&self) -> Result<Vec<PathBuf>, CleanupError> {
        let mut paths = Vec::new();
        for pattern in &self.patterns {
            let entries =
                glob(pattern).map_err(|e| CleanupError::Pattern(pattern.clone(), e))?;
            for entry in entries {
                paths.push(entry?);
            }
        }
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn root(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap()
    }

    #[tokio::test]
    async fn removes_exactly_the_matching_paths() {
        let dir = TempDir::new().unwrap();
        let root = root(&dir);
        fs::create_dir_all(root.join(".tmp")).unwrap();
        fs::write(root.join(".tmp/widget.css"), "a{}").unwrap();
        fs::write(root.join(".tmp/widget.js"), "x").unwrap();
        fs::write(root.join(".tmp/widget.html"), "<widget/>").unwrap();

        let cleanup = Cleanup::new([format!("{root}/.tmp/*.css"), format!("{root}/.tmp/*.js")]);
        let removed = cleanup.clean().await.unwrap();

        assert_eq!(removed.len(), 2);
        assert!(!root.join(".tmp/widget.css").exists());
        assert!(!root.join(".tmp/widget.js").exists());
        assert!(root.join(".tmp/widget.html").exists());
    }

    #[tokio::test]
    async fn removes_directories_recursively() {
        let dir = TempDir::new().unwrap();
        let root = root(&dir);
        fs::create_dir_all(root.join("dist/nested")).unwrap();
        fs::write(root.join("dist/nested/widget.js"), "x").unwrap();
        fs::create_dir_all(root.join("src")).unwrap();

        let cleanup = Cleanup::new([
            format!("{root}/dist"),
            format!("{root}/.tmp"),
            format!("{root}/maps"),
        ]);
        let removed = cleanup.clean().await.unwrap();

        assert_eq!(removed, vec![root.join("dist")]);
        assert!(!root.join("dist").exists());
        assert!(root.join("src").exists());
    }

    #[tokio::test]
    async fn nothing_to_remove_is_a_success() {
        let dir = TempDir::new().unwrap();
        let root = root(&dir);

        let cleanup = Cleanup::new([format!("{root}/.tmp")]);
        assert!(cleanup.clean().await.unwrap().is_empty());
        // and again, idempotent
        assert!(cleanup.clean().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_pattern_is_reported() {
        let cleanup = Cleanup::new(["[unclosed"]);
        let err = cleanup.clean().await.unwrap_err();
        assert!(matches!(err, CleanupError::Pattern(..)));
    }
}
