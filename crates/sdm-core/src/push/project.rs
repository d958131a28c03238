//! Read-only project views for push tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use glob::{MatchOptions, Pattern};

use super::error::PushTestError;

/// A read-only view of the working tree at the pushed commit.
///
/// Push tests only need existence checks and content reads; loading and
/// caching the tree is the project loader's concern.
#[async_trait]
pub trait Project: Send + Sync {
    /// Returns the relative paths of all files matching any of `globs`.
    async fn files_matching(&self, globs: &[String]) -> Result<Vec<String>, PushTestError>;

    /// Returns the content of the file at `path`.
    async fn content(&self, path: &str) -> Result<String, PushTestError>;

    /// Returns `true` if at least one file matches `pattern`.
    async fn has_file(&self, pattern: &str) -> Result<bool, PushTestError> {
        Ok(!self.files_matching(&[pattern.to_string()]).await?.is_empty())
    }
}

/// Loads a [`Project`] view for a `(repo, sha)` pair.
#[async_trait]
pub trait ProjectLoader: Send + Sync {
    /// Materializes the working tree at the pushed commit.
    async fn load(
        &self,
        repo: &super::RepoRef,
        sha: &str,
    ) -> Result<std::sync::Arc<dyn Project>, PushTestError>;
}

/// A project view over a local directory.
///
/// Backs tests and the isolated worker, which finds the repository already
/// cloned at `/atm/home` by its init container.
#[derive(Debug, Clone)]
pub struct LocalProject {
    root: PathBuf,
}

impl LocalProject {
    /// Creates a view rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn walk(dir: &Path, root: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                // The VCS metadata directory is never part of the tree view.
                if path.file_name().is_some_and(|n| n == ".git") {
                    continue;
                }
                Self::walk(&path, root, out)?;
            } else if file_type.is_file() {
                if let Ok(rel) = path.strip_prefix(root) {
                    out.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        Ok(())
    }

    fn all_files(&self) -> Result<Vec<String>, PushTestError> {
        let mut out = Vec::new();
        Self::walk(&self.root, &self.root, &mut out)?;
        out.sort();
        Ok(out)
    }
}

/// Loads [`LocalProject`] views from a fixed directory.
///
/// The isolated worker uses this against `/atm/home`, where its init
/// container cloned the repository.
#[derive(Debug, Clone)]
pub struct LocalProjectLoader {
    root: PathBuf,
}

impl LocalProjectLoader {
    /// Creates a loader rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ProjectLoader for LocalProjectLoader {
    async fn load(
        &self,
        _repo: &super::RepoRef,
        _sha: &str,
    ) -> Result<std::sync::Arc<dyn Project>, PushTestError> {
        Ok(std::sync::Arc::new(LocalProject::new(self.root.clone())))
    }
}

#[async_trait]
impl Project for LocalProject {
    async fn files_matching(&self, globs: &[String]) -> Result<Vec<String>, PushTestError> {
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        let mut patterns = Vec::with_capacity(globs.len());
        for g in globs {
            patterns.push(Pattern::new(g).map_err(|source| PushTestError::InvalidGlob {
                pattern: g.clone(),
                source,
            })?);
        }

        Ok(self
            .all_files()?
            .into_iter()
            .filter(|f| patterns.iter().any(|p| p.matches_with(f, options)))
            .collect())
    }

    async fn content(&self, path: &str) -> Result<String, PushTestError> {
        Ok(std::fs::read_to_string(self.root.join(path))?)
    }
}
