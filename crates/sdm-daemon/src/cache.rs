//! Filesystem artifact cache shared between dependent goals.
//!
//! Layout: `<root>/<classifier>/<sha>-cache.tar.gz`. Executors put an
//! archive after producing artifacts and later goals of the same SHA get
//! it back, also across isolated workers when the root is a shared volume.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Errors raised by cache operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CacheError {
    /// The classifier would escape the cache root.
    #[error("invalid cache classifier: {classifier}")]
    InvalidClassifier {
        /// The offending classifier.
        classifier: String,
    },

    /// The cached archive does not exist.
    #[error("cache miss for {classifier}/{sha}")]
    Miss {
        /// The classifier looked up.
        classifier: String,
        /// The SHA looked up.
        sha: String,
    },

    /// Filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Filesystem cache store for goal artifacts.
pub struct GoalCache {
    root: PathBuf,
}

impl GoalCache {
    /// Creates a cache rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn validate(classifier: &str) -> Result<(), CacheError> {
        let ok = !classifier.is_empty()
            && classifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
        if ok && classifier != "." && classifier != ".." {
            Ok(())
        } else {
            Err(CacheError::InvalidClassifier {
                classifier: classifier.to_string(),
            })
        }
    }

    /// Returns the archive path for `(classifier, sha)`.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::InvalidClassifier` for classifiers that would
    /// escape the root.
    pub fn archive_path(&self, classifier: &str, sha: &str) -> Result<PathBuf, CacheError> {
        Self::validate(classifier)?;
        Ok(self.root.join(classifier).join(format!("{sha}-cache.tar.gz")))
    }

    /// Stores the archive at `source` for `(classifier, sha)`.
    ///
    /// # Errors
    ///
    /// Propagates filesystem failures.
    pub async fn put(
        &self,
        classifier: &str,
        sha: &str,
        source: &Path,
    ) -> Result<PathBuf, CacheError> {
        let target = self.archive_path(classifier, sha)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(source, &target).await?;
        debug!(classifier, sha, target = %target.display(), "cached artifact");
        Ok(target)
    }

    /// Returns the archive path for `(classifier, sha)` if it is cached.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Miss` when nothing is cached.
    pub async fn get(&self, classifier: &str, sha: &str) -> Result<PathBuf, CacheError> {
        let target = self.archive_path(classifier, sha)?;
        if tokio::fs::try_exists(&target).await? {
            Ok(target)
        } else {
            Err(CacheError::Miss {
                classifier: classifier.to_string(),
                sha: sha.to_string(),
            })
        }
    }

    /// Removes the cached archive, if present.
    ///
    /// # Errors
    ///
    /// Propagates filesystem failures other than the archive being absent.
    pub async fn remove(&self, classifier: &str, sha: &str) -> Result<(), CacheError> {
        let target = self.archive_path(classifier, sha)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
