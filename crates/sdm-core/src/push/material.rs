//! Material-change detection.
//!
//! A push is a material change when its changed-file set intersects the
//! configured directories, extensions, files, or glob patterns. Pushes that
//! only touch immaterial files (docs, CI badges) plan no delivery goals.

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use super::error::PushTestError;

/// What counts as material for a repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialChangeOptions {
    /// Directory prefixes, e.g. `src`.
    pub directories: Vec<String>,
    /// File extensions with or without the leading dot, e.g. `rs`.
    pub extensions: Vec<String>,
    /// Exact file paths.
    pub files: Vec<String>,
    /// Glob patterns over relative paths.
    pub globs: Vec<String>,
}

impl MaterialChangeOptions {
    /// Returns `true` if any of `changed` matches these options.
    ///
    /// # Errors
    ///
    /// Returns `PushTestError::InvalidGlob` when a glob pattern does not
    /// compile.
    pub fn matches(&self, changed: &[String]) -> Result<bool, PushTestError> {
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        let mut patterns = Vec::with_capacity(self.globs.len());
        for g in &self.globs {
            patterns.push(Pattern::new(g).map_err(|source| PushTestError::InvalidGlob {
                pattern: g.clone(),
                source,
            })?);
        }

        let extensions: Vec<String> = self
            .extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();

        Ok(changed.iter().any(|path| {
            if self.files.iter().any(|f| f == path) {
                return true;
            }
            if self
                .directories
                .iter()
                .any(|d| path.starts_with(&format!("{}/", d.trim_end_matches('/'))))
            {
                return true;
            }
            if !extensions.is_empty() {
                if let Some(ext) = std::path::Path::new(path)
                    .extension()
                    .and_then(|e| e.to_str())
                {
                    if extensions.iter().any(|e| e == &ext.to_ascii_lowercase()) {
                        return true;
                    }
                }
            }
            patterns.iter().any(|p| p.matches_with(path, options))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changed() -> Vec<String> {
        vec![
            "src/main.rs".to_string(),
            "README.md".to_string(),
            "deploy/chart/values.yaml".to_string(),
        ]
    }

    #[test]
    fn empty_options_match_nothing() {
        let opts = MaterialChangeOptions::default();
        assert!(!opts.matches(&changed()).unwrap());
    }

    #[test]
    fn directory_prefix_matches() {
        let opts = MaterialChangeOptions {
            directories: vec!["src".to_string()],
            ..Default::default()
        };
        assert!(opts.matches(&changed()).unwrap());

        let opts = MaterialChangeOptions {
            directories: vec!["srcx".to_string()],
            ..Default::default()
        };
        assert!(!opts.matches(&changed()).unwrap());
    }

    #[test]
    fn extension_matches_with_or_without_dot() {
        for ext in ["rs", ".rs"] {
            let opts = MaterialChangeOptions {
                extensions: vec![ext.to_string()],
                ..Default::default()
            };
            assert!(opts.matches(&changed()).unwrap(), "extension {ext}");
        }
    }

    #[test]
    fn exact_file_matches() {
        let opts = MaterialChangeOptions {
            files: vec!["README.md".to_string()],
            ..Default::default()
        };
        assert!(opts.matches(&changed()).unwrap());
    }

    #[test]
    fn glob_matches_nested_paths() {
        let opts = MaterialChangeOptions {
            globs: vec!["deploy/**/*.yaml".to_string()],
            ..Default::default()
        };
        assert!(opts.matches(&changed()).unwrap());
    }

    #[test]
    fn invalid_glob_is_an_error() {
        let opts = MaterialChangeOptions {
            globs: vec!["deploy/[".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            opts.matches(&changed()),
            Err(PushTestError::InvalidGlob { .. })
        ));
    }
}
