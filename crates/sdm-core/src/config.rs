//! SDM configuration types.
//!
//! The daemon loads one TOML file at startup. A missing file, a parse
//! failure, or an invalid combination of values is fatal; nothing else in
//! the system starts before the configuration is sound.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Reading the configuration file failed.
    #[error("cannot read configuration {path}: {source}")]
    Io {
        /// The configuration path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML.
    #[error("malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration parsed but is not usable.
    #[error("invalid configuration: {message}")]
    Invalid {
        /// What is wrong.
        message: String,
    },
}

/// Which scheduler launches isolated goals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerKind {
    /// Execute every goal inside the daemon process.
    #[default]
    InProcess,
    /// Fork a worker process per isolated goal.
    Subprocess,
    /// Schedule isolated goals as Kubernetes Jobs.
    Kubernetes,
}

/// Goal-signing configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Whether outbound goal events are signed and inbound ones verified.
    pub enabled: bool,
    /// Inline PKCS#8 PEM private key.
    pub signing_key: Option<String>,
    /// Path to a PKCS#8 PEM private key file.
    pub signing_key_path: Option<PathBuf>,
    /// Additional PEM public keys accepted during verification.
    pub verification_keys: Vec<String>,
}

impl SigningConfig {
    /// Resolves the signing key PEM, preferring the inline value.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` when the key file cannot be read, and
    /// `ConfigError::Invalid` when signing is enabled without key material.
    pub fn resolve_signing_key(&self) -> Result<Option<String>, ConfigError> {
        if let Some(pem) = &self.signing_key {
            return Ok(Some(pem.clone()));
        }
        if let Some(path) = &self.signing_key_path {
            let pem = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            return Ok(Some(pem));
        }
        if self.enabled {
            return Err(ConfigError::Invalid {
                message: "goal signing is enabled but no signing key is configured".to_string(),
            });
        }
        Ok(None)
    }
}

/// Kubernetes scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesConfig {
    /// Name of the SDM deployment whose pod spec Jobs clone.
    pub deployment_name: Option<String>,
    /// Namespace of the SDM deployment.
    pub namespace: String,
    /// How often succeeded Jobs are cleaned up.
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
    /// Whether this instance is the master that runs cleanup.
    pub master: bool,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            deployment_name: None,
            namespace: "default".to_string(),
            cleanup_interval: Duration::from_secs(2 * 60 * 60),
            master: true,
        }
    }
}

/// Artifact cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root directory of the filesystem cache store.
    pub root: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/opt/data"),
        }
    }
}

/// Commit-status publication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Base URL of the source-control status endpoint. Statuses are not
    /// published when unset.
    pub endpoint: Option<String>,
}

/// Top-level SDM configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdmConfig {
    /// Registration name of this SDM in the workspace.
    pub name: String,
    /// Registration version.
    pub version: String,
    /// Workspace id this registration serves.
    pub workspace_id: String,
    /// Human-readable workspace name.
    #[serde(default)]
    pub workspace_name: Option<String>,
    /// Goal-signing settings.
    #[serde(default)]
    pub signing: SigningConfig,
    /// Which scheduler launches isolated goals.
    #[serde(default)]
    pub scheduler: SchedulerKind,
    /// Kubernetes scheduling settings.
    #[serde(default)]
    pub kubernetes: KubernetesConfig,
    /// Artifact cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Commit-status settings.
    #[serde(default)]
    pub status: StatusConfig,
}

impl SdmConfig {
    /// Loads and validates the configuration file at `path`.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`]; all of them are fatal at startup.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for unusable value combinations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Invalid {
                message: "registration name must not be empty".to_string(),
            });
        }
        if self.workspace_id.is_empty() {
            return Err(ConfigError::Invalid {
                message: "workspace id must not be empty".to_string(),
            });
        }
        if self.scheduler == SchedulerKind::Kubernetes
            && self.kubernetes.deployment_name.is_none()
        {
            return Err(ConfigError::Invalid {
                message: "kubernetes scheduler requires kubernetes.deployment_name".to_string(),
            });
        }
        // Surfaces a missing key file or an enabled-without-key setup early.
        self.signing.resolve_signing_key().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sdm.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn minimal_config_loads_with_defaults() {
        let (_dir, path) = write_config(
            r#"
            name = "my-sdm"
            version = "0.4.2"
            workspace_id = "W123"
            "#,
        );
        let config = SdmConfig::load(&path).unwrap();
        assert_eq!(config.name, "my-sdm");
        assert_eq!(config.scheduler, SchedulerKind::InProcess);
        assert_eq!(config.kubernetes.namespace, "default");
        assert_eq!(
            config.kubernetes.cleanup_interval,
            Duration::from_secs(7200)
        );
        assert_eq!(config.cache.root, PathBuf::from("/opt/data"));
        assert!(!config.signing.enabled);
    }

    #[test]
    fn full_config_round_trips() {
        let (_dir, path) = write_config(
            r#"
            name = "my-sdm"
            version = "0.4.2"
            workspace_id = "W123"
            workspace_name = "acme"
            scheduler = "kubernetes"

            [signing]
            enabled = false
            verification_keys = []

            [kubernetes]
            deployment_name = "my-sdm"
            namespace = "sdm"
            cleanup_interval = "30m"
            master = false

            [cache]
            root = "/var/cache/sdm"

            [status]
            endpoint = "https://scm.example.com/api/v3"
            "#,
        );
        let config = SdmConfig::load(&path).unwrap();
        assert_eq!(config.scheduler, SchedulerKind::Kubernetes);
        assert_eq!(config.kubernetes.namespace, "sdm");
        assert_eq!(
            config.kubernetes.cleanup_interval,
            Duration::from_secs(1800)
        );
        assert!(!config.kubernetes.master);
        assert_eq!(
            config.status.endpoint.as_deref(),
            Some("https://scm.example.com/api/v3")
        );
    }

    #[test]
    fn missing_file_is_fatal() {
        let result = SdmConfig::load("/nonexistent/sdm.toml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn malformed_toml_is_fatal() {
        let (_dir, path) = write_config("name = ");
        assert!(matches!(
            SdmConfig::load(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn kubernetes_scheduler_requires_deployment_name() {
        let (_dir, path) = write_config(
            r#"
            name = "my-sdm"
            version = "0.4.2"
            workspace_id = "W123"
            scheduler = "kubernetes"
            "#,
        );
        assert!(matches!(
            SdmConfig::load(&path),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn signing_enabled_without_key_is_fatal() {
        let (_dir, path) = write_config(
            r#"
            name = "my-sdm"
            version = "0.4.2"
            workspace_id = "W123"

            [signing]
            enabled = true
            "#,
        );
        assert!(matches!(
            SdmConfig::load(&path),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
