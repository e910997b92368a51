//! Repository identification.
//!
//! A repository is given either as an `oss://bucket/path` URI or as the name
//! of a repository registered with `helm repo add`. Named repositories have a
//! local index cache that the workflows keep in step with the bucket.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{RepoError, RepoResult};
use crate::index::INDEX_FILE_NAME;
use crate::storage::URI_SCHEME;

/// `repo_url` with the index file name appended.
pub fn index_file_url(repo_url: &str) -> String {
    format!("{}/{INDEX_FILE_NAME}", repo_url.trim_end_matches('/'))
}

/// Name of the cache file Helm keeps for a named repository.
pub fn cache_file_name(repo_name: &str) -> String {
    format!("{repo_name}-{INDEX_FILE_NAME}")
}

pub fn is_remote_uri(repo_or_uri: &str) -> bool {
    repo_or_uri.starts_with(&format!("{URI_SCHEME}://"))
}

/// Locations of Helm's own configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelmSettings {
    /// `repositories.yaml`
    pub repository_config: PathBuf,
    /// Directory holding `<name>-index.yaml` caches.
    pub repository_cache: PathBuf,
}

impl HelmSettings {
    /// Read the locations the way Helm does: `HELM_REPOSITORY_CONFIG` and
    /// `HELM_REPOSITORY_CACHE`, falling back to the platform directories.
    pub fn from_env() -> Self {
        let repository_config = std::env::var_os("HELM_REPOSITORY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("helm")
                    .join("repositories.yaml")
            });
        let repository_cache = std::env::var_os("HELM_REPOSITORY_CACHE")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::cache_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("helm")
                    .join("repository")
            });
        Self {
            repository_config,
            repository_cache,
        }
    }
}

/// One entry of `repositories.yaml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RepoEntry {
    pub name: String,
    pub url: String,
    /// Credentials, TLS settings and whatever else Helm stores.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RepoFile {
    #[serde(default)]
    repositories: Vec<RepoEntry>,
}

/// Find a repository by name in `repositories.yaml`.
pub async fn lookup_repo_entry(name: &str, repo_file: &Path) -> RepoResult<RepoEntry> {
    let raw = match tokio::fs::read(repo_file).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == IoErrorKind::NotFound => {
            debug!(path = %repo_file.display(), "Helm repositories file does not exist");
            return Err(RepoError::RepoNotFound(name.to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    let file: RepoFile = if raw.iter().all(u8::is_ascii_whitespace) {
        RepoFile::default()
    } else {
        serde_yaml_ng::from_slice(&raw)?
    };
    file.repositories
        .into_iter()
        .find(|entry| entry.name == name)
        .ok_or_else(|| RepoError::RepoNotFound(name.to_string()))
}

/// Target repository of a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Repository {
    /// Registered with `helm repo add`; has a local index cache.
    Local { entry: RepoEntry, cache_file: PathBuf },
    /// Addressed directly by `oss://` URI; no cache.
    Remote { uri: String },
}

impl Repository {
    /// Resolve a repository name or `oss://` URI.
    pub async fn resolve(repo_or_uri: &str, settings: &HelmSettings) -> RepoResult<Self> {
        if is_remote_uri(repo_or_uri) {
            return Ok(Repository::Remote {
                uri: repo_or_uri.to_string(),
            });
        }

        let entry = lookup_repo_entry(repo_or_uri, &settings.repository_config).await?;
        if !is_remote_uri(&entry.url) {
            return Err(RepoError::InvalidUri(format!(
                "repository {} points at {}, which is not an {URI_SCHEME}:// repository",
                entry.name, entry.url
            )));
        }
        let cache_file = settings
            .repository_cache
            .join(cache_file_name(&entry.name));
        debug!(repo = %entry.name, url = %entry.url, "Resolved named repository");
        Ok(Repository::Local { entry, cache_file })
    }

    pub fn url(&self) -> &str {
        match self {
            Repository::Local { entry, .. } => &entry.url,
            Repository::Remote { uri } => uri,
        }
    }

    pub fn index_url(&self) -> String {
        index_file_url(self.url())
    }

    /// URI of an object directly under the repository root.
    pub fn object_url(&self, filename: &str) -> String {
        format!("{}/{filename}", self.url().trim_end_matches('/'))
    }

    pub fn cache_file(&self) -> Option<&Path> {
        match self {
            Repository::Local { cache_file, .. } => Some(cache_file),
            Repository::Remote { .. } => None,
        }
    }

    pub fn should_update_cache(&self) -> bool {
        matches!(self, Repository::Local { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    const REPOSITORIES: &str = r#"apiVersion: ""
generated: "2024-03-01T10:00:00Z"
repositories:
- name: charts
  url: oss://bucket/charts/
  caFile: ""
  insecure_skip_tls_verify: false
- name: stable
  url: https://charts.example.com/stable
"#;

    fn settings(dir: &TempDir) -> HelmSettings {
        let repository_config = dir.path().join("repositories.yaml");
        std::fs::write(&repository_config, REPOSITORIES).unwrap();
        HelmSettings {
            repository_config,
            repository_cache: dir.path().join("cache"),
        }
    }

    #[test]
    fn test_index_file_url() {
        assert_eq!(index_file_url("oss://bucket/charts"), "oss://bucket/charts/index.yaml");
        assert_eq!(index_file_url("oss://bucket/charts/"), "oss://bucket/charts/index.yaml");
    }

    #[tokio::test]
    async fn test_resolve_uri_is_remote() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::resolve("oss://bucket/charts", &settings(&dir))
            .await
            .unwrap();
        assert_eq!(repo.url(), "oss://bucket/charts");
        assert_eq!(repo.index_url(), "oss://bucket/charts/index.yaml");
        assert!(repo.cache_file().is_none());
        assert!(!repo.should_update_cache());
    }

    #[tokio::test]
    async fn test_resolve_named_repository() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::resolve("charts", &settings(&dir)).await.unwrap();
        assert_eq!(repo.url(), "oss://bucket/charts/");
        assert_eq!(repo.object_url("app-1.0.0.tgz"), "oss://bucket/charts/app-1.0.0.tgz");
        assert_eq!(
            repo.cache_file().unwrap(),
            dir.path().join("cache/charts-index.yaml")
        );
        assert!(repo.should_update_cache());
    }

    #[tokio::test]
    async fn test_resolve_unknown_name() {
        let dir = TempDir::new().unwrap();
        let err = Repository::resolve("missing", &settings(&dir))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::RepoNotFound(ref name) if name == "missing"));
    }

    #[tokio::test]
    async fn test_resolve_without_repositories_file() {
        let dir = TempDir::new().unwrap();
        let settings = HelmSettings {
            repository_config: dir.path().join("absent.yaml"),
            repository_cache: dir.path().to_path_buf(),
        };
        let err = Repository::resolve("charts", &settings).await.unwrap_err();
        assert!(matches!(err, RepoError::RepoNotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_rejects_non_oss_repository() {
        let dir = TempDir::new().unwrap();
        let err = Repository::resolve("stable", &settings(&dir))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::InvalidUri(_)));
    }

    #[test]
    #[serial]
    fn test_settings_from_env() {
        std::env::set_var("HELM_REPOSITORY_CONFIG", "/tmp/helm/repositories.yaml");
        std::env::set_var("HELM_REPOSITORY_CACHE", "/tmp/helm/cache");
        let settings = HelmSettings::from_env();
        std::env::remove_var("HELM_REPOSITORY_CONFIG");
        std::env::remove_var("HELM_REPOSITORY_CACHE");

        assert_eq!(
            settings.repository_config,
            PathBuf::from("/tmp/helm/repositories.yaml")
        );
        assert_eq!(settings.repository_cache, PathBuf::from("/tmp/helm/cache"));
    }
}
