//! # Store Configuration
//!
//! The object store a command talks to is described by [`StoreConfig`]. It is
//! built once at startup and passed down explicitly; nothing reads it
//! globally.
//!
//! ## Sources
//!
//! 1. `~/.config/helm_plugin_oss.yaml`, when present
//! 2. `HELM_OSS_STORE_ROOT` and `HELM_OSS_PAGE_SIZE`, which win over the file
//!
//! Keys the file may carry for other transports (endpoint, region,
//! credentials) are accepted and ignored.
//!
//! ```yaml
//! storeRoot: /srv/helm-buckets
//! pageSize: 500
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::storage::LocalStore;

/// File name of the plugin configuration under `~/.config`.
pub const CONFIG_FILE_NAME: &str = "helm_plugin_oss.yaml";

pub const ENV_STORE_ROOT: &str = "HELM_OSS_STORE_ROOT";
pub const ENV_PAGE_SIZE: &str = "HELM_OSS_PAGE_SIZE";

/// Listing page size used when nothing else is configured.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Directory whose subdirectories are the buckets.
    #[serde(default = "default_store_root")]
    pub store_root: PathBuf,
    /// Objects returned per listing page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_store_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("helm-oss")
        .join("buckets")
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_root: default_store_root(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl StoreConfig {
    /// `~/.config/helm_plugin_oss.yaml`, if a home directory is known.
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config").join(CONFIG_FILE_NAME))
    }

    /// Load from the default file location and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(Self::config_path().as_deref())
    }

    /// Load from `path` (skipped when missing) and the environment.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => Self::read_file(path)?,
            _ => Self::default(),
        };
        config.apply_env()?;
        debug!(
            store_root = %config.store_root.display(),
            page_size = config.page_size,
            "Loaded store configuration"
        );
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse config from {:?}", path))
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(root) = std::env::var_os(ENV_STORE_ROOT).filter(|v| !v.is_empty()) {
            self.store_root = PathBuf::from(root);
        }
        if let Ok(raw) = std::env::var(ENV_PAGE_SIZE) {
            if !raw.is_empty() {
                self.page_size = raw
                    .parse()
                    .with_context(|| format!("Invalid {}: {}", ENV_PAGE_SIZE, raw))?;
            }
        }
        anyhow::ensure!(self.page_size > 0, "page size must be greater than zero");
        Ok(())
    }

    /// Open the configured store.
    pub fn open_store(&self) -> LocalStore {
        LocalStore::new(&self.store_root).with_page_size(self.page_size)
    }
}
