//! Repository workflows.
//!
//! Each workflow is a short sequence of store calls against one repository:
//!
//! - [`init`]: create an empty index
//! - [`push`]: upload a chart and register it in the index
//! - [`delete`]: remove a chart version and its archive
//! - [`reindex`]: rebuild the index from the bucket contents
//! - [`download`]: stream a raw object (Helm downloader protocol)
//!
//! The index is fetched, changed and written back without any locking, so two
//! writers racing on the same repository can lose an update. Push narrows the
//! window by uploading the chart before it fetches the index.

mod delete;
mod download;
mod init;
mod push;
mod reindex;

pub use delete::{delete, DeleteOutcome};
pub use download::download;
pub use init::init;
pub use push::{push, PushOptions, PushOutcome};
pub use reindex::{reindex, ReindexOutcome};

use anyhow::{Context, Result};
use tracing::debug;

use crate::index::Index;
use crate::repository::{HelmSettings, Repository};
use crate::storage::Storage;

/// What every workflow needs: the store, Helm's settings and verbosity.
#[derive(Clone)]
pub struct OpsContext {
    pub storage: Storage,
    pub helm: HelmSettings,
    pub verbose: bool,
}

impl OpsContext {
    pub fn new(storage: Storage, helm: HelmSettings) -> Self {
        Self {
            storage,
            helm,
            verbose: false,
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    async fn resolve(&self, repo_or_uri: &str) -> Result<Repository> {
        Ok(Repository::resolve(repo_or_uri, &self.helm).await?)
    }

    /// Download and decode the repository index.
    async fn fetch_index(&self, repo: &Repository) -> Result<Index> {
        let raw = match self.storage.fetch_raw(&repo.index_url()).await {
            Ok(raw) => raw,
            Err(e) if e.is_not_found() => {
                return Err(anyhow::Error::new(e).context(format!(
                    "repository not initialized: no index at {}, run `helm oss init {}` first",
                    repo.index_url(),
                    repo.url().trim_end_matches('/')
                )))
            }
            Err(e) => return Err(anyhow::Error::new(e).context("fetch current repo index")),
        };
        let index = Index::decode(&raw).context("load index from downloaded file")?;
        debug!(repo = %repo.url(), versions = index.version_count(), "Fetched repository index");
        Ok(index)
    }

    /// Write the index to the local cache of a named repository.
    async fn update_cache(&self, repo: &Repository, index: &Index) -> Result<()> {
        if let Some(cache_file) = repo.cache_file() {
            index
                .write_file(cache_file)
                .await
                .with_context(|| format!("update local index {}", cache_file.display()))?;
        }
        Ok(())
    }
}
