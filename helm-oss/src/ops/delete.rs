use anyhow::{Context, Result};
use tracing::info;

use super::OpsContext;
use crate::repository::{is_remote_uri, Repository};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub name: String,
    pub version: String,
    /// Object removed along with the index entry, if the entry had a URL.
    pub removed_object: Option<String>,
}

/// Where the object behind an index URL lives.
///
/// Index URLs are normally relative to the repository root.
fn object_uri(repo: &Repository, url: &str) -> String {
    if is_remote_uri(url) {
        url.to_string()
    } else {
        repo.object_url(url.trim_start_matches('/'))
    }
}

/// Remove `name` at exactly `version` from the index and delete its archive.
pub async fn delete(
    ctx: &OpsContext,
    name: &str,
    version: &str,
    repo_or_uri: &str,
) -> Result<DeleteOutcome> {
    let repo = ctx.resolve(repo_or_uri).await?;
    let mut index = ctx.fetch_index(&repo).await?;

    let url = index.delete(name, version)?;
    let encoded = index.finalize()?;

    let removed_object = if url.is_empty() {
        None
    } else {
        let uri = object_uri(&repo, &url);
        ctx.storage
            .delete_chart(&uri)
            .await
            .context("delete chart file from the repository")?;
        Some(uri)
    };

    ctx.storage
        .put_index(repo.url(), encoded)
        .await
        .context("upload new index to the repository")?;
    ctx.update_cache(&repo, &index).await?;

    info!(chart = %name, version = %version, "Deleted chart from repository");
    Ok(DeleteOutcome {
        name: name.to_string(),
        version: version.to_string(),
        removed_object,
    })
}
