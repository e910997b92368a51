use anyhow::{Context, Result};
use tracing::info;

use super::OpsContext;
use crate::error::RepoError;
use crate::index::Index;

/// Create an empty repository at `uri`.
///
/// Refuses to touch a repository that already has an index.
pub async fn init(ctx: &OpsContext, uri: &str) -> Result<()> {
    let exists = ctx
        .storage
        .index_exists(uri)
        .await
        .context("check if index exists in the storage")?;
    if exists {
        return Err(RepoError::Conflict(
            "The index file already exists in the remote storage at the provided URI.".to_string(),
        )
        .into());
    }

    let encoded = Index::new().finalize().context("encode empty index")?;
    ctx.storage
        .put_index(uri, encoded)
        .await
        .context("upload index to the repository")?;

    info!(uri, "Initialized empty repository");
    Ok(())
}
