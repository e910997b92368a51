use anyhow::{Context, Result};
use tracing::info;

use super::OpsContext;
use crate::scanner::Scanner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReindexOutcome {
    pub charts: usize,
    pub versions: usize,
}

/// Rebuild the index of a repository from the chart archives it holds.
///
/// The stored index is not read; it is replaced by whatever the scan finds.
/// Nothing is uploaded if the scan fails.
pub async fn reindex(ctx: &OpsContext, repo_or_uri: &str) -> Result<ReindexOutcome> {
    let repo = ctx.resolve(repo_or_uri).await?;

    let index = Scanner::new(ctx.storage.clone())
        .scan(repo.url(), ctx.verbose)
        .await
        .context("traverse the chart repository")?;
    let encoded = index.encode().context("encode index")?;

    ctx.storage
        .put_index(repo.url(), encoded)
        .await
        .context("upload index to the repository")?;
    ctx.update_cache(&repo, &index).await?;

    let outcome = ReindexOutcome {
        charts: index.entries.len(),
        versions: index.version_count(),
    };
    info!(
        repo = %repo.url(),
        charts = outcome.charts,
        versions = outcome.versions,
        "Reindexed repository"
    );
    Ok(outcome)
}
