use anyhow::{Context, Result};
use bytes::Bytes;
use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use tracing::{debug, info};

use super::OpsContext;
use crate::chart::{load_chart, Chart};
use crate::error::RepoError;
use crate::hash_utils::sha256_hash;
use crate::index::Index;
use crate::storage::CHART_CONTENT_TYPE;

#[derive(Debug, Clone, Copy, Default)]
pub struct PushOptions {
    /// Replace a chart version that is already published.
    pub force: bool,
    /// Go through every check and build the new index, but upload nothing.
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    pub name: String,
    pub version: String,
    /// Object URI the chart was (or would be) uploaded to.
    pub chart_url: String,
    pub digest: String,
    /// The index already had this version and it was replaced.
    pub replaced: bool,
    pub with_provenance: bool,
    pub dry_run: bool,
}

fn chart_exists_error(chart_path: &Path, repo_or_uri: &str) -> anyhow::Error {
    RepoError::Conflict(format!(
        "The chart already exists in the repository and cannot be overwritten without an explicit intent.\n\n\
         If you want to replace existing chart, use --force flag:\n\n  \
         helm oss push --force {} {}",
        chart_path.display(),
        repo_or_uri
    ))
    .into()
}

/// Upload the chart archive at `chart_path` and register it in the index.
///
/// The chart goes up first and the index is fetched only afterwards, to keep
/// the read-modify-write of the index as short as possible.
pub async fn push(
    ctx: &OpsContext,
    chart_path: &Path,
    repo_or_uri: &str,
    options: PushOptions,
) -> Result<PushOutcome> {
    let chart = load_chart(chart_path).await?;
    let repo = ctx.resolve(repo_or_uri).await?;

    if let Some(cache_file) = repo.cache_file() {
        if let Ok(cached) = Index::load_file(cache_file).await {
            if cached.has(chart.name(), chart.version()) && !options.force {
                return Err(chart_exists_error(chart_path, repo_or_uri));
            }
        }
    }

    let mut prov_path = chart_path.as_os_str().to_owned();
    prov_path.push(".prov");
    let prov = match tokio::fs::read(&prov_path).await {
        Ok(data) => Some(Bytes::from(data)),
        Err(e) if e.kind() == IoErrorKind::NotFound => None,
        Err(e) => return Err(anyhow::Error::new(e).context("open prov file")),
    };

    let file_name = chart_path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .context("chart path has no file name")?;
    let chart_url = repo.object_url(&file_name);

    let exists = ctx
        .storage
        .exists(&chart_url)
        .await
        .context("check if chart already exists in the repository")?;
    if exists && !options.force {
        return Err(chart_exists_error(chart_path, repo_or_uri));
    }

    let data = tokio::fs::read(chart_path)
        .await
        .context("open chart file")?;
    let digest = sha256_hash(&data);

    let with_provenance = prov.is_some();
    if options.dry_run {
        debug!(chart = %chart.name(), url = %chart_url, "Dry run, skipping chart upload");
    } else {
        let meta_json = chart.metadata().to_json()?;
        ctx.storage
            .put_chart(
                &chart_url,
                Bytes::from(data),
                &meta_json,
                &digest,
                CHART_CONTENT_TYPE,
                prov,
            )
            .await
            .context("upload chart to the repository")?;
    }

    let mut index = ctx.fetch_index(&repo).await?;
    let replaced = index.has(chart.name(), chart.version());
    index
        .add_or_replace(chart.metadata(), &file_name, "", &digest)
        .context("add/replace chart in the index")?;
    let encoded = index.finalize()?;

    if !options.dry_run {
        ctx.storage
            .put_index(repo.url(), encoded)
            .await
            .context("upload index to the repository")?;
        ctx.update_cache(&repo, &index).await?;
    }

    info!(
        chart = %chart.name(),
        version = %chart.version(),
        url = %chart_url,
        replaced,
        dry_run = options.dry_run,
        "Pushed chart"
    );
    Ok(PushOutcome {
        name: chart.name().to_string(),
        version: chart.version().to_string(),
        chart_url,
        digest,
        replaced,
        with_provenance,
        dry_run: options.dry_run,
    })
}
