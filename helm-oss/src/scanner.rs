//! Reconciliation scan: rebuild an index from the charts in a bucket.
//!
//! A producer task walks the repository prefix page by page and sends one
//! [`ChartInfo`] per chart archive through a bounded channel. A consumer task
//! folds them into an [`Index`] while the listing is still running.
//!
//! Stream protocol: the channel closing is end-of-stream; an `Err` item is the
//! terminal error and nothing follows it. If the consumer goes away the
//! producer's next send fails and it stops.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::chart::{load_archive, Chart, ChartMetadata};
use crate::error::{RepoError, RepoResult};
use crate::hash_utils::HashingReader;
use crate::index::Index;
use crate::storage::{metadata_value, parse_uri, Storage, META_CHART_DIGEST, META_CHART_METADATA};

/// Items buffered between producer and consumer.
const CHANNEL_CAPACITY: usize = 16;

const CHART_SUFFIX: &str = ".tgz";

/// One chart archive found during a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartInfo {
    /// Object key relative to the repository root.
    pub filename: String,
    pub metadata: ChartMetadata,
    pub digest: String,
}

pub struct Scanner {
    storage: Storage,
}

impl Scanner {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Start the producer and hand back its stream.
    pub fn traverse(&self, repo_uri: &str) -> mpsc::Receiver<RepoResult<ChartInfo>> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let storage = self.storage.clone();
        let repo_uri = repo_uri.to_string();

        tokio::spawn(async move {
            if let Err(e) = produce(&storage, &repo_uri, &tx).await {
                warn!(repo = %repo_uri, kind = %e.kind(), "Repository scan failed: {}", e);
                let _ = tx.send(Err(e)).await;
            }
        });

        rx
    }

    /// Scan `repo_uri` and build a fresh, sorted and stamped index.
    ///
    /// The index is built on its own task, concurrently with the listing.
    pub async fn scan(&self, repo_uri: &str, verbose: bool) -> RepoResult<Index> {
        let rx = self.traverse(repo_uri);
        tokio::spawn(build_index(rx, verbose))
            .await
            .map_err(|e| RepoError::storage("index builder task", e))?
    }
}

/// Consume a scan stream into an index.
///
/// Charts the index refuses are logged and skipped; a terminal error from the
/// stream fails the whole build.
pub async fn build_index(
    mut rx: mpsc::Receiver<RepoResult<ChartInfo>>,
    verbose: bool,
) -> RepoResult<Index> {
    let mut index = Index::new();
    while let Some(item) = rx.recv().await {
        let info = item?;
        if verbose {
            info!(file = %info.filename, "Adding chart to index");
        }
        if let Err(e) = index.add(&info.metadata, &info.filename, "", &info.digest) {
            warn!(file = %info.filename, "Failed to add chart to the index: {}", e);
        }
    }
    index.sort_entries();
    index.update_generated_time();
    debug!(
        charts = index.entries.len(),
        versions = index.version_count(),
        "Built index from scan"
    );
    Ok(index)
}

/// Listing prefix for a repository key, always ending in `/` unless it is
/// the bucket root.
fn list_prefix(repo_key: &str) -> String {
    let trimmed = repo_key.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

/// Chart file name for a listed key, or `None` when the key is skipped.
fn chart_filename<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    let relative = key.strip_prefix(prefix).unwrap_or(key);
    let relative = relative.trim_start_matches('/');
    if relative.contains('/') || !relative.ends_with(CHART_SUFFIX) {
        return None;
    }
    Some(relative)
}

async fn produce(
    storage: &Storage,
    repo_uri: &str,
    tx: &mpsc::Sender<RepoResult<ChartInfo>>,
) -> RepoResult<()> {
    let (bucket, repo_key) = parse_uri(repo_uri)?;
    let prefix = list_prefix(&repo_key);
    let store = storage.store();
    let deadline = storage.deadline();

    let mut token: Option<String> = None;
    let mut pages = 0usize;
    loop {
        let page = deadline
            .run(
                "list objects",
                store.list_page(&bucket, &prefix, token.as_deref()),
            )
            .await?;
        pages += 1;

        for object in &page.objects {
            let Some(filename) = chart_filename(&object.key, &prefix) else {
                continue;
            };
            let info = read_chart_info(storage, &bucket, &object.key, filename).await?;
            if tx.send(Ok(info)).await.is_err() {
                debug!(repo = %repo_uri, "Scan consumer went away, stopping");
                return Ok(());
            }
        }

        match page.next_token {
            Some(next) if !next.is_empty() => token = Some(next),
            _ => break,
        }
    }

    debug!(repo = %repo_uri, pages, "Repository scan finished");
    Ok(())
}

async fn read_chart_info(
    storage: &Storage,
    bucket: &str,
    key: &str,
    filename: &str,
) -> RepoResult<ChartInfo> {
    let store = storage.store();
    let deadline = storage.deadline();

    let head_label = format!("head object {filename:?}");
    let attributes = deadline
        .run(&head_label, store.head(bucket, key))
        .await
        .map_err(|e| with_context(e, head_label))?;

    let stored_meta = metadata_value(&attributes, META_CHART_METADATA).filter(|v| !v.is_empty());
    let stored_digest = metadata_value(&attributes, META_CHART_DIGEST).filter(|v| !v.is_empty());

    if let (Some(meta), Some(digest)) = (stored_meta, stored_digest) {
        let metadata = ChartMetadata::from_json(meta)
            .map_err(|e| with_context(e, format!("unserialize chart meta for {filename:?}")))?;
        return Ok(ChartInfo {
            filename: filename.to_string(),
            metadata,
            digest: digest.to_string(),
        });
    }

    debug!(file = %filename, "Chart attributes missing, downloading archive");
    let get_label = format!("get object {filename:?}");
    let body = deadline
        .run(&get_label, store.get(bucket, key))
        .await
        .map_err(|e| with_context(e, get_label))?;
    let mut reader = HashingReader::new(body);
    let data = deadline
        .run(&format!("read object {filename:?}"), reader.read_all())
        .await?;
    let chart = load_archive(data.as_slice())
        .map_err(|e| with_context(e, format!("load archive from object {filename:?}")))?;

    Ok(ChartInfo {
        filename: filename.to_string(),
        metadata: chart.metadata().clone(),
        digest: reader.finalize(),
    })
}

/// Prefix an error message with the object it concerns, keeping its kind.
fn with_context(err: RepoError, context: String) -> RepoError {
    match err {
        RepoError::Archive(msg) => RepoError::Archive(format!("{context}: {msg}")),
        RepoError::InvalidMetadata(msg) => RepoError::InvalidMetadata(format!("{context}: {msg}")),
        RepoError::Storage {
            context: inner,
            message,
        } => RepoError::Storage {
            context: format!("{context}: {inner}"),
            message,
        },
        other => other,
    }
}
