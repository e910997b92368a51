use bytes::Bytes;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use super::{assemble_object_metadata, parse_uri, BlobStore, ObjectReader, PutOptions};
use crate::deadline::Deadline;
use crate::error::{RepoError, RepoResult};
use crate::index::INDEX_FILE_NAME;
use crate::repository::index_file_url;

const PROV_SUFFIX: &str = ".prov";

/// Repository-level view of a [`BlobStore`].
///
/// Every call goes through the command's [`Deadline`].
#[derive(Clone)]
pub struct Storage {
    store: Arc<dyn BlobStore>,
    deadline: Deadline,
}

impl Storage {
    pub fn new(store: Arc<dyn BlobStore>, deadline: Deadline) -> Self {
        Self { store, deadline }
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    /// Open the object behind `uri` for streaming.
    pub async fn open(&self, uri: &str) -> RepoResult<ObjectReader> {
        let (bucket, key) = parse_uri(uri)?;
        self.deadline
            .run("get object", self.store.get(&bucket, &key))
            .await
    }

    /// Read the whole object behind `uri`.
    pub async fn fetch_raw(&self, uri: &str) -> RepoResult<Vec<u8>> {
        let mut reader = self.open(uri).await?;
        let mut body = Vec::new();
        self.deadline
            .run("read object", async {
                reader.read_to_end(&mut body).await?;
                Ok::<_, RepoError>(())
            })
            .await?;
        debug!(uri, size = body.len(), "Fetched object");
        Ok(body)
    }

    pub async fn exists(&self, uri: &str) -> RepoResult<bool> {
        let (bucket, key) = parse_uri(uri)?;
        self.deadline
            .run("head object", self.store.exists(&bucket, &key))
            .await
    }

    /// Whether the repository at `repo_uri` has an index.
    ///
    /// `repo_uri` names the repository, not the index file itself.
    pub async fn index_exists(&self, repo_uri: &str) -> RepoResult<bool> {
        check_repo_uri(repo_uri)?;
        self.exists(&index_file_url(repo_uri)).await
    }

    /// Upload an encoded index to the repository at `repo_uri`.
    pub async fn put_index(&self, repo_uri: &str, index: Vec<u8>) -> RepoResult<()> {
        check_repo_uri(repo_uri)?;
        let (bucket, key) = parse_uri(&index_file_url(repo_uri))?;
        let size = index.len();
        self.deadline
            .run(
                "upload index",
                self.store
                    .put(&bucket, &key, Bytes::from(index), PutOptions::default()),
            )
            .await?;
        info!(bucket = %bucket, key = %key, size, "Uploaded index");
        Ok(())
    }

    /// Upload a chart archive and, when given, its provenance file.
    ///
    /// The chart carries its metadata and digest as object attributes unless
    /// they exceed the attribute soft limit.
    pub async fn put_chart(
        &self,
        uri: &str,
        chart: Bytes,
        chart_meta: &str,
        chart_digest: &str,
        content_type: &str,
        prov: Option<Bytes>,
    ) -> RepoResult<()> {
        let (bucket, key) = parse_uri(uri)?;
        let attributes = assemble_object_metadata(chart_meta, chart_digest);
        if attributes.is_empty() {
            debug!(key = %key, "Chart attributes exceed the soft limit, uploading without them");
        }
        let options = PutOptions {
            attributes,
            content_type: Some(content_type.to_string()),
        };
        self.deadline
            .run("upload chart", self.store.put(&bucket, &key, chart, options))
            .await?;

        if let Some(prov) = prov {
            let prov_key = format!("{key}{PROV_SUFFIX}");
            self.deadline
                .run(
                    "upload provenance",
                    self.store
                        .put(&bucket, &prov_key, prov, PutOptions::default()),
                )
                .await?;
        }
        info!(bucket = %bucket, key = %key, "Uploaded chart");
        Ok(())
    }

    /// Delete a chart archive together with its provenance file.
    pub async fn delete_chart(&self, uri: &str) -> RepoResult<()> {
        let (bucket, key) = parse_uri(uri)?;
        let keys = [key.clone(), format!("{key}{PROV_SUFFIX}")];
        self.deadline
            .run("delete chart", self.store.delete_many(&bucket, &keys))
            .await?;
        info!(bucket = %bucket, key = %key, "Deleted chart");
        Ok(())
    }
}

fn check_repo_uri(repo_uri: &str) -> RepoResult<()> {
    if repo_uri.trim_end_matches('/').ends_with(INDEX_FILE_NAME) {
        return Err(RepoError::InvalidUri(format!(
            "uri {repo_uri} must not contain {INDEX_FILE_NAME:?} suffix, it is appended automatically"
        )));
    }
    Ok(())
}
