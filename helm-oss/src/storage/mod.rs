//! Object storage access.
//!
//! The repository only needs a small slice of what an object store offers:
//! paginated prefix listing, per-object attributes, whole-object get/put and
//! batch delete. [`BlobStore`] captures that slice; [`Storage`] layers the
//! repository conventions (`oss://` URIs, `index.yaml`, chart attributes,
//! `.prov` companions) and the operation deadline on top of it.
//!
//! Two stores ship with the crate:
//!
//! - [`MemoryStore`]: in-process buckets, used by the tests;
//! - [`LocalStore`]: a directory per bucket, attributes kept in a sidecar tree.

mod local;
mod memory;
mod repo_storage;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use repo_storage::Storage;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::pin::Pin;
use tokio::io::AsyncRead;
use url::Url;

use crate::error::{RepoError, RepoResult};

/// URI scheme of repositories addressed directly in a bucket.
pub const URI_SCHEME: &str = "oss";

/// Application soft limit on the total size of an object's attributes.
///
/// Above it, chart attributes are left off entirely rather than truncated.
pub const METADATA_SOFT_LIMIT_BYTES: usize = 1900;

/// Attribute holding the chart metadata as compact JSON.
pub const META_CHART_METADATA: &str = "chart-metadata";

/// Attribute holding the chart digest.
pub const META_CHART_DIGEST: &str = "chart-digest";

/// Content type used when uploading chart archives.
pub const CHART_CONTENT_TYPE: &str = "application/gzip";

/// Object attributes (user metadata) as returned by `head`.
pub type ObjectAttributes = HashMap<String, String>;

/// Streaming body of a stored object.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// One listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    /// Token for the next page; `None` (or empty) when this was the last one.
    pub next_token: Option<String>,
}

/// Options for [`BlobStore::put`].
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub attributes: ObjectAttributes,
    pub content_type: Option<String>,
}

/// Minimal object storage interface.
///
/// Implementations report a missing bucket as [`RepoError::BucketNotFound`]
/// and a missing object as [`RepoError::ObjectNotFound`]; everything else is
/// a [`RepoError::Storage`] error.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// List objects under `prefix`, starting after the page `token` points at.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<&str>,
    ) -> RepoResult<ListPage>;

    /// Attributes of an object.
    async fn head(&self, bucket: &str, key: &str) -> RepoResult<ObjectAttributes>;

    /// Body of an object.
    async fn get(&self, bucket: &str, key: &str) -> RepoResult<ObjectReader>;

    async fn put(&self, bucket: &str, key: &str, body: Bytes, options: PutOptions)
        -> RepoResult<()>;

    /// Delete several objects; keys that do not exist are ignored.
    async fn delete_many(&self, bucket: &str, keys: &[String]) -> RepoResult<()>;

    async fn exists(&self, bucket: &str, key: &str) -> RepoResult<bool> {
        match self.head(bucket, key).await {
            Ok(_) => Ok(true),
            Err(RepoError::ObjectNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Split `oss://bucket/some/key` into `("bucket", "some/key")`.
pub fn parse_uri(uri: &str) -> RepoResult<(String, String)> {
    let prefix = format!("{URI_SCHEME}://");
    if !uri.starts_with(&prefix) {
        return Err(RepoError::InvalidUri(format!(
            "uri {uri} protocol is not {URI_SCHEME}"
        )));
    }

    let url = Url::parse(uri).map_err(|e| RepoError::InvalidUri(format!("parse uri {uri}: {e}")))?;
    let bucket = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| RepoError::InvalidUri(format!("uri {uri} has no bucket")))?;
    let key = url.path().trim_start_matches('/').to_string();
    Ok((bucket.to_string(), key))
}

/// Chart attributes to attach at upload time.
///
/// Empty when the attributes would exceed [`METADATA_SOFT_LIMIT_BYTES`].
pub fn assemble_object_metadata(chart_meta: &str, chart_digest: &str) -> ObjectAttributes {
    let meta = HashMap::from([
        (META_CHART_METADATA.to_string(), chart_meta.to_string()),
        (META_CHART_DIGEST.to_string(), chart_digest.to_string()),
    ]);
    if object_metadata_size(&meta) > METADATA_SOFT_LIMIT_BYTES {
        return ObjectAttributes::new();
    }
    meta
}

/// Total byte length of all attribute keys and values.
pub fn object_metadata_size(meta: &ObjectAttributes) -> usize {
    meta.iter().map(|(k, v)| k.len() + v.len()).sum()
}

/// Look up an attribute ignoring key case; stores may re-case keys.
pub fn metadata_value<'a>(meta: &'a ObjectAttributes, key: &str) -> Option<&'a str> {
    if let Some(v) = meta.get(key) {
        return Some(v.as_str());
    }
    meta.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

/// Cut one page out of a key-sorted listing.
///
/// The continuation token is the last key of the previous page.
pub(crate) fn paginate<I>(objects: I, prefix: &str, token: Option<&str>, page_size: usize) -> ListPage
where
    I: IntoIterator<Item = ObjectSummary>,
{
    let page_size = page_size.max(1);
    let mut remaining = objects
        .into_iter()
        .filter(|o| o.key.starts_with(prefix))
        .filter(|o| token.map_or(true, |t| o.key.as_str() > t))
        .peekable();

    let objects: Vec<ObjectSummary> = remaining.by_ref().take(page_size).collect();
    let next_token = match (remaining.peek(), objects.last()) {
        (Some(_), Some(last)) => Some(last.key.clone()),
        _ => None,
    };
    ListPage {
        objects,
        next_token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uri() {
        assert_eq!(
            parse_uri("oss://bucket/charts/stable").unwrap(),
            ("bucket".to_string(), "charts/stable".to_string())
        );
        assert_eq!(
            parse_uri("oss://bucket").unwrap(),
            ("bucket".to_string(), String::new())
        );
        assert!(matches!(
            parse_uri("s3://bucket/charts"),
            Err(RepoError::InvalidUri(_))
        ));
        assert!(matches!(parse_uri("charts"), Err(RepoError::InvalidUri(_))));
    }

    #[test]
    fn test_assemble_object_metadata_within_limit() {
        let meta = assemble_object_metadata(r#"{"name":"app"}"#, "abc");
        assert_eq!(meta.len(), 2);
        assert_eq!(meta[META_CHART_DIGEST], "abc");
    }

    #[test]
    fn test_assemble_object_metadata_over_limit_is_dropped() {
        let big = "x".repeat(METADATA_SOFT_LIMIT_BYTES);
        assert!(assemble_object_metadata(&big, "abc").is_empty());

        // Exactly at the limit still fits.
        let fits = "x".repeat(
            METADATA_SOFT_LIMIT_BYTES - META_CHART_METADATA.len() - META_CHART_DIGEST.len() - 3,
        );
        assert_eq!(assemble_object_metadata(&fits, "abc").len(), 2);
    }

    #[test]
    fn test_metadata_value_ignores_case() {
        let meta = HashMap::from([
            ("Chart-Metadata".to_string(), "{}".to_string()),
            ("chart-digest".to_string(), "abc".to_string()),
        ]);
        assert_eq!(metadata_value(&meta, META_CHART_METADATA), Some("{}"));
        assert_eq!(metadata_value(&meta, META_CHART_DIGEST), Some("abc"));
        assert_eq!(metadata_value(&meta, "missing"), None);
    }

    #[test]
    fn test_paginate() {
        let objects: Vec<ObjectSummary> = ["a/1", "a/2", "a/3", "b/1"]
            .iter()
            .map(|k| ObjectSummary {
                key: k.to_string(),
                size: 1,
            })
            .collect();

        let first = paginate(objects.clone(), "a/", None, 2);
        assert_eq!(first.objects.len(), 2);
        assert_eq!(first.next_token.as_deref(), Some("a/2"));

        let second = paginate(objects.clone(), "a/", first.next_token.as_deref(), 2);
        assert_eq!(second.objects[0].key, "a/3");
        assert_eq!(second.next_token, None);
    }
}
