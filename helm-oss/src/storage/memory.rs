//! In-process object store.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{paginate, BlobStore, ListPage, ObjectAttributes, ObjectReader, ObjectSummary, PutOptions};
use crate::error::{RepoError, RepoResult};

const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    attributes: ObjectAttributes,
    content_type: Option<String>,
}

type Buckets = BTreeMap<String, BTreeMap<String, StoredObject>>;

/// Object store kept entirely in memory.
///
/// Buckets have to be created up front, like in a real store. Listing pages
/// are small by default only if asked to via [`MemoryStore::with_page_size`].
#[derive(Debug)]
pub struct MemoryStore {
    buckets: RwLock<Buckets>,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(BTreeMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_bucket(self, name: &str) -> Self {
        self.create_bucket(name);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn create_bucket(&self, name: &str) {
        if let Ok(mut buckets) = self.buckets.write() {
            buckets.entry(name.to_string()).or_default();
        }
    }

    /// Raw bytes of an object, if present.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        let buckets = self.buckets.read().ok()?;
        buckets.get(bucket)?.get(key).map(|o| o.data.clone())
    }

    /// Content type an object was stored with.
    pub fn content_type(&self, bucket: &str, key: &str) -> Option<String> {
        let buckets = self.buckets.read().ok()?;
        buckets.get(bucket)?.get(key)?.content_type.clone()
    }

    /// All keys in a bucket, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .read()
            .ok()
            .and_then(|b| b.get(bucket).map(|objects| objects.keys().cloned().collect()))
            .unwrap_or_default()
    }

    fn read(&self) -> RepoResult<RwLockReadGuard<'_, Buckets>> {
        self.buckets
            .read()
            .map_err(|e| RepoError::storage("memory store lock", e))
    }

    fn write(&self) -> RepoResult<RwLockWriteGuard<'_, Buckets>> {
        self.buckets
            .write()
            .map_err(|e| RepoError::storage("memory store lock", e))
    }
}

fn bucket_not_found(bucket: &str) -> RepoError {
    RepoError::BucketNotFound(bucket.to_string())
}

fn object_not_found(bucket: &str, key: &str) -> RepoError {
    RepoError::ObjectNotFound(format!("{bucket}/{key}"))
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<&str>,
    ) -> RepoResult<ListPage> {
        let buckets = self.read()?;
        let objects = buckets.get(bucket).ok_or_else(|| bucket_not_found(bucket))?;
        let summaries = objects.iter().map(|(key, o)| ObjectSummary {
            key: key.clone(),
            size: o.data.len() as u64,
        });
        Ok(paginate(summaries, prefix, token, self.page_size))
    }

    async fn head(&self, bucket: &str, key: &str) -> RepoResult<ObjectAttributes> {
        let buckets = self.read()?;
        let objects = buckets.get(bucket).ok_or_else(|| bucket_not_found(bucket))?;
        objects
            .get(key)
            .map(|o| o.attributes.clone())
            .ok_or_else(|| object_not_found(bucket, key))
    }

    async fn get(&self, bucket: &str, key: &str) -> RepoResult<ObjectReader> {
        let buckets = self.read()?;
        let objects = buckets.get(bucket).ok_or_else(|| bucket_not_found(bucket))?;
        let data = objects
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| object_not_found(bucket, key))?;
        Ok(Box::pin(Cursor::new(data)))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        options: PutOptions,
    ) -> RepoResult<()> {
        let mut buckets = self.write()?;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| bucket_not_found(bucket))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                data: body,
                attributes: options.attributes,
                content_type: options.content_type,
            },
        );
        Ok(())
    }

    async fn delete_many(&self, bucket: &str, keys: &[String]) -> RepoResult<()> {
        let mut buckets = self.write()?;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| bucket_not_found(bucket))?;
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_put_get_head() {
        let store = MemoryStore::new().with_bucket("charts");
        let options = PutOptions {
            attributes: ObjectAttributes::from([("chart-digest".to_string(), "abc".to_string())]),
            content_type: Some("application/gzip".to_string()),
        };
        store
            .put("charts", "app.tgz", Bytes::from_static(b"data"), options)
            .await
            .unwrap();

        let mut body = Vec::new();
        store
            .get("charts", "app.tgz")
            .await
            .unwrap()
            .read_to_end(&mut body)
            .await
            .unwrap();
        assert_eq!(body, b"data");
        assert_eq!(store.head("charts", "app.tgz").await.unwrap()["chart-digest"], "abc");
        assert_eq!(
            store.content_type("charts", "app.tgz").as_deref(),
            Some("application/gzip")
        );
        assert!(store.exists("charts", "app.tgz").await.unwrap());
        assert!(!store.exists("charts", "other.tgz").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_bucket_and_object() {
        let store = MemoryStore::new().with_bucket("charts");
        assert!(matches!(
            store.head("nope", "a").await,
            Err(RepoError::BucketNotFound(_))
        ));
        assert!(matches!(
            store.get("charts", "a").await,
            Err(RepoError::ObjectNotFound(_))
        ));
        assert!(matches!(
            store.exists("nope", "a").await,
            Err(RepoError::BucketNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_pages_through_continuation_tokens() {
        let store = MemoryStore::new().with_bucket("charts").with_page_size(2);
        for key in ["repo/a.tgz", "repo/b.tgz", "repo/c.tgz", "other/d.tgz"] {
            store
                .put("charts", key, Bytes::from_static(b"x"), PutOptions::default())
                .await
                .unwrap();
        }

        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = store
                .list_page("charts", "repo/", token.as_deref())
                .await
                .unwrap();
            keys.extend(page.objects.into_iter().map(|o| o.key));
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        assert_eq!(keys, vec!["repo/a.tgz", "repo/b.tgz", "repo/c.tgz"]);
    }

    #[tokio::test]
    async fn test_delete_many_ignores_missing_keys() {
        let store = MemoryStore::new().with_bucket("charts");
        store
            .put("charts", "a.tgz", Bytes::from_static(b"x"), PutOptions::default())
            .await
            .unwrap();
        store
            .delete_many("charts", &["a.tgz".to_string(), "a.tgz.prov".to_string()])
            .await
            .unwrap();
        assert!(store.keys("charts").is_empty());
    }
}
