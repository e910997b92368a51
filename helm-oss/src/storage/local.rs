//! Directory-backed object store.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<bucket>/<key>                       object bodies
//! <root>/.attributes/<bucket>/<key>.json      attributes and content type
//! ```
//!
//! A bucket is a directory that must already exist; objects are plain files,
//! so a bucket can be inspected or seeded with ordinary tools.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use super::{paginate, BlobStore, ListPage, ObjectAttributes, ObjectReader, ObjectSummary, PutOptions};
use crate::error::{RepoError, RepoResult};

const ATTRIBUTES_DIR: &str = ".attributes";
const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Sidecar {
    #[serde(default)]
    attributes: ObjectAttributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    page_size: usize,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory backing `bucket`.
    pub async fn create_bucket(&self, bucket: &str) -> RepoResult<()> {
        validate_bucket(bucket)?;
        tokio::fs::create_dir_all(self.root.join(bucket))
            .await
            .map_err(|e| RepoError::storage(format!("create bucket {bucket}"), e))
    }

    async fn bucket_dir(&self, bucket: &str) -> RepoResult<PathBuf> {
        validate_bucket(bucket)?;
        let dir = self.root.join(bucket);
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(RepoError::BucketNotFound(bucket.to_string())),
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                Err(RepoError::BucketNotFound(bucket.to_string()))
            }
            Err(e) => Err(RepoError::storage(format!("stat bucket {bucket}"), e)),
        }
    }

    async fn object_path(&self, bucket: &str, key: &str) -> RepoResult<PathBuf> {
        validate_key(key)?;
        Ok(self.bucket_dir(bucket).await?.join(key))
    }

    fn sidecar_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root
            .join(ATTRIBUTES_DIR)
            .join(bucket)
            .join(format!("{key}.json"))
    }

    async fn read_sidecar(&self, bucket: &str, key: &str) -> RepoResult<Sidecar> {
        let path = self.sidecar_path(bucket, key);
        match tokio::fs::read(&path).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(Sidecar::default()),
            Err(e) => Err(RepoError::storage(format!("read attributes {}", path.display()), e)),
        }
    }
}

fn validate_bucket(bucket: &str) -> RepoResult<()> {
    if bucket.is_empty() || bucket.starts_with('.') || bucket.contains(['/', '\\']) {
        return Err(RepoError::InvalidUri(format!("invalid bucket name {bucket:?}")));
    }
    Ok(())
}

/// Keys must stay inside their bucket directory.
fn validate_key(key: &str) -> RepoResult<()> {
    let escapes = key.contains('\\')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if escapes {
        return Err(RepoError::InvalidUri(format!("invalid object key {key:?}")));
    }
    Ok(())
}

async fn write_atomic(path: &Path, data: &[u8]) -> RepoResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| RepoError::storage(format!("create {}", parent.display()), e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".partial");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, data)
        .await
        .map_err(|e| RepoError::storage(format!("write {}", tmp.display()), e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| RepoError::storage(format!("rename {}", path.display()), e))
}

async fn remove_if_present(path: &Path) -> RepoResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
        Err(e) => Err(RepoError::storage(format!("delete {}", path.display()), e)),
    }
}

/// Deepest directory that `prefix` names in full; listing starts there.
fn listing_root(bucket_dir: &Path, prefix: &str) -> RepoResult<PathBuf> {
    match prefix.rfind('/') {
        Some(end) => {
            let dir = &prefix[..end];
            validate_key(dir)?;
            Ok(bucket_dir.join(dir))
        }
        None => Ok(bucket_dir.to_path_buf()),
    }
}

fn relative_key(bucket_dir: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(bucket_dir).ok()?;
    Some(
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
    )
}

/// Directories sort as `name/`, so a depth-first walk yields keys in
/// byte order (`a-c` before `a/b`).
fn walk_order(entry: &DirEntry) -> String {
    let mut name = entry.file_name().to_string_lossy().into_owned();
    if entry.file_type().is_dir() {
        name.push('/');
    }
    name
}

/// Whether the subtree under `dir` (ending in `/`) can hold a key that
/// matches `prefix` and sorts after `token`.
fn subtree_may_match(dir: &str, prefix: &str, token: Option<&str>) -> bool {
    let in_prefix = dir.starts_with(prefix) || prefix.starts_with(dir);
    let after_token = token.map_or(true, |t| t.starts_with(dir) || dir > t);
    in_prefix && after_token
}

/// Up to `limit` keys under `prefix` that sort after `token`, in key order.
fn list_keys(
    bucket_dir: &Path,
    prefix: &str,
    token: Option<&str>,
    limit: usize,
) -> RepoResult<Vec<ObjectSummary>> {
    let start = listing_root(bucket_dir, prefix)?;
    if !start.is_dir() {
        return Ok(Vec::new());
    }

    let walker = WalkDir::new(&start)
        .min_depth(1)
        .sort_by(|a, b| walk_order(a).cmp(&walk_order(b)))
        .into_iter()
        .filter_entry(|entry| {
            !entry.file_type().is_dir()
                || relative_key(bucket_dir, entry.path())
                    .is_some_and(|dir| subtree_may_match(&format!("{dir}/"), prefix, token))
        });

    let mut objects = Vec::new();
    for entry in walker {
        let entry =
            entry.map_err(|e| RepoError::storage(format!("list {}", start.display()), e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(key) = relative_key(bucket_dir, entry.path()) else {
            continue;
        };
        if key.ends_with(".partial")
            || !key.starts_with(prefix)
            || token.is_some_and(|t| key.as_str() <= t)
        {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or_default();
        objects.push(ObjectSummary { key, size });
        if objects.len() >= limit {
            break;
        }
    }
    Ok(objects)
}

#[async_trait]
impl BlobStore for LocalStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<&str>,
    ) -> RepoResult<ListPage> {
        let dir = self.bucket_dir(bucket).await?;
        let page_size = self.page_size.max(1);
        // One extra key tells whether another page follows.
        let (owned_prefix, owned_token) = (prefix.to_string(), token.map(str::to_string));
        let objects = tokio::task::spawn_blocking(move || {
            list_keys(&dir, &owned_prefix, owned_token.as_deref(), page_size + 1)
        })
        .await
        .map_err(|e| RepoError::storage("list task", e))??;
        debug!(bucket, prefix, listed = objects.len(), "Listed bucket");
        Ok(paginate(objects, prefix, token, page_size))
    }

    async fn head(&self, bucket: &str, key: &str) -> RepoResult<ObjectAttributes> {
        let path = self.object_path(bucket, key).await?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(RepoError::ObjectNotFound(format!("{bucket}/{key}"))),
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                return Err(RepoError::ObjectNotFound(format!("{bucket}/{key}")))
            }
            Err(e) => return Err(RepoError::storage(format!("head {bucket}/{key}"), e)),
        }
        Ok(self.read_sidecar(bucket, key).await?.attributes)
    }

    async fn get(&self, bucket: &str, key: &str) -> RepoResult<ObjectReader> {
        let path = self.object_path(bucket, key).await?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                Err(RepoError::ObjectNotFound(format!("{bucket}/{key}")))
            }
            Err(e) => Err(RepoError::storage(format!("get {bucket}/{key}"), e)),
        }
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        options: PutOptions,
    ) -> RepoResult<()> {
        let path = self.object_path(bucket, key).await?;
        write_atomic(&path, &body).await?;

        let sidecar_path = self.sidecar_path(bucket, key);
        if options.attributes.is_empty() && options.content_type.is_none() {
            remove_if_present(&sidecar_path).await?;
        } else {
            let sidecar = Sidecar {
                attributes: options.attributes,
                content_type: options.content_type,
            };
            write_atomic(&sidecar_path, &serde_json::to_vec(&sidecar)?).await?;
        }
        debug!(bucket, key, size = body.len(), "Stored object");
        Ok(())
    }

    async fn delete_many(&self, bucket: &str, keys: &[String]) -> RepoResult<()> {
        let dir = self.bucket_dir(bucket).await?;
        for key in keys {
            if let Err(e) = validate_key(key) {
                warn!(bucket, key = %key, "Skipping delete of invalid key: {}", e);
                continue;
            }
            remove_if_present(&dir.join(key)).await?;
            remove_if_present(&self.sidecar_path(bucket, key)).await?;
        }
        Ok(())
    }
}
