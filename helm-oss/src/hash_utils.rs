//! Cryptographic hashing utilities for chart digests

use sha2::{Digest, Sha256};
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use crate::error::RepoResult;

/// Calculate SHA256 hash of data.
///
/// Returns the digest as a lowercase hexadecimal string, the format Helm
/// stores in the `digest` field of an index entry.
///
/// # Examples
///
/// ```
/// # use helm_oss::hash_utils::sha256_hash;
/// let hash = sha256_hash(b"hello world");
/// assert_eq!(hash.len(), 64);
/// ```
pub fn sha256_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Calculate the SHA256 digest of a file on disk.
pub async fn digest_file<P: AsRef<Path>>(path: P) -> RepoResult<String> {
    let file = tokio::fs::File::open(path.as_ref()).await?;
    let mut reader = HashingReader::new(file);
    let mut sink = tokio::io::sink();
    tokio::io::copy(&mut reader, &mut sink).await?;
    Ok(reader.finalize())
}

/// Reader that hashes every byte passing through it.
///
/// Used where the same stream has to be both parsed and digested without a
/// second download: whatever the consumer reads is exactly what gets hashed.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    bytes_read: u64,
}

impl<R> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes_read: 0,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Hex digest of everything read so far.
    pub fn finalize(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

impl<R: AsyncRead + Unpin> HashingReader<R> {
    /// Read the remainder of the stream into memory, hashing it on the way.
    pub async fn read_all(&mut self) -> RepoResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for HashingReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let fresh = &buf.filled()[before..];
            this.hasher.update(fresh);
            this.bytes_read += fresh.len() as u64;
        }
        poll
    }
}
