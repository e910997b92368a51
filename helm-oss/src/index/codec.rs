//! YAML encoding, ordering and time stamping of the index document.

use chrono::Utc;
use std::cmp::Reverse;
use std::path::Path;
use tracing::debug;

use super::Index;
use crate::error::{RepoError, RepoResult};
use crate::version::parse_version;

impl Index {
    /// Parse an index document.
    ///
    /// The result is always sorted, whatever order the document used. A
    /// blank document decodes as an empty index.
    pub fn decode(data: &[u8]) -> RepoResult<Self> {
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::new());
        }
        let mut index: Index =
            serde_yaml_ng::from_slice(data).map_err(|e| RepoError::MalformedIndex(e.to_string()))?;
        index.sort_entries();
        Ok(index)
    }

    /// Serialize the index as it currently is.
    ///
    /// Neither sorts nor stamps; see [`Index::sort_entries`] and
    /// [`Index::update_generated_time`]. Keys come out in alphabetical order,
    /// matching the documents Helm itself writes.
    pub fn encode(&self) -> RepoResult<Vec<u8>> {
        let value = serde_json::to_value(self)?;
        Ok(serde_yaml_ng::to_string(&value)?.into_bytes())
    }

    /// Sort every chart's versions newest-first.
    ///
    /// Versions that are not valid semantic versions sort after all valid
    /// ones, ordered by their raw string. Never panics on bad input.
    pub fn sort_entries(&mut self) {
        for versions in self.entries.values_mut() {
            versions.sort_by_cached_key(|cv| match parse_version(cv.version()) {
                Ok(v) => (false, Reverse(Some(v)), Reverse(cv.version().to_string())),
                Err(_) => (true, Reverse(None), Reverse(cv.version().to_string())),
            });
        }
    }

    /// Stamp the generation time with the current UTC time.
    pub fn update_generated_time(&mut self) {
        self.generated = Utc::now();
    }

    /// Sort, stamp and encode: the form every published index takes.
    pub fn finalize(&mut self) -> RepoResult<Vec<u8>> {
        self.sort_entries();
        self.update_generated_time();
        self.encode()
    }

    /// Write the encoded index to a local file, creating parent directories.
    pub async fn write_file<P: AsRef<Path>>(&self, path: P) -> RepoResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, self.encode()?).await?;
        debug!(path = %path.display(), "Wrote index file");
        Ok(())
    }

    /// Load an index from a local file.
    pub async fn load_file<P: AsRef<Path>>(path: P) -> RepoResult<Self> {
        let data = tokio::fs::read(path.as_ref()).await?;
        Self::decode(&data)
    }
}
