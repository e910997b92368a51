//! Chart repository index (`index.yaml`).
//!
//! The index maps chart names to the published versions of each chart. It is
//! the only document the repository keeps besides the chart archives
//! themselves, and it is rewritten in full on every change.
//!
//! Ordering rules:
//!
//! - chart names are kept in a `BTreeMap`, so they are always sorted;
//! - versions of one chart are sorted newest-first by [`Index::sort_entries`],
//!   which [`Index::decode`] runs automatically. Mutations do not sort, so
//!   callers sort before encoding a document meant to be published.

mod codec;
mod mutate;

pub use mutate::chart_url;

use chrono::{DateTime, Utc};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::chart::ChartMetadata;
use crate::version::versions_match;

/// API version written at the top of every index document.
pub const INDEX_API_VERSION: &str = "v1";

/// File name of the index inside a repository.
pub const INDEX_FILE_NAME: &str = "index.yaml";

/// One published version of one chart.
///
/// Serialized flat: the chart metadata fields sit next to `urls`, `created`
/// and `digest`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartVersion {
    #[serde(flatten)]
    pub metadata: ChartMetadata,
    /// Download locations; the first one is the one deletes act on.
    pub urls: Vec<String>,
    /// Defaults to the Unix epoch when absent.
    pub created: DateTime<Utc>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub removed: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub digest: String,
}

impl ChartVersion {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn version(&self) -> &str {
        &self.metadata.version
    }
}

fn unix_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Entry keys read as literal text. A flattened struct would buffer them as
/// untyped values first, turning `version: 1.10` into the float `1.1` and a
/// bare hex digest into a number.
const TEXT_KEYS: [&str; 6] = ["name", "version", "appVersion", "kubeVersion", "digest", "created"];

impl ChartVersion {
    fn from_fields(mut fields: Map<String, Value>) -> serde_json::Result<Self> {
        let mut take = |key: &str| fields.remove(key).filter(|v| !v.is_null());
        let urls = take("urls").map(serde_json::from_value).transpose()?;
        let created = take("created").map(serde_json::from_value).transpose()?;
        let removed = take("removed").map(serde_json::from_value).transpose()?;
        let digest = take("digest").map(serde_json::from_value).transpose()?;

        Ok(Self {
            metadata: serde_json::from_value(Value::Object(fields))?,
            urls: urls.unwrap_or_default(),
            created: created.unwrap_or_else(unix_epoch),
            removed: removed.unwrap_or_default(),
            digest: digest.unwrap_or_default(),
        })
    }
}

impl<'de> Deserialize<'de> for ChartVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntryVisitor;

        impl<'de> Visitor<'de> for EntryVisitor {
            type Value = ChartVersion;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a chart version entry")
            }

            fn visit_map<A>(self, mut map: A) -> Result<ChartVersion, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut fields = Map::new();
                while let Some(key) = map.next_key::<String>()? {
                    let value = if TEXT_KEYS.contains(&key.as_str()) {
                        Value::String(map.next_value::<String>()?)
                    } else {
                        map.next_value::<Value>()?
                    };
                    fields.insert(key, value);
                }
                ChartVersion::from_fields(fields).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_map(EntryVisitor)
    }
}

fn default_api_version() -> String {
    INDEX_API_VERSION.to_string()
}

/// In-memory repository index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<ChartVersion>>,
    #[serde(default = "Utc::now")]
    pub generated: DateTime<Utc>,
    /// Top-level fields this tool does not interpret (`serverInfo`,
    /// `annotations`, ...), kept so a rewrite does not drop them.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for Index {
    fn default() -> Self {
        Self::new()
    }
}

impl Index {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            api_version: default_api_version(),
            entries: BTreeMap::new(),
            generated: Utc::now(),
            extra: BTreeMap::new(),
        }
    }

    /// Whether `name` has a version equal to `version`, either literally or
    /// semantically (`1.0` matches `1.0.0`).
    pub fn has(&self, name: &str, version: &str) -> bool {
        self.entries.get(name).is_some_and(|versions| {
            versions
                .iter()
                .any(|cv| cv.version() == version || versions_match(cv.version(), version))
        })
    }

    /// Versions published for `name`, if the chart is known.
    pub fn get(&self, name: &str) -> Option<&[ChartVersion]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    /// Total number of version entries across all charts.
    pub fn version_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}
