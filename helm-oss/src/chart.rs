//! Chart archives and their metadata.
//!
//! A chart archive is a gzip-compressed tarball whose top-level directory
//! holds a `Chart.yaml` descriptor. Only the descriptor is read here; the
//! rest of the archive is opaque to the repository.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::{Component, Path};
use tracing::debug;

use crate::error::{RepoError, RepoResult};
use crate::version::parse_version;

/// Chart API version assumed when a descriptor does not declare one.
pub const DEFAULT_API_VERSION: &str = "v1";

const CHART_FILE: &str = "Chart.yaml";

/// A chart maintainer as listed in `Chart.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Maintainer {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

/// Chart descriptor (`Chart.yaml`), carried through the index unchanged.
///
/// Fields the repository never interprets are still preserved: anything not
/// listed here lands in `extra` and is written back out as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(
        default,
        deserialize_with = "scalar_text",
        skip_serializing_if = "String::is_empty"
    )]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(
        default,
        deserialize_with = "scalar_text",
        skip_serializing_if = "String::is_empty"
    )]
    pub app_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub home: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kube_version: String,
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub chart_type: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deprecated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<Maintainer>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ChartMetadata {
    /// Serialize to the compact JSON form stored as an object attribute.
    pub fn to_json(&self) -> RepoResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the compact JSON form produced by [`ChartMetadata::to_json`].
    pub fn from_json(raw: &str) -> RepoResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| RepoError::InvalidMetadata(format!("unserialize chart metadata: {e}")))
    }

    /// Check the descriptor the way Helm does before indexing it.
    pub fn validate(&self) -> RepoResult<()> {
        if self.api_version.is_empty() {
            return Err(RepoError::InvalidMetadata(
                "chart.metadata.apiVersion is required".to_string(),
            ));
        }
        if self.name.is_empty() {
            return Err(RepoError::InvalidMetadata(
                "chart.metadata.name is required".to_string(),
            ));
        }
        if self.version.is_empty() {
            return Err(RepoError::InvalidMetadata(
                "chart.metadata.version is required".to_string(),
            ));
        }
        parse_version(&self.version).map_err(|_| {
            RepoError::InvalidMetadata(format!(
                "chart.metadata.version {:?} is invalid",
                self.version
            ))
        })?;
        if !matches!(self.chart_type.as_str(), "" | "application" | "library") {
            return Err(RepoError::InvalidMetadata(format!(
                "chart.metadata.type {:?} must be application or library",
                self.chart_type
            )));
        }
        Ok(())
    }
}

/// Keep the literal text of a scalar that may be written unquoted.
///
/// `version: 1.10` must stay `"1.10"`; resolving it as a float first would
/// yield `1.1`. YAML hands the raw scalar to `deserialize_str`, numbers from
/// other formats are printed as-is.
fn scalar_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    struct ScalarText;

    impl<'de> Visitor<'de> for ScalarText {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a string or a number")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<String, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<String, E> {
            Ok(v.to_string())
        }
    }

    deserializer.deserialize_str(ScalarText)
}

/// A loaded chart.
///
/// Kept as a trait so another chart format can be added without touching
/// the repository workflows.
pub trait Chart: Send + Sync {
    /// Chart name, e.g. `"foo"`.
    fn name(&self) -> &str;

    /// Chart version, e.g. `"0.1.0"`.
    fn version(&self) -> &str;

    fn metadata(&self) -> &ChartMetadata;
}

/// Chart in the Helm v3 archive layout.
#[derive(Debug, Clone)]
pub struct ChartV3 {
    metadata: ChartMetadata,
}

impl ChartV3 {
    pub fn from_metadata(metadata: ChartMetadata) -> Self {
        Self { metadata }
    }
}

impl Chart for ChartV3 {
    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn version(&self) -> &str {
        &self.metadata.version
    }

    fn metadata(&self) -> &ChartMetadata {
        &self.metadata
    }
}

/// Load a chart from a `.tgz` file on disk.
pub async fn load_chart<P: AsRef<Path>>(path: P) -> RepoResult<ChartV3> {
    let path = path.as_ref();
    if tokio::fs::metadata(path).await?.is_dir() {
        return Err(RepoError::Archive(format!(
            "cannot load a directory as a chart archive: {}",
            path.display()
        )));
    }
    let data = tokio::fs::read(path).await?;
    load_archive(data.as_slice())
        .map_err(|e| RepoError::Archive(format!("failed to load chart file {}: {e}", path.display())))
}

/// Load a chart from a gzip tarball stream.
///
/// Reading stops as soon as the top-level `Chart.yaml` has been parsed.
pub fn load_archive<R: Read>(reader: R) -> RepoResult<ChartV3> {
    let decoder = flate2::read::GzDecoder::new(reader);
    let mut archive = tar::Archive::new(decoder);

    let entries = archive
        .entries()
        .map_err(|e| RepoError::Archive(format!("read archive entries: {e}")))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| RepoError::Archive(format!("read archive entry: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| RepoError::Archive(format!("read entry path: {e}")))?
            .into_owned();

        if !is_top_level_chart_file(&path) {
            continue;
        }

        let mut raw = String::new();
        entry
            .read_to_string(&mut raw)
            .map_err(|e| RepoError::Archive(format!("read {}: {e}", path.display())))?;

        let mut metadata: ChartMetadata = serde_yaml_ng::from_str(&raw)
            .map_err(|e| RepoError::InvalidMetadata(format!("parse {}: {e}", path.display())))?;
        if metadata.api_version.is_empty() {
            metadata.api_version = DEFAULT_API_VERSION.to_string();
        }
        metadata.validate()?;

        debug!(chart = %metadata.name, version = %metadata.version, "Loaded chart descriptor");
        return Ok(ChartV3::from_metadata(metadata));
    }

    Err(RepoError::Archive(format!("{CHART_FILE} file is missing")))
}

/// `<chart>/Chart.yaml`, ignoring `./` components.
fn is_top_level_chart_file(path: &Path) -> bool {
    let parts: Vec<_> = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    matches!(parts.as_slice(), [Component::Normal(_), Component::Normal(file)] if *file == CHART_FILE)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    /// Build an in-memory chart archive holding `<name>/Chart.yaml`.
    pub(crate) fn chart_archive(chart_yaml: &str, dir: &str) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let mut header = tar::Header::new_gnu();
        header.set_size(chart_yaml.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{dir}/Chart.yaml"), chart_yaml.as_bytes())
            .unwrap();

        let values = b"replicaCount: 1\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(values.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{dir}/values.yaml"), &values[..])
            .unwrap();

        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_load_archive_reads_descriptor() {
        let data = chart_archive(
            "apiVersion: v2\nname: app\nversion: 1.0.0\ndescription: demo\nappVersion: 2.3\n",
            "app",
        );
        let chart = load_archive(data.as_slice()).unwrap();
        assert_eq!(chart.name(), "app");
        assert_eq!(chart.version(), "1.0.0");
        assert_eq!(chart.metadata().api_version, "v2");
        assert_eq!(chart.metadata().app_version, "2.3");
        assert_eq!(chart.metadata().description, "demo");
    }

    #[test]
    fn test_load_archive_keeps_unquoted_versions_literal() {
        let data = chart_archive(
            "apiVersion: v2\nname: app\nversion: 1.10\nappVersion: 1.20\n",
            "app",
        );
        let chart = load_archive(data.as_slice()).unwrap();
        assert_eq!(chart.version(), "1.10");
        assert_eq!(chart.metadata().app_version, "1.20");

        let data = chart_archive("name: app\nversion: 2\nappVersion: 7\n", "app");
        let chart = load_archive(data.as_slice()).unwrap();
        assert_eq!(chart.version(), "2");
        assert_eq!(chart.metadata().app_version, "7");
    }

    #[test]
    fn test_load_archive_defaults_api_version() {
        let data = chart_archive("name: app\nversion: 0.1.0\n", "app");
        let chart = load_archive(data.as_slice()).unwrap();
        assert_eq!(chart.metadata().api_version, DEFAULT_API_VERSION);
    }

    #[test]
    fn test_load_archive_ignores_nested_chart_files() {
        let data = chart_archive("name: sub\nversion: 0.1.0\n", "app/charts/sub");
        let err = load_archive(data.as_slice()).unwrap_err();
        assert!(matches!(err, RepoError::Archive(_)));
    }

    #[test]
    fn test_load_archive_rejects_non_gzip() {
        let err = load_archive(&b"# README\nnot a chart"[..]).unwrap_err();
        assert!(matches!(err, RepoError::Archive(_)));
    }

    #[test]
    fn test_load_archive_rejects_invalid_version() {
        let data = chart_archive("name: app\nversion: latest\n", "app");
        let err = load_archive(data.as_slice()).unwrap_err();
        assert!(matches!(err, RepoError::InvalidMetadata(_)));
    }

    #[test]
    fn test_metadata_json_preserves_unknown_fields() {
        let raw = r#"{"name":"app","version":"1.0.0","apiVersion":"v2","condition":"app.enabled","tags":"web"}"#;
        let metadata = ChartMetadata::from_json(raw).unwrap();
        assert_eq!(metadata.extra.get("condition"), Some(&Value::from("app.enabled")));

        let back: Value = serde_json::from_str(&metadata.to_json().unwrap()).unwrap();
        assert_eq!(back["condition"], "app.enabled");
        assert_eq!(back["tags"], "web");
        assert!(back.get("keywords").is_none());
    }

    #[test]
    fn test_validate_chart_type() {
        let mut metadata = ChartMetadata {
            name: "app".into(),
            version: "1.0.0".into(),
            api_version: "v2".into(),
            ..Default::default()
        };
        assert!(metadata.validate().is_ok());
        metadata.chart_type = "library".into();
        assert!(metadata.validate().is_ok());
        metadata.chart_type = "plugin".into();
        assert!(metadata.validate().is_err());
    }
}
