//! Index mutations: add, add-or-replace, delete.

use chrono::Utc;
use std::path::Path;
use tracing::debug;
use url::Url;

use super::{ChartVersion, Index};
use crate::chart::{ChartMetadata, DEFAULT_API_VERSION};
use crate::error::{RepoError, RepoResult};
use crate::version::{parse_version, same_version};

/// Location recorded for a chart archive.
///
/// Without a base URL the filename is used verbatim. Otherwise the archive's
/// base name is appended to the base URL's path; a base that does not parse
/// as a URL is joined as a plain path instead.
pub fn chart_url(filename: &str, base_url: &str) -> String {
    if base_url.is_empty() {
        return filename.to_string();
    }

    let file = Path::new(filename)
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());

    match Url::parse(base_url) {
        Ok(mut url) => {
            let path = format!("{}/{}", url.path().trim_end_matches('/'), file);
            url.set_path(&path);
            url.to_string()
        }
        Err(_) => format!("{}/{}", base_url.trim_end_matches('/'), file),
    }
}

fn new_entry(metadata: ChartMetadata, filename: &str, base_url: &str, digest: &str) -> ChartVersion {
    ChartVersion {
        metadata,
        urls: vec![chart_url(filename, base_url)],
        created: Utc::now(),
        removed: false,
        digest: digest.to_string(),
    }
}

impl Index {
    /// Append a chart version without looking for an existing one.
    ///
    /// Fails with [`RepoError::InvalidMetadata`] when the metadata cannot be
    /// indexed (missing name, bad version, unknown chart type).
    pub fn add(
        &mut self,
        metadata: &ChartMetadata,
        filename: &str,
        base_url: &str,
        digest: &str,
    ) -> RepoResult<()> {
        let mut metadata = metadata.clone();
        if metadata.api_version.is_empty() {
            metadata.api_version = DEFAULT_API_VERSION.to_string();
        }
        metadata
            .validate()
            .map_err(|e| RepoError::InvalidMetadata(format!("validate failed for {filename}: {e}")))?;

        let name = metadata.name.clone();
        let entry = new_entry(metadata, filename, base_url, digest);
        debug!(chart = %name, version = %entry.version(), url = %entry.urls[0], "Adding chart to index");
        self.entries.entry(name).or_default().push(entry);
        Ok(())
    }

    /// Add a chart version, replacing a semantically equal one in place.
    ///
    /// When the chart already has entries, every stored version is parsed on
    /// the way; a single unparseable one fails the whole call with
    /// [`RepoError::InvalidVersion`]. A replaced entry keeps its list
    /// position and its original `created` time.
    pub fn add_or_replace(
        &mut self,
        metadata: &ChartMetadata,
        filename: &str,
        base_url: &str,
        digest: &str,
    ) -> RepoResult<()> {
        let mut entry = new_entry(metadata.clone(), filename, base_url, digest);

        let Some(versions) = self.entries.get_mut(&metadata.name) else {
            self.entries.insert(metadata.name.clone(), vec![entry]);
            return Ok(());
        };

        let wanted = parse_version(&metadata.version)?;
        for existing in versions.iter_mut() {
            let stored = parse_version(existing.version())?;
            if same_version(&wanted, &stored) {
                debug!(
                    chart = %metadata.name,
                    version = %metadata.version,
                    replaced = %existing.version(),
                    "Replacing chart version in index"
                );
                entry.created = existing.created;
                *existing = entry;
                return Ok(());
            }
        }

        versions.push(entry);
        Ok(())
    }

    /// Remove the entry whose version string is exactly `version`.
    ///
    /// Matching is literal: deleting `1.0` leaves an entry stored as `1.0.0`
    /// alone. Returns the entry's first URL, or an empty string when it had
    /// none. The chart keeps its key even when its last version goes.
    pub fn delete(&mut self, name: &str, version: &str) -> RepoResult<String> {
        let not_found = || RepoError::ChartNotFound {
            name: name.to_string(),
            version: version.to_string(),
        };

        let versions = self.entries.get_mut(name).ok_or_else(not_found)?;
        let position = versions
            .iter()
            .position(|cv| cv.version() == version)
            .ok_or_else(not_found)?;

        let removed = versions.remove(position);
        debug!(chart = %name, version = %version, "Removed chart version from index");
        Ok(removed.urls.into_iter().next().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn metadata(name: &str, version: &str) -> ChartMetadata {
        ChartMetadata {
            name: name.to_string(),
            version: version.to_string(),
            api_version: "v2".to_string(),
            ..Default::default()
        }
    }

    fn digests(index: &Index, name: &str) -> Vec<String> {
        index
            .get(name)
            .unwrap_or_default()
            .iter()
            .map(|cv| cv.digest.clone())
            .collect()
    }

    #[test]
    fn test_chart_url_without_base() {
        assert_eq!(chart_url("app-1.0.0.tgz", ""), "app-1.0.0.tgz");
        assert_eq!(chart_url("dist/app-1.0.0.tgz", ""), "dist/app-1.0.0.tgz");
    }

    #[test]
    fn test_chart_url_joins_base_name() {
        assert_eq!(
            chart_url("dist/app-1.0.0.tgz", "https://charts.example.com/stable/"),
            "https://charts.example.com/stable/app-1.0.0.tgz"
        );
        assert_eq!(
            chart_url("app-1.0.0.tgz", "oss://bucket/charts"),
            "oss://bucket/charts/app-1.0.0.tgz"
        );
    }

    #[test]
    fn test_chart_url_falls_back_to_path_join() {
        assert_eq!(chart_url("app-1.0.0.tgz", "charts/"), "charts/app-1.0.0.tgz");
    }

    #[test]
    fn test_add_then_has() {
        let mut index = Index::new();
        index
            .add(&metadata("app", "1.0.0"), "app-1.0.0.tgz", "", "abc")
            .unwrap();
        assert!(index.has("app", "1.0.0"));
        let entry = &index.get("app").unwrap()[0];
        assert_eq!(entry.urls, vec!["app-1.0.0.tgz"]);
        assert_eq!(entry.digest, "abc");
    }

    #[test]
    fn test_add_appends_duplicates() {
        let mut index = Index::new();
        index.add(&metadata("app", "1.0.0"), "a.tgz", "", "one").unwrap();
        index.add(&metadata("app", "1.0.0"), "a.tgz", "", "two").unwrap();
        assert_eq!(digests(&index, "app"), vec!["one", "two"]);
    }

    #[test]
    fn test_add_defaults_api_version() {
        let mut index = Index::new();
        let mut md = metadata("app", "1.0.0");
        md.api_version.clear();
        index.add(&md, "a.tgz", "", "one").unwrap();
        assert_eq!(index.get("app").unwrap()[0].metadata.api_version, "v1");
    }

    #[test]
    fn test_add_rejects_invalid_metadata() {
        let mut index = Index::new();
        let err = index.add(&metadata("", "1.0.0"), "a.tgz", "", "x").unwrap_err();
        assert!(matches!(err, RepoError::InvalidMetadata(_)));
        let err = index.add(&metadata("app", "oops"), "a.tgz", "", "x").unwrap_err();
        assert!(matches!(err, RepoError::InvalidMetadata(_)));
        assert!(index.entries.is_empty());
    }

    #[test]
    fn test_add_or_replace_new_chart() {
        let mut index = Index::new();
        index
            .add_or_replace(&metadata("app", "1.0.0"), "app-1.0.0.tgz", "", "abc")
            .unwrap();
        assert_eq!(digests(&index, "app"), vec!["abc"]);
    }

    #[test]
    fn test_add_or_replace_replaces_in_place() {
        let mut index = Index::new();
        index.add(&metadata("app", "2.0.0"), "app-2.0.0.tgz", "", "two").unwrap();
        index.add(&metadata("app", "1.0.0"), "app-1.0.0.tgz", "", "old").unwrap();
        index.add(&metadata("app", "0.5.0"), "app-0.5.0.tgz", "", "half").unwrap();
        let created = index.get("app").unwrap()[1].created;

        index
            .add_or_replace(&metadata("app", "1.0"), "app-1.0.tgz", "", "new")
            .unwrap();

        assert_eq!(digests(&index, "app"), vec!["two", "new", "half"]);
        let replaced = &index.get("app").unwrap()[1];
        assert_eq!(replaced.version(), "1.0");
        assert_eq!(replaced.urls, vec!["app-1.0.tgz"]);
        assert_eq!(replaced.created, created);
    }

    #[test]
    fn test_add_or_replace_appends_new_version() {
        let mut index = Index::new();
        index.add(&metadata("app", "1.0.0"), "a.tgz", "", "one").unwrap();
        index
            .add_or_replace(&metadata("app", "1.1.0"), "b.tgz", "", "two")
            .unwrap();
        assert_eq!(digests(&index, "app"), vec!["one", "two"]);
    }

    #[test]
    fn test_add_or_replace_rejects_bad_new_version() {
        let mut index = Index::new();
        index.add(&metadata("app", "1.0.0"), "a.tgz", "", "one").unwrap();
        let err = index
            .add_or_replace(&metadata("app", "latest"), "b.tgz", "", "two")
            .unwrap_err();
        assert!(matches!(err, RepoError::InvalidVersion { .. }));
        assert_eq!(digests(&index, "app"), vec!["one"]);
    }

    #[test]
    fn test_add_or_replace_blocked_by_corrupt_stored_version() {
        let mut index = Index::new();
        index.add(&metadata("app", "1.0.0"), "a.tgz", "", "one").unwrap();
        index.entries.get_mut("app").unwrap()[0].metadata.version = "broken".into();

        let err = index
            .add_or_replace(&metadata("app", "2.0.0"), "b.tgz", "", "two")
            .unwrap_err();
        match err {
            RepoError::InvalidVersion { version, .. } => assert_eq!(version, "broken"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(index.get("app").unwrap().len(), 1);
    }

    #[test]
    fn test_delete_returns_first_url() {
        let mut index = Index::new();
        index.add(&metadata("app", "1.0.0"), "app-1.0.0.tgz", "", "one").unwrap();
        index.add(&metadata("app", "2.0.0"), "app-2.0.0.tgz", "", "two").unwrap();
        index.add(&metadata("app", "3.0.0"), "app-3.0.0.tgz", "", "three").unwrap();

        let url = index.delete("app", "2.0.0").unwrap();
        assert_eq!(url, "app-2.0.0.tgz");
        assert_eq!(digests(&index, "app"), vec!["one", "three"]);
    }

    #[test]
    fn test_delete_last_version_keeps_empty_list() {
        let mut index = Index::new();
        index.add(&metadata("app", "1.0.0"), "app-1.0.0.tgz", "", "one").unwrap();
        index.delete("app", "1.0.0").unwrap();
        assert_eq!(index.get("app").map(<[_]>::len), Some(0));
        assert!(!index.has("app", "1.0.0"));
    }

    #[test]
    fn test_delete_without_urls_returns_empty() {
        let mut index = Index::new();
        index.add(&metadata("app", "1.0.0"), "a.tgz", "", "one").unwrap();
        index.entries.get_mut("app").unwrap()[0].urls.clear();
        assert_eq!(index.delete("app", "1.0.0").unwrap(), "");
    }

    #[test]
    fn test_delete_matches_exact_string_only() {
        let mut index = Index::new();
        index.add(&metadata("app", "1.0.0"), "a.tgz", "", "one").unwrap();
        let before = index.clone();

        let err = index.delete("app", "1.0").unwrap_err();
        assert!(matches!(err, RepoError::ChartNotFound { .. }));
        assert_eq!(index, before);

        let err = index.delete("missing", "1.0.0").unwrap_err();
        assert!(matches!(err, RepoError::ChartNotFound { .. }));
        assert_eq!(index, before);
    }
}
