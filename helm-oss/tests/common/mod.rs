//! Common test utilities and helpers
//!
//! Every test gets its own temporary directory holding a [`LocalStore`] root
//! with one bucket, plus a Helm home (`repositories.yaml` and cache).

#![allow(dead_code)]

use anyhow::Result;
use flate2::write::GzEncoder;
use flate2::Compression;
use helm_oss::{Deadline, HelmSettings, Index, LocalStore, OpsContext, Storage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub const BUCKET: &str = "bucket";
pub const REPO_URI: &str = "oss://bucket/charts";

pub struct TestRepo {
    pub temp_dir: TempDir,
    pub ctx: OpsContext,
}

impl TestRepo {
    pub async fn new() -> Result<Self> {
        Self::with_page_size(1000).await
    }

    pub async fn with_page_size(page_size: usize) -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let store = LocalStore::new(temp_dir.path().join("store")).with_page_size(page_size);
        store.create_bucket(BUCKET).await?;

        let helm_home = temp_dir.path().join("helm");
        std::fs::create_dir_all(&helm_home)?;
        let helm = HelmSettings {
            repository_config: helm_home.join("repositories.yaml"),
            repository_cache: helm_home.join("cache"),
        };
        let storage = Storage::new(Arc::new(store), Deadline::none());
        Ok(Self {
            temp_dir,
            ctx: OpsContext::new(storage, helm),
        })
    }

    /// Path of an object inside the bucket directory.
    pub fn object_path(&self, key: &str) -> PathBuf {
        self.temp_dir.path().join("store").join(BUCKET).join(key)
    }

    pub fn index_bytes(&self) -> Vec<u8> {
        std::fs::read(self.object_path("charts/index.yaml")).unwrap()
    }

    pub fn index(&self) -> Index {
        Index::decode(&self.index_bytes()).unwrap()
    }

    /// Drop a file straight into the bucket, bypassing the plugin.
    pub fn put_raw(&self, key: &str, data: &[u8]) {
        let path = self.object_path(key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    /// Write a chart archive into the scratch directory and return its path.
    pub fn write_chart(&self, name: &str, version: &str, description: &str) -> PathBuf {
        let dir = self.temp_dir.path().join("work");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{name}-{version}.tgz"));
        std::fs::write(&path, chart_archive(name, version, description)).unwrap();
        path
    }

    /// Register `name` in the Helm repositories file, pointing at the test repo.
    pub fn register(&self, name: &str) {
        std::fs::write(
            &self.ctx.helm.repository_config,
            format!("apiVersion: \"\"\nrepositories:\n- name: {name}\n  url: {REPO_URI}\n"),
        )
        .unwrap();
    }

    pub fn cache_file(&self, name: &str) -> PathBuf {
        self.ctx
            .helm
            .repository_cache
            .join(format!("{name}-index.yaml"))
    }
}

/// Gzipped tarball holding `<name>/Chart.yaml` and `<name>/values.yaml`.
pub fn chart_archive(name: &str, version: &str, description: &str) -> Vec<u8> {
    let chart_yaml =
        format!("apiVersion: v2\nname: {name}\nversion: {version}\ndescription: {description}\n");
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    append(&mut builder, &format!("{name}/Chart.yaml"), chart_yaml.as_bytes());
    append(&mut builder, &format!("{name}/values.yaml"), b"replicaCount: 1\n");
    builder.into_inner().unwrap().finish().unwrap()
}

fn append<W: std::io::Write>(builder: &mut tar::Builder<W>, path: &str, data: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, path, data).unwrap();
}

pub fn file_name(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}
