//! # Helm chart repositories on object storage
//!
//! Keeps a Helm chart repository inside an object-storage bucket: chart
//! archives (plus optional `.prov` signatures) sit next to a single
//! `index.yaml` catalog, and this crate keeps that catalog consistent with
//! what the bucket holds.
//!
//! ## Key Modules
//!
//! - [`index`]: the catalog model, its YAML codec and the add / replace /
//!   delete mutations
//! - [`scanner`]: rebuilds an index from the charts found in a bucket
//! - [`storage`]: the [`storage::BlobStore`] seam, the bundled stores and the
//!   repository conventions layered on top
//! - [`chart`]: chart archive loading and metadata
//! - [`ops`]: the init / push / delete / reindex / download workflows
//! - [`repository`]: `oss://` URIs and Helm-registered repository names
//! - [`config`]: store configuration
//! - [`error`]: the shared error taxonomy
//!
//! ## Usage
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use std::sync::Arc;
//! use std::time::Duration;
//! use helm_oss::{Deadline, HelmSettings, OpsContext, StoreConfig, Storage};
//!
//! let store = StoreConfig::load()?.open_store();
//! let storage = Storage::new(Arc::new(store), Deadline::after(Duration::from_secs(300)));
//! let ctx = OpsContext::new(storage, HelmSettings::from_env());
//! helm_oss::ops::reindex(&ctx, "oss://bucket/charts").await?;
//! # Ok(())
//! # }
//! ```

pub mod chart;
pub mod cli;
pub mod config;
pub mod deadline;
pub mod error;
pub mod hash_utils;
pub mod index;
pub mod ops;
pub mod repository;
pub mod scanner;
pub mod storage;
pub mod version;

pub use chart::{load_archive, load_chart, Chart, ChartMetadata, ChartV3};
pub use config::StoreConfig;
pub use deadline::Deadline;
pub use error::{ErrorKind, RepoError, RepoResult};
pub use hash_utils::{digest_file, sha256_hash};
pub use index::{ChartVersion, Index};
pub use ops::OpsContext;
pub use repository::{HelmSettings, Repository};
pub use scanner::{ChartInfo, Scanner};
pub use storage::{BlobStore, LocalStore, MemoryStore, Storage};
