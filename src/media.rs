//! Media migration.
//!
//! Every image a document refers to is copied to the media host under its canonical id. The host's
//! own "already exists" answer is the only ledger: nothing is recorded locally, so re-running the
//! whole migration relies on uploads being skipped when the id is taken.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

use crate::normalize::{canonical_asset_id, AssetKind};

/// An image referenced by a legacy document
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct AssetReference {
    /// The path as written in the legacy document, e.g. `/assets/images/blog/pic.png`
    pub legacy_path: String,
    pub kind: AssetKind,
    pub canonical_id: String,
}

impl AssetReference {
    pub fn new(legacy_path: &str, kind: AssetKind) -> Option<Self> {
        let canonical_id = canonical_asset_id(Some(legacy_path), kind)?;
        Some(Self {
            legacy_path: legacy_path.to_string(),
            kind,
            canonical_id,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOutcome {
    /// The host already held an object under this id and nothing was written
    pub existing: bool,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("source file {path} could not be read")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("media host request failed")]
    Http(#[from] reqwest::Error),
    #[error("media host rejected {public_id}: {message}")]
    Rejected { public_id: String, message: String },
    #[error("media store write failed at {path}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A destination for migrated media, keyed by canonical id
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Store `local_path` under `canonical_id`. With `overwrite` unset an existing object is left
    /// alone and reported through [`UploadOutcome::existing`].
    async fn upload(
        &self,
        local_path: &Path,
        canonical_id: &str,
        overwrite: bool,
        timeout: Duration,
    ) -> Result<UploadOutcome, UploadError>;
}

/// What happened to one asset during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetOutcome {
    Uploaded,
    AlreadyPresent,
    Failed,
}

/// Migrator resolves legacy paths against the old website checkout and hands them to a store
pub struct Migrator<S: ?Sized> {
    store: std::sync::Arc<S>,
    legacy_root: PathBuf,
    timeout: Duration,
}

impl<S: MediaStore + ?Sized> Migrator<S> {
    pub fn new(store: std::sync::Arc<S>, legacy_root: PathBuf, timeout: Duration) -> Self {
        Self {
            store,
            legacy_root,
            timeout,
        }
    }

    /// source_path maps a legacy site path onto the checkout of the old website
    ///
    /// Example:
    ///     "/assets/images/my%20pic.png?v=2"
    ///     "{legacy_root}/assets/images/my pic.png"
    pub fn source_path(&self, legacy_path: &str) -> PathBuf {
        let path = legacy_path
            .split(['?', '#'])
            .next()
            .unwrap_or(legacy_path)
            .trim_start_matches('/');
        let decoded = urlencoding::decode(path)
            .map(|decoded| decoded.into_owned())
            .unwrap_or_else(|_| path.to_string());
        self.legacy_root.join(decoded)
    }

    /// ensure_migrated uploads the asset unless the store already has it
    ///
    /// Failures are logged and reported, never retried and never propagated: a missing image must
    /// not stop the document that references it from being written.
    pub async fn ensure_migrated(&self, asset: &AssetReference) -> AssetOutcome {
        let source = self.source_path(&asset.legacy_path);
        let result = self
            .store
            .upload(&source, &asset.canonical_id, false, self.timeout)
            .await;
        match result {
            Ok(UploadOutcome { existing: false }) => {
                info!(
                    "Uploaded {} as {}",
                    source.display(),
                    asset.canonical_id
                );
                AssetOutcome::Uploaded
            }
            Ok(UploadOutcome { existing: true }) => {
                debug!("{} is already on the media host", asset.canonical_id);
                AssetOutcome::AlreadyPresent
            }
            Err(err) => {
                error!(
                    "Failed to migrate {} from {}: {:#}",
                    asset.canonical_id,
                    source.display(),
                    anyhow::Error::new(err)
                );
                AssetOutcome::Failed
            }
        }
    }
}

/// A store backed by a local directory, objects land at `{root}/{canonical_id}.{source ext}`
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn object_path(&self, local_path: &Path, canonical_id: &str) -> PathBuf {
        let mut object = self.root.join(canonical_id);
        if let Some(ext) = local_path.extension() {
            let mut name = object.file_name().unwrap_or_default().to_os_string();
            name.push(".");
            name.push(ext.to_ascii_lowercase());
            object.set_file_name(name);
        }
        object
    }
}

#[async_trait]
impl MediaStore for DirectoryStore {
    async fn upload(
        &self,
        local_path: &Path,
        canonical_id: &str,
        overwrite: bool,
        timeout: Duration,
    ) -> Result<UploadOutcome, UploadError> {
        let object = self.object_path(local_path, canonical_id);
        let bytes = fs::read(local_path)
            .await
            .map_err(|source| UploadError::Source {
                path: local_path.to_path_buf(),
                source,
            })?;
        let store_err = |source| UploadError::Store {
            path: object.clone(),
            source,
        };
        if let Some(parent) = object.parent() {
            fs::create_dir_all(parent).await.map_err(store_err)?;
        }

        let mut options = fs::OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }

        let write = async {
            let mut file = options.open(&object).await?;
            file.write_all(&bytes).await?;
            file.flush().await
        };
        match tokio::time::timeout(timeout, write).await {
            Ok(Ok(())) => Ok(UploadOutcome { existing: false }),
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                Ok(UploadOutcome { existing: true })
            }
            Ok(Err(err)) => Err(store_err(err)),
            Err(_elapsed) => Err(store_err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "write timed out",
            ))),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    /// Records every upload and answers `existing` for ids it has already seen
    #[derive(Default)]
    pub(crate) struct RecordingStore {
        pub(crate) uploads: Mutex<Vec<(PathBuf, String)>>,
        seen: Mutex<HashSet<String>>,
        pub(crate) failing: HashSet<String>,
    }

    impl RecordingStore {
        pub(crate) fn failing_on(ids: &[&str]) -> Self {
            Self {
                failing: ids.iter().map(|id| id.to_string()).collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl MediaStore for RecordingStore {
        async fn upload(
            &self,
            local_path: &Path,
            canonical_id: &str,
            overwrite: bool,
            _timeout: Duration,
        ) -> Result<UploadOutcome, UploadError> {
            assert!(!overwrite, "migration must never overwrite");
            self.uploads
                .lock()
                .unwrap()
                .push((local_path.to_path_buf(), canonical_id.to_string()));
            if self.failing.contains(canonical_id) {
                return Err(UploadError::Rejected {
                    public_id: canonical_id.to_string(),
                    message: "test failure".into(),
                });
            }
            let fresh = self.seen.lock().unwrap().insert(canonical_id.to_string());
            Ok(UploadOutcome { existing: !fresh })
        }
    }

    fn asset(path: &str) -> AssetReference {
        AssetReference::new(path, AssetKind::Blog).unwrap()
    }

    #[test]
    fn asset_reference_needs_a_path() {
        assert!(AssetReference::new("", AssetKind::Blog).is_none());
        assert_eq!(
            asset("/img/pic.png").canonical_id,
            "linaro-website/images/blog/pic"
        );
    }

    #[test]
    fn source_path_is_rooted_decoded_and_query_free() {
        let migrator = Migrator::new(
            Arc::new(RecordingStore::default()),
            PathBuf::from("/site"),
            Duration::from_secs(1),
        );
        assert_eq!(
            migrator.source_path("/assets/images/my%20pic.png?v=2"),
            PathBuf::from("/site/assets/images/my pic.png")
        );
        assert_eq!(
            migrator.source_path("relative/a.jpg#frag"),
            PathBuf::from("/site/relative/a.jpg")
        );
    }

    #[tokio::test]
    async fn second_migration_of_same_id_reports_existing() {
        let store = Arc::new(RecordingStore::default());
        let migrator = Migrator::new(store.clone(), PathBuf::from("/site"), Duration::from_secs(1));
        let pic = asset("/img/pic.png");

        assert_eq!(migrator.ensure_migrated(&pic).await, AssetOutcome::Uploaded);
        assert_eq!(
            migrator.ensure_migrated(&pic).await,
            AssetOutcome::AlreadyPresent
        );
        assert_eq!(store.uploads.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failures_are_reported_not_raised() {
        let store = Arc::new(RecordingStore::failing_on(&["linaro-website/images/blog/bad"]));
        let migrator = Migrator::new(store, PathBuf::from("/site"), Duration::from_secs(1));
        assert_eq!(
            migrator.ensure_migrated(&asset("/img/bad.png")).await,
            AssetOutcome::Failed
        );
    }

    #[tokio::test]
    async fn directory_store_uploads_once() {
        let site = tempfile::tempdir().unwrap();
        let media = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(site.path().join("img")).unwrap();
        std::fs::write(site.path().join("img/pic.PNG"), b"png bytes").unwrap();

        let store = Arc::new(DirectoryStore::new(media.path().to_path_buf()));
        let migrator = Migrator::new(store, site.path().to_path_buf(), Duration::from_secs(5));
        let pic = asset("/img/pic.PNG");

        assert_eq!(migrator.ensure_migrated(&pic).await, AssetOutcome::Uploaded);
        assert_eq!(
            migrator.ensure_migrated(&pic).await,
            AssetOutcome::AlreadyPresent
        );
        let stored = media.path().join("linaro-website/images/blog/pic.png");
        assert_eq!(std::fs::read(stored).unwrap(), b"png bytes");
    }

    #[tokio::test]
    async fn directory_store_fails_on_missing_source() {
        let site = tempfile::tempdir().unwrap();
        let media = tempfile::tempdir().unwrap();
        let store = Arc::new(DirectoryStore::new(media.path().to_path_buf()));
        let migrator = Migrator::new(store, site.path().to_path_buf(), Duration::from_secs(5));
        assert_eq!(
            migrator.ensure_migrated(&asset("/img/missing.png")).await,
            AssetOutcome::Failed
        );
    }
}
