//! Filesystem artifact store: one immutable file per fingerprint.
//!
//! Writers stage bytes in a hidden `.partial` file inside the cache directory
//! and rename it onto `<fingerprint>.<ext>` once it is durable. Readers only
//! ever look at final names, so a half-written artifact is never visible.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::application::ports::{ArtifactStore, StorageError};
use crate::domain::fingerprint::Fingerprint;
use crate::domain::types::ArtifactRef;

const TARGET: &str = "infra::artifacts";
const PARTIAL_SUFFIX: &str = ".partial";
/// Staging files younger than this may belong to a live publish in another
/// process sharing the directory.
const STALE_PARTIAL_AGE: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
    extension: String,
}

impl FsArtifactStore {
    /// Open the store rooted at `root`, creating the directory and removing
    /// staging files abandoned by a crashed process.
    pub fn open(root: impl Into<PathBuf>, extension: impl Into<String>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|err| StorageError::io(&root, err))?;
        let store = Self {
            root,
            extension: extension.into(),
        };
        let swept = store.sweep_partials(STALE_PARTIAL_AGE)?;
        if swept > 0 {
            info!(
                target = TARGET,
                op = "artifacts::open",
                result = "swept",
                root = %store.root.display(),
                swept,
                "Removed stale partial artifacts"
            );
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(format!("{fingerprint}.{}", self.extension))
    }

    /// Delete `.partial` staging files last modified more than `older_than` ago.
    pub fn sweep_partials(&self, older_than: Duration) -> Result<usize, StorageError> {
        let entries = std::fs::read_dir(&self.root).map_err(|err| StorageError::io(&self.root, err))?;
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|err| StorageError::io(&self.root, err))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !(name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX)) {
                continue;
            }
            let path = entry.path();
            let modified = match entry.metadata().and_then(|meta| meta.modified()) {
                Ok(modified) => modified,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(StorageError::io(path, err)),
            };
            // Clock skew reads as age zero, which keeps the file.
            let age = now.duration_since(modified).unwrap_or_default();
            if age < older_than {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(StorageError::io(path, err)),
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<ArtifactRef>, StorageError> {
        let path = self.path_for(fingerprint);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(ArtifactRef::new(*fingerprint, path))),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::io(path, err)),
        }
    }

    async fn publish(
        &self,
        fingerprint: &Fingerprint,
        bytes: Bytes,
    ) -> Result<ArtifactRef, StorageError> {
        if bytes.is_empty() {
            return Err(StorageError::EmptyArtifact);
        }

        let root = self.root.clone();
        let final_path = self.path_for(fingerprint);
        let staging_prefix = format!(".{fingerprint}.");
        let target = final_path.clone();

        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut staged = tempfile::Builder::new()
                .prefix(&staging_prefix)
                .suffix(PARTIAL_SUFFIX)
                .tempfile_in(&root)
                .map_err(|err| StorageError::io(&root, err))?;
            let staged_path = staged.path().to_path_buf();
            staged
                .write_all(&bytes)
                .and_then(|()| staged.as_file().sync_all())
                .map_err(|err| StorageError::io(&staged_path, err))?;
            staged
                .persist(&target)
                .map_err(|err| StorageError::io(&target, err.error))?;
            Ok(())
        })
        .await
        .map_err(|err| StorageError::Task(err.to_string()))??;

        debug!(
            target = TARGET,
            op = "artifacts::publish",
            result = "ok",
            path = %final_path.display(),
            "Artifact published"
        );

        Ok(ArtifactRef::new(*fingerprint, final_path))
    }

    async fn fetch(&self, fingerprint: &Fingerprint) -> Result<Option<Bytes>, StorageError> {
        let path = self.path_for(fingerprint);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => {
                warn!(
                    target = TARGET,
                    op = "artifacts::fetch",
                    result = "error",
                    path = %path.display(),
                    error = %err,
                    "Failed to read artifact"
                );
                Err(StorageError::io(path, err))
            }
        }
    }
}
