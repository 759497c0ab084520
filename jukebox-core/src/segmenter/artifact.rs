use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::SegmenterError;
use crate::models::{generate_id, VideoRef};

const STAGING_PREFIX: &str = ".staging-";

/// On-disk stream artifacts, one directory per video ref under `root`.
///
/// Segmentation happens in a hidden staging directory that is renamed into
/// place once complete, so a visible directory always has its manifest.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    manifest_name: String,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, manifest_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            manifest_name: manifest_name.into(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn manifest_name(&self) -> &str {
        &self.manifest_name
    }

    #[must_use]
    pub fn dir_for(&self, video_ref: &VideoRef) -> PathBuf {
        self.root.join(video_ref.as_str())
    }

    #[must_use]
    pub fn manifest_path(&self, video_ref: &VideoRef) -> PathBuf {
        self.dir_for(video_ref).join(&self.manifest_name)
    }

    pub async fn exists(&self, video_ref: &VideoRef) -> bool {
        tokio::fs::try_exists(self.manifest_path(video_ref))
            .await
            .unwrap_or(false)
    }

    /// Create the root and drop staging directories left by an interrupted run.
    pub async fn prepare(&self) -> Result<usize, SegmenterError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
                tokio::fs::remove_dir_all(entry.path()).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, root = %self.root.display(), "Removed stale staging directories");
        }
        Ok(removed)
    }

    pub async fn create_staging(&self, video_ref: &VideoRef) -> Result<PathBuf, SegmenterError> {
        let dir = self
            .root
            .join(format!("{STAGING_PREFIX}{video_ref}-{}", generate_id()));
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Move a finished staging directory into place. An artifact that
    /// already exists wins and the staging copy is discarded.
    pub async fn publish(
        &self,
        staging: &Path,
        video_ref: &VideoRef,
    ) -> Result<PathBuf, SegmenterError> {
        if !tokio::fs::try_exists(staging.join(&self.manifest_name)).await? {
            discard(staging).await;
            return Err(SegmenterError::MissingManifest(video_ref.to_string()));
        }

        let target = self.dir_for(video_ref);
        if self.exists(video_ref).await {
            discard(staging).await;
            return Ok(target);
        }
        // a directory without a manifest is debris from an older layout
        if tokio::fs::try_exists(&target).await? {
            tokio::fs::remove_dir_all(&target).await?;
        }

        tokio::fs::rename(staging, &target).await?;
        debug!(video_ref = %video_ref, path = %target.display(), "Published stream artifact");
        Ok(target)
    }

    /// Delete the whole artifact directory. Missing directories are fine.
    pub async fn remove(&self, video_ref: &VideoRef) -> Result<(), SegmenterError> {
        match tokio::fs::remove_dir_all(self.dir_for(video_ref)).await {
            Ok(()) => {
                debug!(video_ref = %video_ref, "Removed stream artifact");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Path of one file inside an artifact. Rejects anything but a plain file name.
    pub fn resolve_file(&self, video_ref: &VideoRef, file: &str) -> Result<PathBuf, SegmenterError> {
        let plain = !file.is_empty()
            && !file.starts_with('.')
            && !file.contains(['/', '\\', '\0'])
            && file != "..";
        if !plain {
            return Err(SegmenterError::InvalidPath(file.to_string()));
        }
        Ok(self.dir_for(video_ref).join(file))
    }
}

pub(super) async fn discard(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %dir.display(), error = %e, "Failed to remove directory");
        }
    }
}
