use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use super::{AcquisitionError, EgressRotation, SourceInfo, VideoSource};
use crate::config::EgressConfig;
use crate::models::{VideoMetadata, VideoRef};

/// Raw elementary streams on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementaryStreams {
    pub video: PathBuf,
    pub audio: PathBuf,
}

/// Resolves references and fetches raw streams, rotating egress paths on blocks.
pub struct AcquisitionBackend {
    source: Arc<dyn VideoSource>,
    rotation: EgressRotation,
}

impl AcquisitionBackend {
    pub fn new(
        source: Arc<dyn VideoSource>,
        egresses: Vec<EgressConfig>,
    ) -> Result<Self, AcquisitionError> {
        Ok(Self {
            source,
            rotation: EgressRotation::new(egresses)?,
        })
    }

    #[must_use]
    pub const fn rotation(&self) -> &EgressRotation {
        &self.rotation
    }

    pub async fn resolve(&self, video_ref: &VideoRef) -> Result<SourceInfo, AcquisitionError> {
        self.rotation
            .run("resolve", |egress| {
                let source = Arc::clone(&self.source);
                let video_ref = video_ref.clone();
                async move { source.resolve(&video_ref, &egress).await }
            })
            .await
    }

    /// Metadata for `video_ref`, or `None` when it cannot be resolved on any egress.
    pub async fn resolve_metadata(&self, video_ref: &VideoRef) -> Option<VideoMetadata> {
        match self.resolve(video_ref).await {
            Ok(info) => Some(info.metadata),
            Err(err) => {
                warn!(video_ref = %video_ref, error = %err, "Could not resolve video metadata");
                None
            }
        }
    }

    /// Download the video-only and audio-only streams into `dest_dir`.
    ///
    /// Both transfers run concurrently and both must succeed. A block on
    /// either one restarts the pair on the next egress. Nothing is left in
    /// `dest_dir` on failure.
    pub async fn fetch_elementary_streams(
        &self,
        video_ref: &VideoRef,
        dest_dir: &Path,
    ) -> Result<ElementaryStreams, AcquisitionError> {
        let streams = self
            .rotation
            .run("fetch", |egress| {
                let source = Arc::clone(&self.source);
                let video_ref = video_ref.clone();
                let dest_dir = dest_dir.to_path_buf();
                async move { fetch_pair(source.as_ref(), &video_ref, &egress, &dest_dir).await }
            })
            .await?;

        info!(video_ref = %video_ref, "Fetched elementary streams");
        Ok(streams)
    }
}

async fn fetch_pair(
    source: &dyn VideoSource,
    video_ref: &VideoRef,
    egress: &EgressConfig,
    dest_dir: &Path,
) -> Result<ElementaryStreams, AcquisitionError> {
    let info = source.resolve(video_ref, egress).await?;
    let (Some(video), Some(audio)) = (info.video, info.audio) else {
        return Err(AcquisitionError::Metadata(
            "no separate video and audio streams offered".to_string(),
        ));
    };

    let video_path = dest_dir.join(format!("{video_ref}.video.{}", safe_ext(&video.ext)));
    let audio_path = dest_dir.join(format!("{video_ref}.audio.{}", safe_ext(&audio.ext)));

    let transfer = tokio::try_join!(
        source.download(&video.url, egress, &video_path),
        source.download(&audio.url, egress, &audio_path),
    );

    match transfer {
        Ok(_) => Ok(ElementaryStreams {
            video: video_path,
            audio: audio_path,
        }),
        Err(err) => {
            remove_partial(&video_path).await;
            remove_partial(&audio_path).await;
            Err(err)
        }
    }
}

fn safe_ext(ext: &str) -> &str {
    if !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        ext
    } else {
        "bin"
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial download"),
    }
}
