use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::AcquisitionError;
use crate::config::EgressConfig;
use crate::models::{VideoMetadata, VideoRef};

/// A resolved source: metadata plus the elementary stream locations chosen for it.
///
/// Live broadcasts usually have no separate video-only and audio-only
/// streams, so the locations are optional; metadata alone is enough to
/// reject them at admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub metadata: VideoMetadata,
    pub video: Option<StreamLocation>,
    pub audio: Option<StreamLocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamLocation {
    pub url: String,
    /// Container extension reported upstream, e.g. `mp4` or `m4a`.
    pub ext: String,
}

/// Upstream video host, reached through one egress path per call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoSource: Send + Sync {
    async fn resolve(
        &self,
        video_ref: &VideoRef,
        egress: &EgressConfig,
    ) -> Result<SourceInfo, AcquisitionError>;

    /// Stream `url` into `dest`, returning bytes written.
    async fn download(
        &self,
        url: &str,
        egress: &EgressConfig,
        dest: &Path,
    ) -> Result<u64, AcquisitionError>;
}
