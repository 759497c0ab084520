use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::artifact::discard;
use super::{ArtifactStore, SegmenterError, Transcoder};
use crate::acquisition::AcquisitionBackend;
use crate::metrics;
use crate::models::{generate_id, VideoRef};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Fetched, merged and segmented on this call.
    Created(PathBuf),
    AlreadyPresent(PathBuf),
    /// Another run holds the guard; this request was dropped.
    Busy,
}

/// Clears the busy flag on every exit path, cancellation included.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Fetch, merge and segment one video into its stream artifact.
pub struct StreamPipeline {
    acquisition: Arc<AcquisitionBackend>,
    transcoder: Arc<dyn Transcoder>,
    artifacts: ArtifactStore,
    work_dir: PathBuf,
    busy: AtomicBool,
}

impl StreamPipeline {
    pub fn new(
        acquisition: Arc<AcquisitionBackend>,
        transcoder: Arc<dyn Transcoder>,
        artifacts: ArtifactStore,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            acquisition,
            transcoder,
            artifacts,
            work_dir: work_dir.into(),
            busy: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub async fn run(&self, video_ref: &VideoRef) -> Result<PipelineOutcome, SegmenterError> {
        if self.artifacts.exists(video_ref).await {
            return Ok(PipelineOutcome::AlreadyPresent(self.artifacts.dir_for(video_ref)));
        }

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(video_ref = %video_ref, "Pipeline busy, dropping request");
            return Ok(PipelineOutcome::Busy);
        }
        let _guard = BusyGuard(&self.busy);

        // the previous holder may have produced it meanwhile
        if self.artifacts.exists(video_ref).await {
            return Ok(PipelineOutcome::AlreadyPresent(self.artifacts.dir_for(video_ref)));
        }

        let started = Instant::now();
        let work = self.work_dir.join(format!("{video_ref}-{}", generate_id()));
        tokio::fs::create_dir_all(&work).await?;

        let result = self.produce(video_ref, &work).await;
        discard(&work).await;

        match result {
            Ok(dir) => {
                metrics::SEGMENTATION_DURATION.observe(started.elapsed().as_secs_f64());
                info!(
                    video_ref = %video_ref,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Stream artifact created"
                );
                Ok(PipelineOutcome::Created(dir))
            }
            Err(err) => {
                warn!(video_ref = %video_ref, error = %err, "Stream pipeline failed");
                Err(err)
            }
        }
    }

    async fn produce(&self, video_ref: &VideoRef, work: &Path) -> Result<PathBuf, SegmenterError> {
        let streams = self
            .acquisition
            .fetch_elementary_streams(video_ref, work)
            .await?;

        let merged = work.join(format!("{video_ref}.mp4"));
        self.transcoder
            .merge(&streams.video, &streams.audio, &merged)
            .await?;
        tokio::fs::remove_file(&streams.video).await?;
        tokio::fs::remove_file(&streams.audio).await?;

        let staging = self.artifacts.create_staging(video_ref).await?;
        if let Err(err) = self
            .transcoder
            .segment(&merged, &staging, self.artifacts.manifest_name())
            .await
        {
            discard(&staging).await;
            return Err(err);
        }

        self.artifacts.publish(&staging, video_ref).await
    }
}
