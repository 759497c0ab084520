//! Merge elementary streams and repackage them as segmented HLS.

mod artifact;
mod pipeline;
mod transcoder;

pub use artifact::ArtifactStore;
pub use pipeline::{PipelineOutcome, StreamPipeline};
pub use transcoder::{FfmpegTranscoder, Transcoder};

use crate::acquisition::AcquisitionError;

#[derive(Debug, thiserror::Error)]
pub enum SegmenterError {
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error("ffmpeg failed: {0}")]
    Ffmpeg(String),

    #[error("Invalid artifact path: {0}")]
    InvalidPath(String),

    #[error("Segmentation produced no manifest for {0}")]
    MissingManifest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
