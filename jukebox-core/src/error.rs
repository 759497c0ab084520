use thiserror::Error;

use crate::acquisition::AcquisitionError;
use crate::segmenter::SegmenterError;
use crate::service::admission::RejectionReason;

#[derive(Error, Debug)]
pub enum Error {
    /// Every configured egress reported a block signal.
    #[error("Acquisition blocked: {0}")]
    AcquisitionBlocked(String),

    #[error("Acquisition failed: {0}")]
    AcquisitionFailed(String),

    #[error("Segmentation failed: {0}")]
    SegmentationFailed(String),

    #[error("Admission rejected: {0}")]
    AdmissionRejected(RejectionReason),

    #[error("Queue store unavailable: {0}")]
    StoreUnavailable(sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Per-item failures the playback loop absorbs instead of stopping on.
    #[must_use]
    pub const fn is_item_failure(&self) -> bool {
        matches!(
            self,
            Self::AcquisitionBlocked(_)
                | Self::AcquisitionFailed(_)
                | Self::SegmentationFailed(_)
                | Self::Io(_)
        )
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound("Queue item not found".to_string()),
            sqlx::Error::Database(db_err) => match db_err.code().unwrap_or_default().as_ref() {
                // unique_violation on the single-active index
                "23505" => Self::InvalidInput("An active item already exists".to_string()),
                "23514" => Self::InvalidInput("Constraint check failed".to_string()),
                _ => Self::StoreUnavailable(err),
            },
            _ => Self::StoreUnavailable(err),
        }
    }
}

impl From<AcquisitionError> for Error {
    fn from(err: AcquisitionError) -> Self {
        match err {
            AcquisitionError::Blocked { .. } | AcquisitionError::Exhausted { .. } => {
                Self::AcquisitionBlocked(err.to_string())
            }
            other => Self::AcquisitionFailed(other.to_string()),
        }
    }
}

impl From<SegmenterError> for Error {
    fn from(err: SegmenterError) -> Self {
        match err {
            SegmenterError::Acquisition(inner) => inner.into(),
            other => Self::SegmentationFailed(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
