//! Acquisition backend: source resolution and raw stream transfer.

mod backend;
mod egress;
mod error;
mod source;
mod ytdlp;

pub use backend::{AcquisitionBackend, ElementaryStreams};
pub use egress::EgressRotation;
pub use error::{is_block_signal, is_block_status, AcquisitionError};
#[cfg(test)]
pub use source::MockVideoSource;
pub use source::{SourceInfo, StreamLocation, VideoSource};
pub use ytdlp::{parse_dump, YtDlpSource};
