//! Segmented stream files of the item currently playing.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{debug, error};

use crate::http::{AppError, AppResult, AppState};

fn content_type(file: &str) -> &'static str {
    match file.rsplit_once('.').map(|(_, ext)| ext) {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("ts") => "video/mp2t",
        _ => "application/octet-stream",
    }
}

/// `GET /stream/{video_ref}/{file}`
///
/// Only the active item's artifact is served; anything else is forbidden so
/// clients cannot pull stale or prefetched streams.
pub async fn stream_file(
    State(state): State<AppState>,
    Path((video_ref, file)): Path<(String, String)>,
) -> AppResult<Response> {
    let active = state
        .orchestrator
        .active()
        .ok_or_else(|| AppError::not_found("Nothing is playing"))?;

    if active.video_ref.as_str() != video_ref {
        debug!(requested = %video_ref, active = %active.video_ref, "Refused stream for inactive item");
        return Err(AppError::forbidden("Not the active item"));
    }

    let path = state
        .orchestrator
        .artifacts()
        .resolve_file(&active.video_ref, &file)
        .map_err(|_| AppError::bad_request("Invalid file name"))?;

    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type(&file)),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            bytes,
        )
            .into_response()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(AppError::not_found("Stream file not found"))
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to read stream file");
            Err(AppError::internal("Failed to read stream file"))
        }
    }
}
