use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::SegmenterError;
use crate::config::SegmenterConfig;

/// Codec/segmenter seam. Implementations must write the manifest last.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Mux a video-only and an audio-only file into one container without re-encoding.
    async fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), SegmenterError>;

    /// Split `input` into fixed-length segments plus `manifest_name` inside `out_dir`.
    async fn segment(
        &self,
        input: &Path,
        out_dir: &Path,
        manifest_name: &str,
    ) -> Result<(), SegmenterError>;
}

/// Drives the `ffmpeg` binary.
pub struct FfmpegTranscoder {
    binary: String,
    segment_secs: u32,
    /// kbit/s; `None` copies the source video stream.
    bitrate_cap: Option<u32>,
}

impl FfmpegTranscoder {
    #[must_use]
    pub fn new(config: &SegmenterConfig) -> Self {
        Self {
            binary: config.ffmpeg_path.clone(),
            segment_secs: config.segment_secs,
            bitrate_cap: config.bitrate_ladder.first().copied(),
        }
    }

    fn segment_args(&self, input: &Path, out_dir: &Path, manifest_name: &str) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-i".into(),
            input.to_string_lossy().into_owned(),
        ];

        match self.bitrate_cap {
            Some(kbps) => args.extend([
                "-c:v".into(),
                "libx264".into(),
                "-preset".into(),
                "veryfast".into(),
                "-b:v".into(),
                format!("{kbps}k"),
                "-maxrate".into(),
                format!("{kbps}k"),
                "-bufsize".into(),
                format!("{}k", kbps.saturating_mul(2)),
                "-c:a".into(),
                "copy".into(),
            ]),
            None => args.extend(["-c".into(), "copy".into()]),
        }

        args.extend([
            "-f".into(),
            "hls".into(),
            "-hls_time".into(),
            self.segment_secs.to_string(),
            "-hls_playlist_type".into(),
            "vod".into(),
            "-hls_segment_filename".into(),
            out_dir.join("segment_%03d.ts").to_string_lossy().into_owned(),
            out_dir.join(manifest_name).to_string_lossy().into_owned(),
        ]);
        args
    }

    async fn run(&self, args: &[String]) -> Result<(), SegmenterError> {
        debug!(binary = %self.binary, ?args, "Running ffmpeg");

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SegmenterError::Ffmpeg(format!("Failed to spawn ffmpeg: {e}")))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(SegmenterError::Ffmpeg(format!(
                "{}: {}",
                output.status,
                stderr.trim()
            )))
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), SegmenterError> {
        let args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-i".into(),
            video.to_string_lossy().into_owned(),
            "-i".into(),
            audio.to_string_lossy().into_owned(),
            "-map".into(),
            "0:v:0".into(),
            "-map".into(),
            "1:a:0".into(),
            "-c".into(),
            "copy".into(),
            output.to_string_lossy().into_owned(),
        ];
        self.run(&args).await
    }

    async fn segment(
        &self,
        input: &Path,
        out_dir: &Path,
        manifest_name: &str,
    ) -> Result<(), SegmenterError> {
        let args = self.segment_args(input, out_dir, manifest_name);
        self.run(&args).await
    }
}
