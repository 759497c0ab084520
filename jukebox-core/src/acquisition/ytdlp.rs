//! `yt-dlp` for resolution, `reqwest` for the transfers.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{AcquisitionError, SourceInfo, StreamLocation, VideoSource};
use crate::config::{AcquisitionConfig, EgressConfig};
use crate::models::{truncate_secs, VideoMetadata, VideoRef};

#[derive(Debug, Deserialize)]
struct Dump {
    title: String,
    duration: Option<f64>,
    thumbnail: Option<String>,
    is_live: Option<bool>,
    live_status: Option<String>,
    #[serde(default)]
    requested_formats: Vec<DumpFormat>,
}

#[derive(Debug, Deserialize)]
struct DumpFormat {
    url: String,
    ext: String,
    vcodec: Option<String>,
    acodec: Option<String>,
}

impl DumpFormat {
    fn has(codec: Option<&String>) -> bool {
        codec.is_some_and(|c| c != "none")
    }

    fn location(&self) -> StreamLocation {
        StreamLocation {
            url: self.url.clone(),
            ext: self.ext.clone(),
        }
    }
}

/// Parse `yt-dlp --dump-single-json` output.
pub fn parse_dump(json: &str) -> Result<SourceInfo, AcquisitionError> {
    let dump: Dump = serde_json::from_str(json)?;

    let is_live = dump.is_live.unwrap_or(false)
        || matches!(dump.live_status.as_deref(), Some("is_live" | "is_upcoming"));

    let video = dump
        .requested_formats
        .iter()
        .find(|f| DumpFormat::has(f.vcodec.as_ref()) && !DumpFormat::has(f.acodec.as_ref()))
        .map(DumpFormat::location);
    let audio = dump
        .requested_formats
        .iter()
        .find(|f| DumpFormat::has(f.acodec.as_ref()) && !DumpFormat::has(f.vcodec.as_ref()))
        .map(DumpFormat::location);

    Ok(SourceInfo {
        metadata: VideoMetadata {
            title: dump.title,
            duration_secs: truncate_secs(dump.duration.unwrap_or(0.0)),
            thumbnail_url: dump.thumbnail.unwrap_or_default(),
            is_live,
        },
        video,
        audio,
    })
}

/// Video source backed by the `yt-dlp` binary.
pub struct YtDlpSource {
    binary: String,
    format: String,
    user_agent: String,
    clients: HashMap<String, reqwest::Client>,
}

impl YtDlpSource {
    /// Builds one HTTP client per egress so transfers leave through the
    /// same path the resolution used.
    pub fn new(config: &AcquisitionConfig) -> Result<Self, AcquisitionError> {
        let mut clients = HashMap::with_capacity(config.egress.len());
        for egress in &config.egress {
            clients.insert(
                egress.name.clone(),
                build_client(egress, &config.user_agent)?,
            );
        }

        Ok(Self {
            binary: config.ytdlp_path.clone(),
            format: format!("{}+{}", config.video_format, config.audio_format),
            user_agent: config.user_agent.clone(),
            clients,
        })
    }

    fn client_for(&self, egress: &EgressConfig) -> Result<reqwest::Client, AcquisitionError> {
        match self.clients.get(&egress.name) {
            Some(client) => Ok(client.clone()),
            None => build_client(egress, &self.user_agent),
        }
    }
}

fn build_client(egress: &EgressConfig, user_agent: &str) -> Result<reqwest::Client, AcquisitionError> {
    let builder = reqwest::Client::builder().user_agent(user_agent);
    let builder = match &egress.proxy {
        Some(proxy) => builder.proxy(reqwest::Proxy::all(proxy.as_str())?),
        None => builder.no_proxy(),
    };
    Ok(builder.build()?)
}

#[async_trait]
impl VideoSource for YtDlpSource {
    async fn resolve(
        &self,
        video_ref: &VideoRef,
        egress: &EgressConfig,
    ) -> Result<SourceInfo, AcquisitionError> {
        debug!(video_ref = %video_ref, egress = %egress.name, "Resolving with yt-dlp");

        let output = Command::new(&self.binary)
            .args([
                "--dump-single-json",
                "--no-playlist",
                "--no-warnings",
                "--ignore-no-formats-error",
                "--user-agent",
                self.user_agent.as_str(),
                // empty proxy means a direct connection
                "--proxy",
                egress.proxy.as_deref().unwrap_or(""),
                "-f",
                self.format.as_str(),
            ])
            .arg(video_ref.watch_url())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AcquisitionError::Failed(format!("Failed to spawn yt-dlp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AcquisitionError::from_message(&egress.name, stderr.trim()));
        }

        parse_dump(&String::from_utf8_lossy(&output.stdout))
    }

    async fn download(
        &self,
        url: &str,
        egress: &EgressConfig,
        dest: &Path,
    ) -> Result<u64, AcquisitionError> {
        let client = self.client_for(egress)?;
        let response = client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AcquisitionError::from_status(&egress.name, status));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(egress = %egress.name, bytes = written, dest = %dest.display(), "Stream transferred");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DUMP: &str = r#"{
        "id": "dQw4w9WgXcQ",
        "title": "Never Gonna Give You Up",
        "duration": 212.91,
        "thumbnail": "https://i.ytimg.com/vi/dQw4w9WgXcQ/maxresdefault.jpg",
        "is_live": false,
        "live_status": "not_live",
        "requested_formats": [
            {"format_id": "136", "url": "https://cdn.test/v", "ext": "mp4", "vcodec": "avc1.4d401f", "acodec": "none"},
            {"format_id": "140", "url": "https://cdn.test/a", "ext": "m4a", "vcodec": "none", "acodec": "mp4a.40.2"}
        ]
    }"#;

    fn source() -> YtDlpSource {
        YtDlpSource::new(&AcquisitionConfig::default()).unwrap()
    }

    #[test]
    fn test_parse_dump_selects_elementary_streams() {
        let info = parse_dump(DUMP).unwrap();
        assert_eq!(info.metadata.title, "Never Gonna Give You Up");
        assert_eq!(info.metadata.duration_secs, 212);
        assert!(!info.metadata.is_live);
        assert_eq!(info.video.unwrap().url, "https://cdn.test/v");
        let audio = info.audio.unwrap();
        assert_eq!(audio.url, "https://cdn.test/a");
        assert_eq!(audio.ext, "m4a");
    }

    #[test]
    fn test_parse_dump_live_without_formats() {
        let info = parse_dump(r#"{"title": "24/7 radio", "is_live": null, "live_status": "is_live"}"#)
            .unwrap();
        assert!(info.metadata.is_live);
        assert_eq!(info.metadata.duration_secs, 0);
        assert!(info.video.is_none());
        assert!(info.audio.is_none());
    }

    #[test]
    fn test_parse_dump_rejects_garbage() {
        assert!(matches!(parse_dump("not json"), Err(AcquisitionError::Json(_))));
    }

    #[tokio::test]
    async fn test_download_streams_body_to_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/video"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("video.mp4");
        let written = source()
            .download(&format!("{}/video", server.uri()), &EgressConfig::direct(), &dest)
            .await
            .unwrap();

        assert_eq!(written, 4096);
        assert_eq!(std::fs::read(&dest).unwrap().len(), 4096);
    }

    #[tokio::test]
    async fn test_download_forbidden_is_block() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = source()
            .download(&server.uri(), &EgressConfig::direct(), &dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(err.is_block());
    }

    #[tokio::test]
    async fn test_download_server_error_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = source()
            .download(&server.uri(), &EgressConfig::direct(), &dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(!err.is_block());
        assert!(!dir.path().join("x").exists());
    }
}
