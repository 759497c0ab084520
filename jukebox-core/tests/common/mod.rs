#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jukebox_core::acquisition::{
    AcquisitionBackend, AcquisitionError, SourceInfo, StreamLocation, VideoSource,
};
use jukebox_core::config::{AdmissionConfig, EgressConfig};
use jukebox_core::models::{Participant, VideoMetadata, VideoRef};
use jukebox_core::repository::MemoryQueueStore;
use jukebox_core::segmenter::{ArtifactStore, SegmenterError, StreamPipeline, Transcoder};
use jukebox_core::service::{
    AdmissionPolicy, Orchestrator, OrchestratorSettings, ServerEvent,
};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Notify;

pub const TICK: Duration = Duration::from_millis(10);
pub const MANIFEST: &str = "index.m3u8";

/// Catalog-backed source; unknown refs fail resolution, unreachable refs
/// resolve but fail to download.
pub struct FakeSource {
    catalog: HashMap<String, (String, u32)>,
    unreachable: HashSet<String>,
}

#[async_trait]
impl VideoSource for FakeSource {
    async fn resolve(
        &self,
        video_ref: &VideoRef,
        _egress: &EgressConfig,
    ) -> Result<SourceInfo, AcquisitionError> {
        let (title, duration_secs) = self
            .catalog
            .get(video_ref.as_str())
            .cloned()
            .ok_or_else(|| AcquisitionError::Metadata(format!("unknown video {video_ref}")))?;

        Ok(SourceInfo {
            metadata: VideoMetadata {
                title,
                duration_secs,
                thumbnail_url: format!("https://img.test/{video_ref}.jpg"),
                is_live: false,
            },
            video: Some(StreamLocation {
                url: format!("video:{video_ref}"),
                ext: "mp4".to_string(),
            }),
            audio: Some(StreamLocation {
                url: format!("audio:{video_ref}"),
                ext: "m4a".to_string(),
            }),
        })
    }

    async fn download(
        &self,
        url: &str,
        _egress: &EgressConfig,
        dest: &Path,
    ) -> Result<u64, AcquisitionError> {
        let video_ref = url.split_once(':').map_or(url, |(_, r)| r);
        if self.unreachable.contains(video_ref) {
            return Err(AcquisitionError::Failed(format!("HTTP status 404 for {url}")));
        }
        tokio::fs::write(dest, url.as_bytes()).await?;
        Ok(url.len() as u64)
    }
}

/// Writes a one-segment playlist and counts segmentation runs.
#[derive(Default)]
pub struct FakeTranscoder {
    pub segments: AtomicUsize,
    /// Runs numbered at or above this wait for [`FakeTranscoder::release`].
    hold_from: Option<usize>,
    gate: Notify,
}

impl FakeTranscoder {
    pub fn gated(hold_from: usize) -> Self {
        Self {
            hold_from: Some(hold_from),
            ..Self::default()
        }
    }

    /// Counts runs that have started, including held ones.
    pub fn runs(&self) -> usize {
        self.segments.load(Ordering::SeqCst)
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), SegmenterError> {
        let mut merged = tokio::fs::read(video).await?;
        merged.extend(tokio::fs::read(audio).await?);
        tokio::fs::write(output, merged).await?;
        Ok(())
    }

    async fn segment(
        &self,
        input: &Path,
        out_dir: &Path,
        manifest_name: &str,
    ) -> Result<(), SegmenterError> {
        let run = self.segments.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hold_from.is_some_and(|from| run >= from) {
            self.gate.notified().await;
        }
        tokio::fs::copy(input, out_dir.join("segment_000.ts")).await?;
        tokio::fs::write(
            out_dir.join(manifest_name),
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXT-X-PLAYLIST-TYPE:VOD\n\
             #EXTINF:4.000000,\nsegment_000.ts\n#EXT-X-ENDLIST\n",
        )
        .await?;
        Ok(())
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub store: Arc<MemoryQueueStore>,
    pub transcoder: Arc<FakeTranscoder>,
    pub artifacts: ArtifactStore,
    _dir: TempDir,
}

#[derive(Default)]
pub struct Options {
    pub admission: AdmissionConfig,
    pub transcoder: FakeTranscoder,
    pub unreachable: Vec<&'static str>,
}

/// `catalog` entries are `(ref, title, duration_secs)`.
pub fn harness(catalog: &[(&str, &str, u32)], admission: AdmissionConfig) -> Harness {
    harness_with(
        catalog,
        Options {
            admission,
            ..Options::default()
        },
    )
}

pub fn harness_with(catalog: &[(&str, &str, u32)], options: Options) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let source = FakeSource {
        catalog: catalog
            .iter()
            .map(|(r, title, secs)| ((*r).to_string(), ((*title).to_string(), *secs)))
            .collect(),
        unreachable: options.unreachable.iter().map(|r| (*r).to_string()).collect(),
    };
    let acquisition = Arc::new(
        AcquisitionBackend::new(Arc::new(source), vec![EgressConfig::direct()]).unwrap(),
    );
    let transcoder = Arc::new(options.transcoder);
    let artifacts = ArtifactStore::new(dir.path().join("streams"), MANIFEST);
    let pipeline = Arc::new(StreamPipeline::new(
        Arc::clone(&acquisition),
        transcoder.clone(),
        artifacts.clone(),
        dir.path().join("work"),
    ));
    let store = Arc::new(MemoryQueueStore::with_history_cap(30));

    let orchestrator = Orchestrator::new(
        store.clone(),
        acquisition,
        pipeline,
        AdmissionPolicy::new(&options.admission),
        OrchestratorSettings {
            history_cap: 30,
            tick: TICK,
            public_base_url: String::new(),
            manifest_name: MANIFEST.to_string(),
        },
    );

    Harness {
        orchestrator,
        store,
        transcoder,
        artifacts,
        _dir: dir,
    }
}

pub fn participant(n: usize) -> Participant {
    Participant::new(format!("p{n}"), format!("Participant {n}"))
}

pub fn video_ref(raw: &str) -> VideoRef {
    VideoRef::parse(raw).unwrap()
}

/// Poll `condition` until it holds, panicking after `limit`.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Drain events until one of `event_type` arrives.
pub async fn next_event(rx: &mut UnboundedReceiver<ServerEvent>, event_type: &str) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if event.event_type() == event_type {
                return event;
            }
        }
    })
    .await
    .expect("event not received in time")
}
