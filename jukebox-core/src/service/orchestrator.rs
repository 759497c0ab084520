//! The playback control loop.
//!
//! One loop instance per process decides what plays, prepares stream
//! artifacts, times playback on a server-side tick and moves items through
//! `upcoming -> active -> history`. Participants joining and items being
//! submitted only ever nudge the loop through [`Orchestrator::maybe_start`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::admission::AdmissionPolicy;
use super::events::{ClientMessage, PlaybackSnapshot, ServerEvent, ToastSeverity};
use super::presence::{ConnectionId, ParticipantHub};
use super::skip::SkipVotes;
use crate::acquisition::AcquisitionBackend;
use crate::config::Config;
use crate::metrics;
use crate::models::{
    ItemId, NewQueueItem, Participant, ParticipantId, QueueItem, QueueStage, VideoRef,
};
use crate::repository::QueueStore;
use crate::segmenter::{ArtifactStore, PipelineOutcome, StreamPipeline};
use crate::{Error, Result};

const TOAST_NO_DETAILS: &str = "Couldn't get video details!";
const TOAST_NO_STREAM: &str = "Couldn't create HLS stream!";

/// Loop tuning taken from [`Config`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub history_cap: usize,
    pub tick: Duration,
    pub public_base_url: String,
    pub manifest_name: String,
}

impl OrchestratorSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            history_cap: config.playback.history_cap,
            tick: Duration::from_millis(config.playback.tick_millis),
            public_base_url: config.server.public_base_url.clone(),
            manifest_name: config.segmenter.manifest_name.clone(),
        }
    }

    fn stream_path(&self, video_ref: &VideoRef) -> String {
        format!(
            "{}/stream/{}/{}",
            self.public_base_url.trim_end_matches('/'),
            video_ref,
            self.manifest_name
        )
    }
}

/// Why an item left the active slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finish {
    Completed,
    Skipped,
    Failed,
}

impl Finish {
    const fn label(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

enum Phase {
    Resolving,
    Preparing(QueueItem),
    Streaming(QueueItem),
    Advancing(QueueItem, Finish),
    Idle,
}

impl Phase {
    const fn name(&self) -> &'static str {
        match self {
            Self::Resolving => "resolving",
            Self::Preparing(_) => "preparing",
            Self::Streaming(_) => "streaming",
            Self::Advancing(..) => "advancing",
            Self::Idle => "idle",
        }
    }
}

/// In-memory mirror of the queue plus transient playback state.
#[derive(Default)]
struct PlaybackState {
    active: Option<QueueItem>,
    upcoming: Vec<QueueItem>,
    /// Most recent first, bounded by `history_cap`
    history: VecDeque<QueueItem>,
    stream_path: Option<String>,
    downloading: bool,
    elapsed_secs: u64,
    skip: SkipVotes,
}

struct Prefetch {
    video_ref: VideoRef,
    handle: JoinHandle<()>,
}

struct Inner {
    store: Arc<dyn QueueStore>,
    acquisition: Arc<AcquisitionBackend>,
    pipeline: Arc<StreamPipeline>,
    admission: AdmissionPolicy,
    hub: ParticipantHub,
    settings: OrchestratorSettings,
    state: Mutex<PlaybackState>,
    running: AtomicBool,
    /// Id of the active item whose skip threshold was reached
    skip_signal: watch::Sender<Option<ItemId>>,
    prefetch: Mutex<Option<Prefetch>>,
    /// Serializes the admission check with the insert that follows it
    admitting: AsyncMutex<()>,
    shutdown: CancellationToken,
}

/// Handle to the playback orchestrator. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn QueueStore>,
        acquisition: Arc<AcquisitionBackend>,
        pipeline: Arc<StreamPipeline>,
        admission: AdmissionPolicy,
        settings: OrchestratorSettings,
    ) -> Self {
        let (skip_signal, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                store,
                acquisition,
                pipeline,
                admission,
                hub: ParticipantHub::new(),
                settings,
                state: Mutex::new(PlaybackState::default()),
                running: AtomicBool::new(false),
                skip_signal,
                prefetch: Mutex::new(None),
                admitting: AsyncMutex::new(()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    #[must_use]
    pub fn hub(&self) -> &ParticipantHub {
        &self.inner.hub
    }

    #[must_use]
    pub fn admission(&self) -> &AdmissionPolicy {
        &self.inner.admission
    }

    #[must_use]
    pub fn artifacts(&self) -> &ArtifactStore {
        self.inner.pipeline.artifacts()
    }

    /// Reload the mirror from the store.
    pub async fn refresh(&self) -> Result<()> {
        let store = &self.inner.store;
        let active = store.get_active_item().await?;
        let upcoming = store.get_queue(QueueStage::Upcoming, None).await?;
        let history = store
            .get_queue(QueueStage::History, Some(self.inner.settings.history_cap))
            .await?;

        info!(
            active = active.as_ref().map(|i| i.video_ref.to_string()),
            upcoming = upcoming.len(),
            history = history.len(),
            "Playback state loaded"
        );

        let mut state = self.inner.state.lock();
        state.active = active;
        state.upcoming = upcoming;
        state.history = history.into();
        Ok(())
    }

    // ----- queries -----

    #[must_use]
    pub fn snapshot(&self) -> PlaybackSnapshot {
        let participants = self.inner.hub.participant_count();
        let state = self.inner.state.lock();
        PlaybackSnapshot {
            active: state.active.clone(),
            upcoming: state.upcoming.clone(),
            history: state.history.iter().cloned().collect(),
            stream_path: state.stream_path.clone(),
            downloading: state.downloading,
            elapsed_secs: state.elapsed_secs,
            skip_votes: state.skip.count(),
            skip_threshold: SkipVotes::threshold(participants),
        }
    }

    #[must_use]
    pub fn active(&self) -> Option<QueueItem> {
        self.inner.state.lock().active.clone()
    }

    #[must_use]
    pub fn upcoming(&self) -> Vec<QueueItem> {
        self.inner.state.lock().upcoming.clone()
    }

    #[must_use]
    pub fn history(&self) -> Vec<QueueItem> {
        self.inner.state.lock().history.iter().cloned().collect()
    }

    #[must_use]
    pub fn stream_path(&self) -> Option<String> {
        self.inner.state.lock().stream_path.clone()
    }

    /// Seconds of the active item played so far, by the server's tick count.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.inner.state.lock().elapsed_secs
    }

    #[must_use]
    pub fn is_downloading(&self) -> bool {
        self.inner.state.lock().downloading
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Answer a client query with the matching event.
    #[must_use]
    pub fn query(&self, message: &ClientMessage) -> Option<ServerEvent> {
        Some(match message {
            ClientMessage::GetState => ServerEvent::State(self.snapshot()),
            ClientMessage::GetActive => ServerEvent::ActiveChanged { item: self.active() },
            ClientMessage::GetUpcoming => ServerEvent::UpcomingChanged { items: self.upcoming() },
            ClientMessage::GetHistory => ServerEvent::HistoryChanged { items: self.history() },
            ClientMessage::GetStreamPath => ServerEvent::StreamPathChanged {
                path: self.stream_path(),
            },
            ClientMessage::GetTimestamp => ServerEvent::Timestamp {
                elapsed_secs: self.timestamp(),
            },
            ClientMessage::GetParticipants => ServerEvent::ParticipantsChanged {
                participants: self.inner.hub.participants(),
            },
            ClientMessage::AddItem { .. } | ClientMessage::VoteSkip => return None,
        })
    }

    // ----- presence -----

    /// Register a connection, send it the current state and nudge the loop.
    pub fn join(
        &self,
        participant: Participant,
        connection_id: ConnectionId,
    ) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (rx, is_new) = self
            .inner
            .hub
            .subscribe(participant, connection_id.clone());

        self.inner
            .hub
            .send_to_connection(&connection_id, &ServerEvent::State(self.snapshot()));
        if is_new {
            self.broadcast_participants();
            self.broadcast_skip();
        }

        self.maybe_start();
        rx
    }

    pub fn leave(&self, connection_id: &str) {
        let departure = self.inner.hub.unsubscribe(connection_id);
        if let Some(departure) = departure.filter(|d| d.left) {
            self.inner.state.lock().skip.retract(&departure.participant.id);
        }

        self.broadcast_participants();
        self.broadcast_skip();
        // fewer participants may lower the threshold below the votes cast
        self.check_skip_threshold();
    }

    // ----- commands -----

    /// Validate and enqueue a video. The loop alone promotes it later.
    pub async fn submit(&self, participant: &Participant, raw_ref: &str) -> Result<QueueItem> {
        let video_ref = match VideoRef::parse(raw_ref) {
            Ok(video_ref) => video_ref,
            Err(err) => {
                self.toast_to(
                    &participant.id,
                    TOAST_NO_DETAILS,
                    "That doesn't look like a video link.",
                    ToastSeverity::Destructive,
                );
                return Err(err);
            }
        };

        let Some(metadata) = self.inner.acquisition.resolve_metadata(&video_ref).await else {
            self.toast_to(
                &participant.id,
                TOAST_NO_DETAILS,
                video_ref.watch_url(),
                ToastSeverity::Destructive,
            );
            return Err(Error::AcquisitionFailed(format!(
                "Could not resolve {video_ref}"
            )));
        };

        let store = &self.inner.store;
        let admitting = self.inner.admitting.lock().await;
        let upcoming = store.get_queue(QueueStage::Upcoming, None).await?;
        let owned = store.count_upcoming_by(&participant.id).await?;

        let admission = &self.inner.admission;
        if let Err(reason) = admission.check(&metadata, &upcoming, owned) {
            info!(
                video_ref = %video_ref,
                participant_id = %participant.id,
                reason = %reason,
                "Item rejected"
            );
            self.toast_to(
                &participant.id,
                "Can't add this video",
                reason.describe(admission.max_duration_secs(), admission.per_participant_limit()),
                ToastSeverity::Destructive,
            );
            return Err(Error::AdmissionRejected(reason));
        }

        let item = store
            .insert_item(
                NewQueueItem {
                    video_ref,
                    metadata,
                    submitted_by: participant.id.clone(),
                    submitter_name: participant.display_name.clone(),
                    submitter_avatar: participant.avatar.clone(),
                },
                QueueStage::Upcoming,
            )
            .await?;
        drop(admitting);

        info!(
            item_id = %item.id,
            video_ref = %item.video_ref,
            participant_id = %participant.id,
            "Item queued"
        );

        let upcoming = store.get_queue(QueueStage::Upcoming, None).await?;
        let upcoming = {
            let mut state = self.inner.state.lock();
            // the loop may have promoted an item since the read
            let active = state.active.as_ref().map(|a| a.id.clone());
            state.upcoming = upcoming
                .into_iter()
                .filter(|u| Some(&u.id) != active.as_ref())
                .collect();
            state.upcoming.clone()
        };
        self.broadcast(&ServerEvent::UpcomingChanged { items: upcoming });
        self.toast_to(
            &participant.id,
            "Added to queue",
            item.title.clone(),
            ToastSeverity::Default,
        );

        self.maybe_start();
        self.prefetch_while_streaming().await;
        Ok(item)
    }

    /// Record a skip vote for the active item. Returns `(votes, threshold)`.
    pub fn vote_skip(&self, participant: &ParticipantId) -> Result<(usize, usize)> {
        let threshold = SkipVotes::threshold(self.inner.hub.participant_count());
        let votes = {
            let mut state = self.inner.state.lock();
            if state.active.is_none() {
                return Err(Error::InvalidInput("Nothing is playing".to_string()));
            }
            state.skip.vote(participant.clone());
            state.skip.count()
        };

        debug!(participant_id = %participant, votes, threshold, "Skip vote");
        self.broadcast(&ServerEvent::SkipChanged { votes, threshold });
        self.check_skip_threshold();
        Ok((votes, threshold))
    }

    fn check_skip_threshold(&self) {
        let participants = self.inner.hub.participant_count();
        // signalled under the state lock so it cannot outlive the item it targets
        let state = self.inner.state.lock();
        if let Some(active) = state.active.as_ref().filter(|_| state.skip.reached(participants)) {
            self.inner.skip_signal.send_replace(Some(active.id.clone()));
        }
    }

    // ----- loop control -----

    /// Start the loop unless it is already running or has nothing to do.
    /// Returns true when this call started it.
    pub fn maybe_start(&self) -> bool {
        if !self.should_run() {
            return false;
        }
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let this = self.clone();
        tokio::spawn(async move { this.run_loop().await });
        true
    }

    /// Stop the loop at its next suspension point, abort any prefetch and
    /// close every participant channel.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        if let Some(prefetch) = self.inner.prefetch.lock().take() {
            prefetch.handle.abort();
        }
        let closed = self.inner.hub.disconnect_all();
        info!(closed, "Orchestrator shut down");
    }

    fn should_run(&self) -> bool {
        if self.inner.shutdown.is_cancelled() || self.inner.hub.participant_count() == 0 {
            return false;
        }
        let state = self.inner.state.lock();
        state.active.is_some() || !state.upcoming.is_empty()
    }

    async fn run_loop(self) {
        info!("Playback loop started");
        loop {
            let result = self.drive().await;
            self.inner.running.store(false, Ordering::Release);

            if let Err(err) = result {
                error!(error = %err, "Playback loop stopped");
                return;
            }
            // a join or submit may have landed between the last check and the flag reset
            let restart = self.should_run()
                && self
                    .inner
                    .running
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok();
            if !restart {
                info!("Playback loop idle");
                return;
            }
        }
    }

    async fn drive(&self) -> Result<()> {
        let mut phase = Phase::Resolving;
        loop {
            if self.inner.shutdown.is_cancelled() {
                return Ok(());
            }
            debug!(phase = phase.name(), "Playback phase");
            phase = match phase {
                Phase::Resolving => self.resolve().await?,
                Phase::Preparing(item) => self.prepare(item).await,
                Phase::Streaming(item) => self.stream(item).await,
                Phase::Advancing(item, finish) => self.advance(item, finish).await?,
                Phase::Idle => return Ok(()),
            };
        }
    }

    async fn resolve(&self) -> Result<Phase> {
        if self.inner.hub.participant_count() == 0 {
            return Ok(Phase::Idle);
        }
        if let Some(active) = self.active() {
            return Ok(Phase::Preparing(active));
        }

        let Some(head) = self.inner.store.get_head_of_upcoming().await? else {
            return Ok(Phase::Idle);
        };
        let promoted = self
            .inner
            .store
            .transition_stage(&head.id, QueueStage::Upcoming, QueueStage::Active)
            .await?;
        self.install_active(Some(promoted));
        Ok(Phase::Resolving)
    }

    async fn prepare(&self, item: QueueItem) -> Phase {
        // a running prefetch holds the pipeline guard
        self.await_prefetch(None).await;

        let artifacts = self.inner.pipeline.artifacts();
        if !artifacts.exists(&item.video_ref).await {
            self.set_downloading(true);
            let outcome = self.inner.pipeline.run(&item.video_ref).await;
            self.set_downloading(false);

            let failure = match outcome {
                Ok(PipelineOutcome::Created(_) | PipelineOutcome::AlreadyPresent(_)) => None,
                Ok(PipelineOutcome::Busy) => Some(Error::SegmentationFailed(
                    "pipeline busy".to_string(),
                )),
                Err(err) => Some(err.into()),
            };

            if let Some(err) = failure {
                error!(
                    item_id = %item.id,
                    video_ref = %item.video_ref,
                    error = %err,
                    "Could not prepare stream"
                );
                self.toast_all(TOAST_NO_STREAM, item.title.clone(), ToastSeverity::Destructive);
                return Phase::Advancing(item, Finish::Failed);
            }
        }

        let path = self.inner.settings.stream_path(&item.video_ref);
        self.inner.state.lock().stream_path = Some(path.clone());
        self.broadcast(&ServerEvent::StreamPathChanged { path: Some(path) });
        Phase::Streaming(item)
    }

    async fn stream(&self, item: QueueItem) -> Phase {
        self.launch_prefetch(&item).await;

        info!(
            item_id = %item.id,
            video_ref = %item.video_ref,
            duration_secs = item.duration_secs,
            "Now playing"
        );

        let tick = self.inner.settings.tick;
        let item_id = item.id.clone();
        let mut skip_rx = self.inner.skip_signal.subscribe();
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        for elapsed in 1..=u64::from(item.duration_secs) {
            tokio::select! {
                _ = interval.tick() => {
                    self.inner.state.lock().elapsed_secs = elapsed;
                }
                true = async { skip_rx.wait_for(|skip| skip.as_ref() == Some(&item_id)).await.is_ok() } => {
                    info!(item_id = %item.id, "Skip threshold reached");
                    return Phase::Advancing(item, Finish::Skipped);
                }
                () = self.inner.shutdown.cancelled() => return Phase::Idle,
            }
        }
        Phase::Advancing(item, Finish::Completed)
    }

    async fn advance(&self, finished: QueueItem, finish: Finish) -> Result<Phase> {
        let store = &self.inner.store;
        let next = store.get_head_of_upcoming().await?;

        if let Some(next) = &next {
            self.await_prefetch(Some(&next.video_ref)).await;
        }

        let demoted = store
            .transition_stage(&finished.id, QueueStage::Active, QueueStage::History)
            .await?;
        {
            let mut state = self.inner.state.lock();
            state.history.push_front(demoted);
            state.history.truncate(self.inner.settings.history_cap);
            state.active = None;
        }

        let promoted = match next {
            Some(next) => Some(
                store
                    .transition_stage(&next.id, QueueStage::Upcoming, QueueStage::Active)
                    .await?,
            ),
            None => None,
        };

        let replay = promoted
            .as_ref()
            .is_some_and(|p| p.video_ref == finished.video_ref);
        if !replay {
            if let Err(err) = self
                .inner
                .pipeline
                .artifacts()
                .remove(&finished.video_ref)
                .await
            {
                warn!(video_ref = %finished.video_ref, error = %err, "Failed to remove artifact");
            }
        }

        metrics::ITEMS_PLAYED.with_label_values(&[finish.label()]).inc();
        info!(
            item_id = %finished.id,
            video_ref = %finished.video_ref,
            outcome = finish.label(),
            "Item finished"
        );

        self.broadcast(&ServerEvent::HistoryChanged {
            items: self.history(),
        });
        self.install_active(promoted);
        Ok(Phase::Resolving)
    }

    /// Set a new active item (or none) and reset per-item state.
    fn install_active(&self, item: Option<QueueItem>) {
        let upcoming = {
            let mut state = self.inner.state.lock();
            if let Some(item) = &item {
                state.upcoming.retain(|u| u.id != item.id);
            }
            state.active = item.clone();
            state.stream_path = None;
            state.elapsed_secs = 0;
            state.skip.clear();
            self.inner.skip_signal.send_replace(None);
            state.upcoming.clone()
        };

        self.broadcast(&ServerEvent::ActiveChanged { item });
        self.broadcast(&ServerEvent::UpcomingChanged { items: upcoming });
        self.broadcast(&ServerEvent::StreamPathChanged { path: None });
        self.broadcast_skip();
    }

    // ----- prefetch -----

    /// Re-check the prefetch after the upcoming queue changed mid-play.
    async fn prefetch_while_streaming(&self) {
        let current = {
            let state = self.inner.state.lock();
            state.stream_path.as_ref().and(state.active.clone())
        };
        if let Some(current) = current {
            self.launch_prefetch(&current).await;
        }
    }

    async fn launch_prefetch(&self, current: &QueueItem) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        let Some(next) = self.upcoming().into_iter().next() else {
            return;
        };
        if next.video_ref == current.video_ref
            || self.inner.pipeline.artifacts().exists(&next.video_ref).await
        {
            return;
        }

        let mut slot = self.inner.prefetch.lock();
        if slot.as_ref().is_some_and(|p| !p.handle.is_finished()) {
            return;
        }

        let pipeline = Arc::clone(&self.inner.pipeline);
        let video_ref = next.video_ref.clone();
        debug!(video_ref = %video_ref, "Prefetching next item");
        let handle = tokio::spawn(async move {
            match pipeline.run(&video_ref).await {
                Ok(outcome) => debug!(video_ref = %video_ref, ?outcome, "Prefetch finished"),
                Err(err) => warn!(video_ref = %video_ref, error = %err, "Prefetch failed"),
            }
        });
        *slot = Some(Prefetch {
            video_ref: next.video_ref,
            handle,
        });
    }

    /// Join the in-flight prefetch, or only the one for `only_for` when given.
    async fn await_prefetch(&self, only_for: Option<&VideoRef>) {
        let taken = {
            let mut slot = self.inner.prefetch.lock();
            match slot.as_ref() {
                Some(p) if only_for.is_none_or(|r| *r == p.video_ref) => slot.take(),
                _ => None,
            }
        };
        if let Some(prefetch) = taken {
            if let Err(err) = prefetch.handle.await {
                warn!(video_ref = %prefetch.video_ref, error = %err, "Prefetch task ended abnormally");
            }
        }
    }

    // ----- broadcast helpers -----

    fn broadcast(&self, event: &ServerEvent) {
        self.inner.hub.broadcast(event);
    }

    fn broadcast_participants(&self) {
        self.broadcast(&ServerEvent::ParticipantsChanged {
            participants: self.inner.hub.participants(),
        });
    }

    fn broadcast_skip(&self) {
        let threshold = SkipVotes::threshold(self.inner.hub.participant_count());
        let votes = self.inner.state.lock().skip.count();
        self.broadcast(&ServerEvent::SkipChanged { votes, threshold });
    }

    fn set_downloading(&self, downloading: bool) {
        self.inner.state.lock().downloading = downloading;
        self.broadcast(&ServerEvent::DownloadingChanged { downloading });
    }

    fn toast_all(&self, title: &str, description: String, severity: ToastSeverity) {
        self.broadcast(&ServerEvent::toast(title, description, severity));
    }

    fn toast_to(
        &self,
        participant: &ParticipantId,
        title: &str,
        description: impl Into<String>,
        severity: ToastSeverity,
    ) {
        self.inner
            .hub
            .send_to(participant, &ServerEvent::toast(title, description, severity));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{AcquisitionError, MockVideoSource, SourceInfo, StreamLocation};
    use crate::config::{AdmissionConfig, EgressConfig};
    use crate::models::VideoMetadata;
    use crate::repository::{MemoryQueueStore, MockQueueStore};
    use crate::segmenter::{SegmenterError, Transcoder};
    use crate::service::admission::RejectionReason;
    use async_trait::async_trait;
    use std::path::Path;
    use tokio::time::timeout;

    struct CopyTranscoder;

    #[async_trait]
    impl Transcoder for CopyTranscoder {
        async fn merge(&self, video: &Path, _audio: &Path, output: &Path) -> std::result::Result<(), SegmenterError> {
            tokio::fs::copy(video, output).await?;
            Ok(())
        }

        async fn segment(&self, _input: &Path, out_dir: &Path, manifest: &str) -> std::result::Result<(), SegmenterError> {
            tokio::fs::write(out_dir.join(manifest), "#EXTM3U\n#EXT-X-ENDLIST\n").await?;
            Ok(())
        }
    }

    fn info(title: &str, duration_secs: u32, is_live: bool) -> SourceInfo {
        SourceInfo {
            metadata: VideoMetadata {
                title: title.to_string(),
                duration_secs,
                thumbnail_url: String::new(),
                is_live,
            },
            video: Some(StreamLocation { url: "v".to_string(), ext: "mp4".to_string() }),
            audio: Some(StreamLocation { url: "a".to_string(), ext: "m4a".to_string() }),
        }
    }

    fn source_with(title: &'static str, duration_secs: u32, is_live: bool) -> MockVideoSource {
        let mut source = MockVideoSource::new();
        source
            .expect_resolve()
            .returning(move |_, _| Ok(info(title, duration_secs, is_live)));
        source.expect_download().returning(|_, _, dest| {
            std::fs::write(dest, b"data").unwrap();
            Ok(4)
        });
        source
    }

    fn build(store: Arc<dyn QueueStore>, source: MockVideoSource, root: &Path) -> Orchestrator {
        let acquisition = Arc::new(
            AcquisitionBackend::new(Arc::new(source), vec![EgressConfig::direct()]).unwrap(),
        );
        let pipeline = Arc::new(StreamPipeline::new(
            Arc::clone(&acquisition),
            Arc::new(CopyTranscoder),
            ArtifactStore::new(root.join("streams"), "index.m3u8"),
            root.join("work"),
        ));
        Orchestrator::new(
            store,
            acquisition,
            pipeline,
            AdmissionPolicy::new(&AdmissionConfig::default()),
            OrchestratorSettings {
                history_cap: 30,
                tick: Duration::from_millis(5),
                public_base_url: "http://localhost:8080".to_string(),
                manifest_name: "index.m3u8".to_string(),
            },
        )
    }

    fn alice() -> Participant {
        Participant::new("alice", "Alice")
    }

    #[tokio::test]
    async fn test_submit_without_participants_queues_but_does_not_start() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = build(
            Arc::new(MemoryQueueStore::new()),
            source_with("Song", 120, false),
            dir.path(),
        );

        let item = orchestrator.submit(&alice(), "dQw4w9WgXcQ").await.unwrap();
        assert_eq!(item.stage, QueueStage::Upcoming);
        assert_eq!(item.title, "Song");
        assert_eq!(orchestrator.upcoming(), vec![item]);
        assert!(orchestrator.active().is_none());
        assert!(!orchestrator.is_running());
        assert!(!orchestrator.maybe_start());
    }

    #[tokio::test]
    async fn test_submit_rejects_unparseable_reference() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = build(
            Arc::new(MemoryQueueStore::new()),
            MockVideoSource::new(),
            dir.path(),
        );

        let err = orchestrator.submit(&alice(), "not a video").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_submit_toasts_requester_when_metadata_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = MockVideoSource::new();
        source
            .expect_resolve()
            .returning(|_, _| Err(AcquisitionError::Metadata("private video".to_string())));
        let orchestrator = build(Arc::new(MemoryQueueStore::new()), source, dir.path());

        let mut rx = orchestrator.join(alice(), "c1".to_string());
        let err = orchestrator.submit(&alice(), "dQw4w9WgXcQ").await.unwrap_err();
        assert!(matches!(err, Error::AcquisitionFailed(_)));
        assert!(orchestrator.upcoming().is_empty());

        let mut toast = None;
        while let Ok(event) = rx.try_recv() {
            if let ServerEvent::Toast { title, severity, .. } = event {
                toast = Some((title, severity));
            }
        }
        assert_eq!(
            toast,
            Some((TOAST_NO_DETAILS.to_string(), ToastSeverity::Destructive))
        );
    }

    #[tokio::test]
    async fn test_submit_rejects_live_and_long_items() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = build(
            Arc::new(MemoryQueueStore::new()),
            source_with("Live now", 0, true),
            dir.path(),
        );
        let err = orchestrator.submit(&alice(), "dQw4w9WgXcQ").await.unwrap_err();
        assert!(matches!(err, Error::AdmissionRejected(RejectionReason::Live)));

        let orchestrator = build(
            Arc::new(MemoryQueueStore::new()),
            source_with("Concert", 3600, false),
            dir.path(),
        );
        let err = orchestrator.submit(&alice(), "dQw4w9WgXcQ").await.unwrap_err();
        assert!(matches!(err, Error::AdmissionRejected(RejectionReason::TooLong)));
    }

    #[tokio::test]
    async fn test_submit_rejects_duplicate_title() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = build(
            Arc::new(MemoryQueueStore::new()),
            source_with("Song", 120, false),
            dir.path(),
        );
        orchestrator.submit(&alice(), "dQw4w9WgXcQ").await.unwrap();
        let err = orchestrator
            .submit(&Participant::new("bob", "Bob"), "https://youtu.be/aaaaaaaaaaa")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AdmissionRejected(RejectionReason::Duplicate)));
        assert_eq!(orchestrator.upcoming().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_duplicate_submissions_admit_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryQueueStore::new());
        let orchestrator = build(store.clone(), source_with("Song", 120, false), dir.path());
        let bob = Participant::new("bob", "Bob");
        let alice = alice();

        let (first, second) = tokio::join!(
            orchestrator.submit(&alice, "dQw4w9WgXcQ"),
            orchestrator.submit(&bob, "aaaaaaaaaaa"),
        );

        assert_eq!(usize::from(first.is_ok()) + usize::from(second.is_ok()), 1);
        let rejected = first.err().or(second.err()).unwrap();
        assert!(matches!(rejected, Error::AdmissionRejected(RejectionReason::Duplicate)));
        assert_eq!(store.count(QueueStage::Upcoming), 1);
    }

    #[tokio::test]
    async fn test_submit_surfaces_store_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MockQueueStore::new();
        store
            .expect_get_queue()
            .returning(|_, _| Err(Error::StoreUnavailable(sqlx::Error::PoolTimedOut)));
        let orchestrator = build(Arc::new(store), source_with("Song", 120, false), dir.path());

        let err = orchestrator.submit(&alice(), "dQw4w9WgXcQ").await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_vote_skip_requires_active_item() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = build(
            Arc::new(MemoryQueueStore::new()),
            MockVideoSource::new(),
            dir.path(),
        );
        let _rx = orchestrator.join(alice(), "c1".to_string());
        assert!(orchestrator.vote_skip(&alice().id).is_err());
    }

    #[tokio::test]
    async fn test_join_sends_state_first() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = build(
            Arc::new(MemoryQueueStore::new()),
            MockVideoSource::new(),
            dir.path(),
        );
        let mut rx = orchestrator.join(alice(), "c1".to_string());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event_type(), "state");
        let second = rx.recv().await.unwrap();
        assert_eq!(
            second,
            ServerEvent::ParticipantsChanged {
                participants: vec![alice()]
            }
        );
        assert!(!orchestrator.is_running());
    }

    #[tokio::test]
    async fn test_single_item_plays_through_to_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryQueueStore::new());
        let orchestrator = build(store.clone(), source_with("Song", 2, false), dir.path());

        let _rx = orchestrator.join(alice(), "c1".to_string());
        let item = orchestrator.submit(&alice(), "dQw4w9WgXcQ").await.unwrap();

        timeout(Duration::from_secs(5), async {
            while orchestrator.history().is_empty() || orchestrator.is_running() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let history = orchestrator.history();
        assert_eq!(history[0].id, item.id);
        assert_eq!(history[0].stage, QueueStage::History);
        assert!(orchestrator.active().is_none());
        assert!(orchestrator.stream_path().is_none());
        assert_eq!(store.count(QueueStage::Active), 0);

        let artifacts = ArtifactStore::new(dir.path().join("streams"), "index.m3u8");
        assert!(!artifacts.exists(&item.video_ref).await);
    }

    fn queued(raw: &str, duration_secs: u32) -> NewQueueItem {
        NewQueueItem {
            video_ref: VideoRef::parse(raw).unwrap(),
            metadata: VideoMetadata {
                title: raw.to_string(),
                duration_secs,
                thumbnail_url: String::new(),
                is_live: false,
            },
            submitted_by: alice().id,
            submitter_name: "Alice".to_string(),
            submitter_avatar: None,
        }
    }

    #[tokio::test]
    async fn test_skip_signal_only_ends_the_item_it_was_raised_for() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryQueueStore::new());
        let orchestrator = build(store.clone(), MockVideoSource::new(), dir.path());
        let _rx = orchestrator.join(alice(), "c1".to_string());

        let finished = store.insert_item(queued("aaaaaaaaaaa", 3), QueueStage::Upcoming).await.unwrap();
        let next = store.insert_item(queued("bbbbbbbbbbb", 3), QueueStage::Upcoming).await.unwrap();

        orchestrator.install_active(Some(finished.clone()));
        assert_eq!(orchestrator.vote_skip(&alice().id).unwrap(), (1, 1));
        assert_eq!(*orchestrator.inner.skip_signal.borrow(), Some(finished.id.clone()));

        orchestrator.install_active(Some(next.clone()));
        assert_eq!(*orchestrator.inner.skip_signal.borrow(), None);

        // a signal raised for the previous item arrives late
        orchestrator.inner.skip_signal.send_replace(Some(finished.id.clone()));
        let phase = timeout(Duration::from_secs(2), orchestrator.stream(next.clone()))
            .await
            .unwrap();
        assert!(matches!(phase, Phase::Advancing(_, Finish::Completed)));

        orchestrator.inner.skip_signal.send_replace(Some(next.id.clone()));
        let phase = timeout(Duration::from_secs(2), orchestrator.stream(next))
            .await
            .unwrap();
        assert!(matches!(phase, Phase::Advancing(_, Finish::Skipped)));
    }

    #[tokio::test]
    async fn test_query_answers_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = build(
            Arc::new(MemoryQueueStore::new()),
            MockVideoSource::new(),
            dir.path(),
        );

        assert_eq!(
            orchestrator.query(&ClientMessage::GetTimestamp),
            Some(ServerEvent::Timestamp { elapsed_secs: 0 })
        );
        assert_eq!(
            orchestrator.query(&ClientMessage::GetStreamPath),
            Some(ServerEvent::StreamPathChanged { path: None })
        );
        assert_eq!(orchestrator.query(&ClientMessage::VoteSkip), None);
    }

    #[test]
    fn test_stream_path_format() {
        let settings = OrchestratorSettings {
            history_cap: 30,
            tick: Duration::from_secs(1),
            public_base_url: "https://jukebox.example/".to_string(),
            manifest_name: "index.m3u8".to_string(),
        };
        let video_ref = VideoRef::parse("dQw4w9WgXcQ").unwrap();
        assert_eq!(
            settings.stream_path(&video_ref),
            "https://jukebox.example/stream/dQw4w9WgXcQ/index.m3u8"
        );
    }
}
