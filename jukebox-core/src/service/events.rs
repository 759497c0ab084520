//! Messages exchanged over the real-time channel.

use serde::{Deserialize, Serialize};

use crate::models::{Participant, QueueItem};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastSeverity {
    #[default]
    Default,
    Destructive,
}

/// Everything a freshly connected client needs to render the player.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub active: Option<QueueItem>,
    pub upcoming: Vec<QueueItem>,
    pub history: Vec<QueueItem>,
    pub stream_path: Option<String>,
    pub downloading: bool,
    pub elapsed_secs: u64,
    pub skip_votes: usize,
    pub skip_threshold: usize,
}

/// Server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    ActiveChanged {
        item: Option<QueueItem>,
    },
    UpcomingChanged {
        items: Vec<QueueItem>,
    },
    /// Most recently played first
    HistoryChanged {
        items: Vec<QueueItem>,
    },
    StreamPathChanged {
        path: Option<String>,
    },
    DownloadingChanged {
        downloading: bool,
    },
    SkipChanged {
        votes: usize,
        threshold: usize,
    },
    ParticipantsChanged {
        participants: Vec<Participant>,
    },
    Toast {
        title: String,
        description: String,
        severity: ToastSeverity,
    },
    Timestamp {
        elapsed_secs: u64,
    },
    State(PlaybackSnapshot),
}

impl ServerEvent {
    pub fn toast(
        title: impl Into<String>,
        description: impl Into<String>,
        severity: ToastSeverity,
    ) -> Self {
        Self::Toast {
            title: title.into(),
            description: description.into(),
            severity,
        }
    }

    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::ActiveChanged { .. } => "active_changed",
            Self::UpcomingChanged { .. } => "upcoming_changed",
            Self::HistoryChanged { .. } => "history_changed",
            Self::StreamPathChanged { .. } => "stream_path_changed",
            Self::DownloadingChanged { .. } => "downloading_changed",
            Self::SkipChanged { .. } => "skip_changed",
            Self::ParticipantsChanged { .. } => "participants_changed",
            Self::Toast { .. } => "toast",
            Self::Timestamp { .. } => "timestamp",
            Self::State(_) => "state",
        }
    }
}

/// Client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// `video` is a bare id or any supported URL form.
    AddItem { video: String },
    VoteSkip,
    GetState,
    GetActive,
    GetUpcoming,
    GetHistory,
    GetStreamPath,
    GetTimestamp,
    GetParticipants,
}
