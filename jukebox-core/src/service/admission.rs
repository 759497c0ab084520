//! Pre-enqueue validation of candidate items.

use serde::{Serialize, Serializer};

use crate::config::AdmissionConfig;
use crate::models::{QueueItem, VideoMetadata};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    Live,
    Duplicate,
    TooLong,
    BannedWord(String),
    QueueLimit,
}

impl RejectionReason {
    /// Text shown to the requester.
    #[must_use]
    pub fn describe(&self, max_duration_secs: u32, limit: usize) -> String {
        match self {
            Self::Live => "Live streams can't be queued.".to_string(),
            Self::Duplicate => "This video is already in the queue.".to_string(),
            Self::TooLong => format!(
                "Videos longer than {} minutes can't be queued.",
                max_duration_secs / 60
            ),
            Self::BannedWord(word) => format!("The title contains a banned word: {word}"),
            Self::QueueLimit => format!("You already have {limit} videos in the queue."),
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => f.write_str("live"),
            Self::Duplicate => f.write_str("duplicate"),
            Self::TooLong => f.write_str("too-long"),
            Self::BannedWord(word) => write!(f, "banned-word:{word}"),
            Self::QueueLimit => f.write_str("queue-limit"),
        }
    }
}

impl Serialize for RejectionReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Ordered admission checks; the first failing check decides.
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    max_duration_secs: u32,
    /// Lowercased, deduplicated
    banned_words: Vec<String>,
    per_participant_limit: usize,
}

impl AdmissionPolicy {
    #[must_use]
    pub fn new(config: &AdmissionConfig) -> Self {
        let mut policy = Self {
            max_duration_secs: config.max_duration_secs,
            banned_words: Vec::new(),
            per_participant_limit: config.per_participant_limit,
        };
        policy.extend_banned_words(config.banned_words.iter().cloned());
        policy
    }

    /// Merge more moderated words, e.g. from the database.
    pub fn extend_banned_words(&mut self, words: impl IntoIterator<Item = String>) {
        for word in words {
            let word = word.trim().to_lowercase();
            if !word.is_empty() && !self.banned_words.contains(&word) {
                self.banned_words.push(word);
            }
        }
    }

    #[must_use]
    pub fn banned_words(&self) -> &[String] {
        &self.banned_words
    }

    #[must_use]
    pub const fn max_duration_secs(&self) -> u32 {
        self.max_duration_secs
    }

    #[must_use]
    pub const fn per_participant_limit(&self) -> usize {
        self.per_participant_limit
    }

    /// `upcoming` is the current upcoming queue, `submitter_upcoming` how
    /// many of those the submitter owns.
    pub fn check(
        &self,
        metadata: &VideoMetadata,
        upcoming: &[QueueItem],
        submitter_upcoming: usize,
    ) -> Result<(), RejectionReason> {
        if metadata.is_live {
            return Err(RejectionReason::Live);
        }
        if upcoming.iter().any(|item| item.title == metadata.title) {
            return Err(RejectionReason::Duplicate);
        }
        if metadata.duration_secs > self.max_duration_secs {
            return Err(RejectionReason::TooLong);
        }

        let title = metadata.title.to_lowercase();
        if let Some(word) = self.banned_words.iter().find(|w| title.contains(w.as_str())) {
            return Err(RejectionReason::BannedWord(word.clone()));
        }

        if submitter_upcoming >= self.per_participant_limit {
            return Err(RejectionReason::QueueLimit);
        }
        Ok(())
    }
}
