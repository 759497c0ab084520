//! Queue items and the source references they point at.

use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::id::{ItemId, ParticipantId};
use crate::{Error, Result};

/// Lifecycle stage of a queue item. Transitions only move forward:
/// `upcoming -> active -> history`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStage {
    Upcoming,
    Active,
    History,
}

impl QueueStage {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Upcoming => "upcoming",
            Self::Active => "active",
            Self::History => "history",
        }
    }

    /// Whether `self -> next` is a legal lifecycle step.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Upcoming, Self::Active) | (Self::Active, Self::History)
        )
    }
}

impl std::fmt::Display for QueueStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "upcoming" => Ok(Self::Upcoming),
            "active" => Ok(Self::Active),
            "history" => Ok(Self::History),
            _ => Err(Error::InvalidInput(format!("Unknown queue stage: {s}"))),
        }
    }
}

// Database mapping: QueueStage <-> TEXT
impl sqlx::Type<sqlx::Postgres> for QueueStage {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl sqlx::Encode<'_, sqlx::Postgres> for QueueStage {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> std::result::Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.as_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for QueueStage {
    fn decode(
        value: sqlx::postgres::PgValueRef<'r>,
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(s.parse()?)
    }
}

static BARE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("valid regex"));

static URL_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https?://)?(?:www\.|m\.|music\.)?(?:youtube\.com/(?:watch\?(?:[^#]*&)?v=|embed/|shorts/|live/)|youtu\.be/)([A-Za-z0-9_-]{11})(?:[?&#/].*)?$",
    )
    .expect("valid regex")
});

/// Canonical source reference: the 11-character video id.
///
/// The id alphabet is filesystem safe, so the ref doubles as the artifact
/// directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VideoRef(String);

impl VideoRef {
    /// Parse a bare id or any of the watch / short-link / embed / shorts URL forms.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if BARE_ID.is_match(input) {
            return Ok(Self(input.to_string()));
        }
        URL_ID
            .captures(input)
            .and_then(|caps| caps.get(1))
            .map(|m| Self(m.as_str().to_string()))
            .ok_or_else(|| Error::InvalidInput(format!("Not a recognizable video reference: {input}")))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.0)
    }
}

impl std::fmt::Display for VideoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for VideoRef {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<VideoRef> for String {
    fn from(value: VideoRef) -> Self {
        value.0
    }
}

impl sqlx::Type<sqlx::Postgres> for VideoRef {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl sqlx::Encode<'_, sqlx::Postgres> for VideoRef {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> std::result::Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for VideoRef {
    fn decode(
        value: sqlx::postgres::PgValueRef<'r>,
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self::parse(&s)?)
    }
}

/// Metadata resolved for a source reference before admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    /// Whole seconds, truncated.
    pub duration_secs: u32,
    pub thumbnail_url: String,
    pub is_live: bool,
}

/// Truncate a fractional duration to whole seconds, clamping negatives and NaN to zero.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn truncate_secs(secs: f64) -> u32 {
    if secs.is_nan() || secs <= 0.0 {
        0
    } else if secs >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        secs.trunc() as u32
    }
}

/// Item about to be inserted.
#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub video_ref: VideoRef,
    pub metadata: VideoMetadata,
    pub submitted_by: ParticipantId,
    pub submitter_name: String,
    pub submitter_avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueItem {
    pub id: ItemId,
    pub video_ref: VideoRef,
    pub title: String,
    #[sqlx(try_from = "i32")]
    pub duration_secs: u32,
    pub thumbnail_url: String,
    pub submitted_by: ParticipantId,
    pub submitter_name: String,
    pub submitter_avatar: Option<String>,
    pub stage: QueueStage,
    pub created_at: DateTime<Utc>,
}

impl QueueItem {
    #[must_use]
    pub fn from_new(new: NewQueueItem, stage: QueueStage, created_at: DateTime<Utc>) -> Self {
        Self {
            id: ItemId::new(),
            video_ref: new.video_ref,
            title: new.metadata.title,
            duration_secs: new.metadata.duration_secs,
            thumbnail_url: new.metadata.thumbnail_url,
            submitted_by: new.submitted_by,
            submitter_name: new.submitter_name,
            submitter_avatar: new.submitter_avatar,
            stage,
            created_at,
        }
    }
}
