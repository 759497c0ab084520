//! Durable queue records and moderation data.

pub mod banned_word;
pub mod memory;
pub mod queue;
pub mod session;

use async_trait::async_trait;

use crate::models::{ItemId, NewQueueItem, ParticipantId, QueueItem, QueueStage};
use crate::Result;

pub use banned_word::BannedWordRepository;
pub use memory::MemoryQueueStore;
pub use queue::PgQueueStore;
pub use session::SessionRepository;

/// Ordered record of queue items tagged by lifecycle stage.
///
/// `Upcoming` reads are FIFO by creation time, `History` reads are most
/// recently played first. At most one item is ever `Active`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn get_queue(&self, stage: QueueStage, limit: Option<usize>) -> Result<Vec<QueueItem>>;

    async fn get_active_item(&self) -> Result<Option<QueueItem>>;

    async fn get_head_of_upcoming(&self) -> Result<Option<QueueItem>>;

    /// Fails with `InvalidInput` when inserting as `Active` while another item is active.
    async fn insert_item(&self, item: NewQueueItem, stage: QueueStage) -> Result<QueueItem>;

    /// Conditional move: fails with `InvalidInput` when the row is not in
    /// `from` or the step is not a forward lifecycle transition.
    async fn transition_stage(
        &self,
        id: &ItemId,
        from: QueueStage,
        to: QueueStage,
    ) -> Result<QueueItem>;

    async fn count_upcoming_by(&self, submitter: &ParticipantId) -> Result<usize>;
}

pub(crate) fn check_transition(from: QueueStage, to: QueueStage) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(crate::Error::InvalidInput(format!(
            "Illegal stage transition {from} -> {to}"
        )))
    }
}
