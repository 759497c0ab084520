pub mod id;
pub mod participant;
pub mod queue_item;

pub use id::{generate_id, ItemId, ParticipantId};
pub use participant::{AuthRole, Participant};
pub use queue_item::{
    truncate_secs, NewQueueItem, QueueItem, QueueStage, VideoMetadata, VideoRef,
};
