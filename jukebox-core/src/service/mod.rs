//! Playback orchestration and the real-time participant channel.

pub mod admission;
pub mod events;
pub mod orchestrator;
pub mod presence;
pub mod skip;

pub use admission::{AdmissionPolicy, RejectionReason};
pub use events::{ClientMessage, PlaybackSnapshot, ServerEvent, ToastSeverity};
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use presence::{ConnectionId, Departure, EventSender, ParticipantHub};
pub use skip::SkipVotes;
