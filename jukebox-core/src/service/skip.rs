use std::collections::HashSet;

use crate::models::ParticipantId;

/// Votes to skip the active item. One vote per participant.
#[derive(Debug, Default, Clone)]
pub struct SkipVotes {
    voters: HashSet<ParticipantId>,
}

impl SkipVotes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `ceil(participants / 2)`
    #[must_use]
    pub const fn threshold(participants: usize) -> usize {
        participants.div_ceil(2)
    }

    /// Returns false for a repeated vote.
    pub fn vote(&mut self, participant: ParticipantId) -> bool {
        self.voters.insert(participant)
    }

    pub fn retract(&mut self, participant: &ParticipantId) -> bool {
        self.voters.remove(participant)
    }

    pub fn clear(&mut self) {
        self.voters.clear();
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.voters.len()
    }

    #[must_use]
    pub fn has_voted(&self, participant: &ParticipantId) -> bool {
        self.voters.contains(participant)
    }

    #[must_use]
    pub fn reached(&self, participants: usize) -> bool {
        !self.voters.is_empty() && self.count() >= Self::threshold(participants)
    }
}
